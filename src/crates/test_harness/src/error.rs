use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::document::PluginKind;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while configuring, spawning or supervising the mock engine.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("could not run engine binary `{binary}`; is the Imposter CLI installed? ({source})")]
    EngineNotFound {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn engine: {0}")]
    EngineStart(String),
    #[error("mock for {0} has already been started")]
    AlreadyStarted(PathBuf),
    #[error("mock engine on port {port} terminated before becoming ready ({status}){advice}")]
    StartupFailed {
        port: u16,
        status: ExitStatus,
        advice: String,
    },
    #[error("mock engine did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("error determining engine version; process terminated with {0}")]
    VersionQueryFailed(ExitStatus),
    #[error("error parsing engine version from '{output}': {reason}")]
    VersionParse { output: String, reason: String },
    #[error("engine version requested before the version gate was initialized")]
    VersionNotInitialized,
    #[error("plugin already set to: {current}, cannot change it to {requested}")]
    PluginConflict {
        current: PluginKind,
        requested: PluginKind,
    },
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
    #[error("no plugin selected for mock configuration")]
    MissingPlugin,
    #[error("invalid mock configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot get base URL before starting mock unless port explicitly set")]
    PortNotAssigned,
    #[error("failed to stop mock: {0}")]
    StopFailed(String),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub(crate) fn engine_start(err: impl Into<String>) -> Self {
        HarnessError::EngineStart(err.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        HarnessError::InvalidConfig(message.into())
    }

    /// Map a spawn failure to the not-installed error when the binary is missing.
    pub(crate) fn from_spawn(binary: &std::path::Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            HarnessError::EngineNotFound {
                binary: binary.display().to_string(),
                source: err,
            }
        } else {
            HarnessError::engine_start(format!("{}: {err}", binary.display()))
        }
    }

    /// Exit code carried by a startup failure, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HarnessError::StartupFailed { status, .. } | HarnessError::VersionQueryFailed(status) => {
                status.code()
            }
            _ => None,
        }
    }
}
