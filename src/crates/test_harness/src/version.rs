//! Engine version detection and version-gated behaviour.
//!
//! The installed CLI is queried once with `imposter version`; every behaviour
//! that differs between engine releases is listed as a [`FeatureGate`] and
//! evaluated through [`VersionGate`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Semantic version reported by an engine component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl SemanticVersion {
    /// Version from its three components.
    pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Parse `major.minor.revision`, ignoring any `-pre`/`+build` suffix on the revision.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let revision_text = parts.next()?;
        let digits = revision_text
            .find(|c: char| !c.is_ascii_digit())
            .map_or(revision_text, |end| &revision_text[..end]);
        let revision = digits.parse().ok()?;
        Some(Self::new(major, minor, revision))
    }

    /// Whether `self` is equal to or newer than `required`.
    pub fn at_least(&self, required: &SemanticVersion) -> bool {
        self >= required
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// A façade behaviour that is only enabled from a minimum engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGate {
    pub name: &'static str,
    pub minimum: SemanticVersion,
}

impl FeatureGate {
    /// Project configuration files passed through `--config`.
    pub const LOCAL_CONFIG: FeatureGate = FeatureGate {
        name: "local-config",
        minimum: SemanticVersion::new(0, 6, 0),
    };

    /// `imposter doctor` suggested in startup failure messages.
    pub const DOCTOR_ADVICE: FeatureGate = FeatureGate {
        name: "doctor-advice",
        minimum: SemanticVersion::new(0, 6, 2),
    };

    /// Gate named `name`, enabled from `minimum` on.
    pub const fn new(name: &'static str, minimum: SemanticVersion) -> Self {
        Self { name, minimum }
    }
}

/// Caches the output of `imposter version` and answers version questions from it.
#[derive(Debug)]
pub struct VersionGate {
    binary: PathBuf,
    component_marker: String,
    output: OnceCell<String>,
    version: OnceLock<SemanticVersion>,
}

impl VersionGate {
    /// Gate that queries `binary` and reads the line containing `component_marker`.
    pub fn new(binary: impl Into<PathBuf>, component_marker: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            component_marker: component_marker.into(),
            output: OnceCell::new(),
            version: OnceLock::new(),
        }
    }

    /// Build a gate that reports from the given version output instead of running the CLI.
    pub fn from_output(component_marker: impl Into<String>, output: impl Into<String>) -> Self {
        let gate = Self::new(PathBuf::new(), component_marker);
        let _ = gate.output.set(output.into());
        gate
    }

    /// Run the version command once. Later calls reuse the cached output.
    pub async fn initialize(&self) -> HarnessResult<()> {
        self.output
            .get_or_try_init(|| self.invoke_version_command())
            .await?;
        Ok(())
    }

    /// Whether version output is cached.
    pub fn is_initialized(&self) -> bool {
        self.output.initialized()
    }

    async fn invoke_version_command(&self) -> HarnessResult<String> {
        debug!(binary = %self.binary.display(), "querying engine version");
        let output = Command::new(&self.binary)
            .arg("version")
            .env("LOG_LEVEL", "INFO")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| HarnessError::from_spawn(&self.binary, err))?;

        if !output.status.success() {
            return Err(HarnessError::VersionQueryFailed(output.status));
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    /// Version of the component identified by the configured marker.
    pub fn current_version(&self) -> HarnessResult<SemanticVersion> {
        if let Some(version) = self.version.get() {
            return Ok(*version);
        }
        let output = self.output.get().ok_or(HarnessError::VersionNotInitialized)?;
        let version = parse_component_version(output, &self.component_marker)?;
        Ok(*self.version.get_or_init(|| version))
    }

    /// Whether the installed engine enables `feature`.
    pub fn supports(&self, feature: &FeatureGate) -> HarnessResult<bool> {
        let version = self.current_version()?;
        let enabled = version.at_least(&feature.minimum);
        debug!(feature = feature.name, %version, enabled, "evaluated feature gate");
        Ok(enabled)
    }

    /// Run `primary` if the engine is at least `required`.
    pub fn run_if_at_least<T>(
        &self,
        required: SemanticVersion,
        primary: impl FnOnce() -> T,
    ) -> HarnessResult<Option<T>> {
        let version = self.current_version()?;
        Ok(version.at_least(&required).then(primary))
    }

    /// Run `primary` if the engine is at least `required`, otherwise `fallback`.
    pub fn run_if_at_least_or_else<T>(
        &self,
        required: SemanticVersion,
        primary: impl FnOnce() -> T,
        fallback: impl FnOnce() -> T,
    ) -> HarnessResult<T> {
        let version = self.current_version()?;
        if version.at_least(&required) {
            Ok(primary())
        } else {
            Ok(fallback())
        }
    }
}

/// Parse output in the form:
///
/// ```text
/// imposter-cli 0.6.2
/// imposter-engine 4.2.1
/// ```
fn parse_component_version(output: &str, marker: &str) -> HarnessResult<SemanticVersion> {
    let parse_error = |reason: &str| HarnessError::VersionParse {
        output: output.trim().to_string(),
        reason: reason.to_string(),
    };

    let line = output
        .lines()
        .find(|line| line.contains(marker))
        .ok_or_else(|| parse_error(&format!("no line containing '{marker}'")))?;

    let version_text = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| parse_error("missing version after component name"))?;

    SemanticVersion::parse(version_text)
        .ok_or_else(|| parse_error(&format!("'{version_text}' is not major.minor.revision")))
}
