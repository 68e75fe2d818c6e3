//! Utilities for launching the Imposter mock engine from tests, waiting until
//! it serves traffic and tearing it down afterwards.
//!
//! Typical usage:
//! ```no_run
//! use imposter_harness::{Method, MockManager};
//!
//! # async fn run() -> imposter_harness::HarnessResult<()> {
//! let mocks = MockManager::new();
//!
//! let mut builder = mocks.builder()?.with_plugin("rest")?;
//! builder
//!     .add_resource("/example", Method::Post)
//!     .responds(201)
//!     .with_data("Hello world");
//! let mock = builder.start().await?;
//!
//! let url = format!("{}/example", mock.base_url()?);
//! println!("send requests to {url}");
//!
//! mocks.stop_all();
//! # Ok(())
//! # }
//! ```
//!
//! An existing configuration directory can be started directly with
//! [`MockManager::start`]. Behaviour that depends on the installed engine
//! release goes through [`VersionGate`].

mod builder;
mod config;
mod discovery;
mod document;
mod error;
mod health;
mod manager;
mod mock;
mod version;

pub use builder::{BuildOptions, CaptureRules, MockBuilder, ResourceHandle, ResponseBuilder};
pub use config::{
    EngineConfig, DEFAULT_CONFIG_FILE_NAME, DEFAULT_ENGINE_BINARY, DEFAULT_LOCAL_CONFIG_FILE_NAME,
};
pub use discovery::LocalConfigDiscovery;
pub use document::{
    CaptureConfig, CaptureSource, Method, PluginConfig, PluginKind, ResourceConfig, ResponseBody,
    ResponseConfig, ValidationConfig, ValidationLevel, SECURITY_INVALID_LEVEL,
    SECURITY_MISSING_LEVEL,
};
pub use error::{HarnessError, HarnessResult};
pub use manager::{mocks, MockManager};
pub use mock::{assign_free_port, ConfiguredMock, LogLine, LogStream, MockStatus};
pub use version::{FeatureGate, SemanticVersion, VersionGate};
