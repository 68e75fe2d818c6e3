use std::path::PathBuf;
use std::time::Duration;

/// Name of the engine CLI binary looked up on `PATH`.
pub const DEFAULT_ENGINE_BINARY: &str = "imposter";
/// File name the engine reads its plugin configuration from.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "imposter-config.json";
/// Project-level CLI configuration file picked up by local config discovery.
pub const DEFAULT_LOCAL_CONFIG_FILE_NAME: &str = "imposter.config.json";

/// Process-level configuration for launching the engine binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path (or bare name) of the `imposter` binary to spawn.
    pub binary_path: PathBuf,
    /// Additional CLI arguments appended to `up`.
    pub extra_args: Vec<String>,
    /// Marker identifying the CLI line in `imposter version` output.
    pub component_marker: String,
    /// File name written into each configuration directory.
    pub config_file_name: String,
    /// File name searched for by local config discovery.
    pub local_config_file_name: String,
    /// Path of the readiness endpoint.
    pub health_path: String,
    /// Fixed delay between readiness probes.
    pub poll_interval: Duration,
    /// Timeout applied to each individual readiness probe.
    pub probe_timeout: Duration,
    /// Optional ceiling on the whole readiness wait. `None` leaves it to the test runner.
    pub startup_timeout: Option<Duration>,
    /// Whether engine output is appended to a per-mock log file.
    pub log_to_file: bool,
}

impl EngineConfig {
    /// Create a new config targeting a specific engine binary.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            component_marker: "imposter-cli".to_string(),
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            local_config_file_name: DEFAULT_LOCAL_CONFIG_FILE_NAME.to_string(),
            health_path: "/system/status".to_string(),
            poll_interval: Duration::from_millis(200),
            probe_timeout: Duration::from_secs(1),
            startup_timeout: None,
            log_to_file: true,
        }
    }

    /// Add a passthrough CLI argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Override the version output marker used to find the CLI version.
    pub fn with_component_marker(mut self, marker: impl Into<String>) -> Self {
        self.component_marker = marker.into();
        self
    }

    /// Override the name of the configuration file written by builders.
    pub fn with_config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// Override the readiness endpoint path.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Override the delay between readiness probes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the per-probe request timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Bound the readiness wait. Without this the wait only ends on readiness or process exit.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Enable or disable the per-mock log file.
    pub fn with_log_to_file(mut self, enabled: bool) -> Self {
        self.log_to_file = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_BINARY)
    }
}
