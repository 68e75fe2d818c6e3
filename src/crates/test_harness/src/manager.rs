use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tempfile::TempDir;
use tracing::warn;

use crate::builder::MockBuilder;
use crate::config::EngineConfig;
use crate::discovery::LocalConfigDiscovery;
use crate::error::HarnessResult;
use crate::mock::{ConfiguredMock, MockContext};
use crate::version::VersionGate;

/// Creates mocks and remembers every one of them for [`MockManager::stop_all`].
///
/// Clones share the same registry.
#[derive(Debug, Clone)]
pub struct MockManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    context: Arc<MockContext>,
    verbose: AtomicBool,
    mocks: Mutex<Vec<ConfiguredMock>>,
}

impl MockManager {
    /// Registry for the `imposter` binary on `PATH`.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(engine: EngineConfig) -> Self {
        let gate = VersionGate::new(engine.binary_path.clone(), engine.component_marker.clone());
        let discovery = LocalConfigDiscovery::new(engine.local_config_file_name.clone());
        Self::from_parts(engine, Arc::new(gate), discovery)
    }

    fn from_parts(
        engine: EngineConfig,
        gate: Arc<VersionGate>,
        discovery: LocalConfigDiscovery,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                context: Arc::new(MockContext {
                    engine,
                    gate,
                    discovery,
                }),
                verbose: AtomicBool::new(false),
                mocks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the version gate, e.g. with [`VersionGate::from_output`] to pin a version.
    ///
    /// Must be called before any mock is prepared; mocks keep the gate they were created with.
    pub fn with_version_gate(self, gate: VersionGate) -> Self {
        let context = &self.inner.context;
        Self::from_parts(context.engine.clone(), Arc::new(gate), context.discovery.clone())
            .inherit_verbosity(&self)
    }

    /// Replace local project config discovery. Same ordering rule as [`MockManager::with_version_gate`].
    pub fn with_local_config(self, discovery: LocalConfigDiscovery) -> Self {
        let context = &self.inner.context;
        Self::from_parts(context.engine.clone(), Arc::clone(&context.gate), discovery)
            .inherit_verbosity(&self)
    }

    fn inherit_verbosity(self, previous: &MockManager) -> Self {
        if previous.is_verbose() {
            self.inner.verbose.store(true, Ordering::SeqCst);
        }
        self
    }

    /// Make every mock prepared from now on verbose.
    pub fn verbose(self) -> Self {
        self.inner.verbose.store(true, Ordering::SeqCst);
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.inner.verbose.load(Ordering::SeqCst)
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.inner.context.engine
    }

    pub fn version_gate(&self) -> &VersionGate {
        &self.inner.context.gate
    }

    /// Create an unstarted mock for the configuration in `config_dir`.
    pub fn prepare(
        &self,
        config_dir: impl Into<PathBuf>,
        port: Option<u16>,
        env: BTreeMap<String, String>,
    ) -> ConfiguredMock {
        self.register(config_dir.into(), port, env, None)
    }

    pub(crate) fn prepare_owned(
        &self,
        workdir: TempDir,
        port: Option<u16>,
        env: BTreeMap<String, String>,
    ) -> ConfiguredMock {
        let config_dir = workdir.path().to_path_buf();
        self.register(config_dir, port, env, Some(workdir))
    }

    fn register(
        &self,
        config_dir: PathBuf,
        port: Option<u16>,
        env: BTreeMap<String, String>,
        workdir: Option<TempDir>,
    ) -> ConfiguredMock {
        let mut mock = ConfiguredMock::new(
            config_dir,
            port,
            env,
            Arc::clone(&self.inner.context),
            workdir,
        );
        if self.is_verbose() {
            mock = mock.verbose();
        }
        self.inner
            .mocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mock.clone());
        mock
    }

    /// Start a mock using the configuration within `config_dir`.
    ///
    /// Convenience for `prepare(..).start()`; [`MockManager::builder`] offers more options.
    pub async fn start(
        &self,
        config_dir: impl Into<PathBuf>,
        port: Option<u16>,
        env: BTreeMap<String, String>,
    ) -> HarnessResult<ConfiguredMock> {
        self.prepare(config_dir, port, env).start().await
    }

    /// Stop every mock created by this registry.
    ///
    /// Failures are logged and do not prevent the remaining mocks from being stopped.
    pub fn stop_all(&self) {
        for mock in self.mocks() {
            if let Err(err) = mock.stop() {
                warn!(
                    config_dir = %mock.config_dir().display(),
                    error = %err,
                    "error stopping mock"
                );
            }
        }
    }

    /// Snapshot of every mock created so far.
    pub fn mocks(&self) -> Vec<ConfiguredMock> {
        self.inner
            .mocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start describing a mock with a fresh temporary configuration directory.
    pub fn builder(&self) -> HarnessResult<MockBuilder> {
        MockBuilder::new(self.clone())
    }
}

impl Default for MockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry for suites that do not need their own.
pub fn mocks() -> &'static MockManager {
    static DEFAULT: OnceLock<MockManager> = OnceLock::new();
    DEFAULT.get_or_init(MockManager::new)
}
