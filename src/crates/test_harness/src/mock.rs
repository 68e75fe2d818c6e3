use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::discovery::LocalConfigDiscovery;
use crate::error::{HarnessError, HarnessResult};
use crate::health::{self, Readiness};
use crate::version::{FeatureGate, VersionGate};

/// Origin stream for captured engine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured output line with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Observable lifecycle state of a mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStatus {
    /// Prepared but `start` not yet called.
    Configured,
    /// Process spawned (or about to be), waiting for the status endpoint.
    Starting,
    /// Status endpoint answered 200; safe to send traffic.
    Ready,
    /// Stopped by the caller or the process exited after readiness.
    Stopped,
    /// `start` failed. The mock cannot be used again.
    Failed,
}

/// Collaborators shared by every mock created from one registry.
#[derive(Debug)]
pub(crate) struct MockContext {
    pub(crate) engine: EngineConfig,
    pub(crate) gate: Arc<VersionGate>,
    pub(crate) discovery: LocalConfigDiscovery,
}

#[derive(Debug)]
struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    exited: watch::Receiver<Option<ExitStatus>>,
}

impl ProcessHandle {
    fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Ask the supervisor to kill the process. Never waits.
    fn kill(self, port: Option<u16>) {
        if self.has_exited() {
            debug!(?port, pid = ?self.pid, "mock engine already exited");
            return;
        }
        debug!(?port, pid = ?self.pid, "stopping mock engine");
        if self.kill_tx.send(()).is_err() {
            warn!(?port, pid = ?self.pid, "mock engine supervisor already finished");
        }
    }
}

#[derive(Debug)]
enum MockState {
    Configured,
    Starting(Option<ProcessHandle>),
    Ready(ProcessHandle),
    Stopped,
    Failed,
}

#[derive(Debug)]
struct MockInner {
    config_dir: PathBuf,
    port: OnceLock<u16>,
    env: BTreeMap<String, String>,
    verbose: AtomicBool,
    log_to_file: AtomicBool,
    log_file: OnceLock<PathBuf>,
    log_buffer: Arc<Mutex<Vec<LogLine>>>,
    state: Mutex<MockState>,
    context: Arc<MockContext>,
    // Removed when the last handle drops.
    _workdir: Option<TempDir>,
}

impl MockInner {
    fn on_exit(&self, status: ExitStatus) {
        let port = self.port.get().copied();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let MockState::Ready(_) = &*state {
            *state = MockState::Stopped;
            if status.success() {
                debug!(?port, "mock engine process terminated");
            } else {
                warn!(?port, %status, "mock engine process terminated after becoming ready");
            }
        }
    }
}

/// One engine process bound to one configuration directory and port.
///
/// Handles are cheap to clone and all refer to the same instance. Dropping the
/// last handle kills the process if it is still running.
#[derive(Debug, Clone)]
pub struct ConfiguredMock {
    inner: Arc<MockInner>,
}

impl ConfiguredMock {
    pub(crate) fn new(
        config_dir: PathBuf,
        port: Option<u16>,
        env: BTreeMap<String, String>,
        context: Arc<MockContext>,
        workdir: Option<TempDir>,
    ) -> Self {
        let fixed_port = OnceLock::new();
        if let Some(port) = port {
            let _ = fixed_port.set(port);
        }
        let log_to_file = context.engine.log_to_file;

        Self {
            inner: Arc::new(MockInner {
                config_dir,
                port: fixed_port,
                env,
                verbose: AtomicBool::new(false),
                log_to_file: AtomicBool::new(log_to_file),
                log_file: OnceLock::new(),
                log_buffer: Arc::new(Mutex::new(Vec::new())),
                state: Mutex::new(MockState::Configured),
                context,
                _workdir: workdir,
            }),
        }
    }

    /// Echo engine output through `tracing` while the mock runs.
    pub fn verbose(self) -> Self {
        self.inner.verbose.store(true, Ordering::SeqCst);
        self
    }

    /// Enable or disable the per-mock log file. Only effective before `start`.
    pub fn with_log_to_file(self, enabled: bool) -> Self {
        self.inner.log_to_file.store(enabled, Ordering::SeqCst);
        self
    }

    /// Whether engine output is echoed through `tracing`.
    pub fn is_verbose(&self) -> bool {
        self.inner.verbose.load(Ordering::SeqCst)
    }

    /// Directory passed to `imposter up`.
    pub fn config_dir(&self) -> &Path {
        &self.inner.config_dir
    }

    /// Variables added to the engine's inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.inner.env
    }

    /// Listening port, once fixed.
    pub fn port(&self) -> Option<u16> {
        self.inner.port.get().copied()
    }

    /// `http://localhost:<port>`; fails with [`HarnessError::PortNotAssigned`] before a port is fixed.
    pub fn base_url(&self) -> HarnessResult<String> {
        let port = self.port().ok_or(HarnessError::PortNotAssigned)?;
        Ok(format!("http://localhost:{port}"))
    }

    /// Path of the log file receiving engine output, once created.
    pub fn log_file(&self) -> Option<&Path> {
        self.inner.log_file.get().map(PathBuf::as_path)
    }

    /// All engine output captured so far.
    pub fn logs(&self) -> Vec<LogLine> {
        self.inner
            .log_buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> MockStatus {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            MockState::Configured => MockStatus::Configured,
            MockState::Starting(_) => MockStatus::Starting,
            MockState::Ready(handle) if handle.has_exited() => MockStatus::Stopped,
            MockState::Ready(_) => MockStatus::Ready,
            MockState::Stopped => MockStatus::Stopped,
            MockState::Failed => MockStatus::Failed,
        }
    }

    /// OS process id of the running engine.
    pub fn pid(&self) -> Option<u32> {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            MockState::Starting(Some(handle)) | MockState::Ready(handle) => handle.pid,
            _ => None,
        }
    }

    /// Spawn the engine and wait until its status endpoint answers 200.
    ///
    /// Fails with [`HarnessError::AlreadyStarted`] on any instance that has left
    /// the configured state, including while a first `start` is still pending.
    /// There is no overall deadline unless [`EngineConfig::with_startup_timeout`]
    /// was used; the wait ends early as soon as the process exits.
    pub async fn start(&self) -> HarnessResult<ConfiguredMock> {
        self.begin_start()?;

        let span = info_span!("mock", config_dir = %self.inner.config_dir.display());
        match self.launch().instrument(span).await {
            Ok(()) => Ok(self.clone()),
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    /// Kill the engine process if it is running. Safe to call in any state.
    pub fn stop(&self) -> HarnessResult<()> {
        let port = self.port();
        let previous = {
            let mut state = self.inner.state.lock().map_err(|_| {
                HarnessError::StopFailed(format!(
                    "state of mock for {} is poisoned",
                    self.inner.config_dir.display()
                ))
            })?;
            if matches!(&*state, MockState::Failed) {
                MockState::Failed
            } else {
                std::mem::replace(&mut *state, MockState::Stopped)
            }
        };

        match previous {
            MockState::Starting(Some(handle)) | MockState::Ready(handle) => handle.kill(port),
            MockState::Starting(None) => {
                debug!(?port, "mock stopped before its process was spawned")
            }
            MockState::Configured | MockState::Stopped | MockState::Failed => {
                debug!(?port, "mock server was not running")
            }
        }
        Ok(())
    }

    fn begin_start(&self) -> HarnessResult<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(&*state, MockState::Configured) {
            return Err(HarnessError::AlreadyStarted(self.inner.config_dir.clone()));
        }
        *state = MockState::Starting(None);
        Ok(())
    }

    fn fail(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, MockState::Failed) {
            MockState::Starting(Some(handle)) => handle.kill(self.port()),
            MockState::Starting(None) => {}
            // Stopped concurrently; keep the caller's transition.
            _ => *state = MockState::Stopped,
        }
    }

    async fn launch(&self) -> HarnessResult<()> {
        let context = Arc::clone(&self.inner.context);
        let engine = &context.engine;

        context.gate.initialize().await?;
        let port = self.resolve_port()?;

        let local_config = context
            .gate
            .run_if_at_least(FeatureGate::LOCAL_CONFIG.minimum, || {
                context.discovery.discover()
            })?
            .flatten();

        let verbose = self.is_verbose();
        let args = self.build_args(engine, port, local_config.as_deref());
        validate_env(&self.inner.env);
        if verbose {
            debug!(?args, env = ?self.inner.env, "engine arguments");
        }

        let log_file = if self.inner.log_to_file.load(Ordering::SeqCst) {
            Some(self.open_log_file()?)
        } else {
            None
        };

        let mut child = Command::new(&engine.binary_path)
            .args(&args)
            .envs(&self.inner.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| HarnessError::from_spawn(&engine.binary_path, err))?;
        let pid = child.id();
        debug!(port, ?pid, "spawned mock engine");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::engine_start("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarnessError::engine_start("failed to capture stderr"))?;

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        spawn_log_reader(stdout, LogStream::Stdout, log_tx.clone());
        spawn_log_reader(stderr, LogStream::Stderr, log_tx);
        spawn_log_collector(
            log_rx,
            Arc::clone(&self.inner.log_buffer),
            verbose,
            log_file,
            port,
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            kill_rx,
            exit_tx,
            Arc::downgrade(&self.inner),
            port,
        ));
        self.attach_process(ProcessHandle {
            pid,
            kill_tx,
            exited: exit_rx.clone(),
        })?;

        let url = format!("http://localhost:{port}{}", engine.health_path);
        let wait =
            health::wait_until_ready(&url, engine.probe_timeout, engine.poll_interval, exit_rx);
        let readiness = match engine.startup_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| HarnessError::StartupTimeout(limit))??,
            None => wait.await?,
        };

        match readiness {
            Readiness::Ready => {
                self.mark_ready()?;
                info!(port, ?pid, "mock engine is ready");
                Ok(())
            }
            Readiness::Exited(status) => Err(HarnessError::StartupFailed {
                port,
                status,
                advice: self.debug_advice(),
            }),
            Readiness::Lost => Err(HarnessError::engine_start(format!(
                "lost track of mock engine process on port {port}{}",
                self.debug_advice()
            ))),
        }
    }

    fn resolve_port(&self) -> HarnessResult<u16> {
        if let Some(port) = self.port() {
            return Ok(port);
        }
        let assigned = assign_free_port()?;
        let port = *self.inner.port.get_or_init(|| assigned);
        if self.is_verbose() {
            debug!(port, "assigned free port");
        }
        Ok(port)
    }

    fn build_args(&self, engine: &EngineConfig, port: u16, local_config: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "up".to_string(),
            self.inner.config_dir.display().to_string(),
            format!("--port={port}"),
            "--auto-restart=false".to_string(),
        ];
        if let Some(path) = local_config {
            if self.is_verbose() {
                debug!(path = %path.display(), "using project configuration");
            }
            args.push(format!("--config={}", path.display()));
        }
        args.extend(engine.extra_args.iter().cloned());
        args
    }

    fn open_log_file(&self) -> HarnessResult<tokio::fs::File> {
        let (file, path) = tempfile::Builder::new()
            .prefix("imposter")
            .suffix(".log")
            .tempfile()?
            .keep()
            .map_err(|err| err.error)?;
        debug!(path = %path.display(), "logging mock engine output to file");
        if self.inner.log_file.set(path).is_err() {
            debug!("log file already assigned; keeping the first one");
        }
        Ok(tokio::fs::File::from_std(file))
    }

    fn attach_process(&self, handle: ProcessHandle) -> HarnessResult<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let MockState::Starting(slot @ None) = &mut *state {
            *slot = Some(handle);
            return Ok(());
        }
        drop(state);
        handle.kill(self.port());
        Err(HarnessError::engine_start("mock was stopped while starting"))
    }

    fn mark_ready(&self) -> HarnessResult<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, MockState::Stopped) {
            MockState::Starting(Some(handle)) => {
                *state = MockState::Ready(handle);
                Ok(())
            }
            other => {
                *state = other;
                Err(HarnessError::engine_start("mock was stopped while starting"))
            }
        }
    }

    fn debug_advice(&self) -> String {
        build_debug_advice(
            self.inner.log_to_file.load(Ordering::SeqCst),
            self.is_verbose(),
            self.log_file(),
            &self.inner.context.gate,
        )
    }

    #[cfg(test)]
    pub(crate) fn poison_state(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.state.lock();
            panic!("poisoning mock state");
        })
        .join();
    }
}

/// Hints appended to startup failures, shaped by the installed engine version.
pub(crate) fn build_debug_advice(
    log_to_file: bool,
    verbose: bool,
    log_file: Option<&Path>,
    gate: &VersionGate,
) -> String {
    let mut advice = String::new();
    if log_to_file {
        if let Some(path) = log_file {
            advice.push_str(&format!("\nSee log file: {}", path.display()));
        }
    }
    if !verbose {
        advice.push_str("\nConsider calling .verbose() on your mock for more details.");
    }
    // An unreadable version must not mask the startup failure being reported.
    if let Ok(Some(hint)) = gate.run_if_at_least(FeatureGate::DOCTOR_ADVICE.minimum, || {
        "\nRun 'imposter doctor' to diagnose engine issues."
    }) {
        advice.push_str(hint);
    }
    advice
}

/// Ask the OS for a free port by binding and immediately releasing a listener.
///
/// Another process may grab the port before the engine binds it.
pub fn assign_free_port() -> HarnessResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Whether the engine is known to read `name`.
pub(crate) fn is_recognized_env(name: &str) -> bool {
    name.strip_prefix("IMPOSTER_")
        .is_some_and(|rest| !rest.is_empty())
        || name == "JAVA_TOOL_OPTIONS"
}

fn validate_env(env: &BTreeMap<String, String>) {
    for name in env.keys().filter(|name| !is_recognized_env(name)) {
        warn!(
            name = %name,
            "environment variable does not match IMPOSTER_* or JAVA_TOOL_OPTIONS; the mock engine may ignore it"
        );
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    inner: Weak<MockInner>,
    port: u16,
) {
    // A dropped sender (every handle gone) is treated as a kill request.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(err) = child.start_kill() {
                warn!(port, error = %err, "error stopping mock engine");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            let _ = exit_tx.send(Some(status));
            if let Some(inner) = inner.upgrade() {
                inner.on_exit(status);
            }
        }
        Err(err) => warn!(port, error = %err, "failed to wait for mock engine process"),
    }
}

fn spawn_log_reader<R: AsyncRead + Unpin + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::UnboundedSender<LogLine>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = LogLine {
                stream,
                line: line.trim_end().to_string(),
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Owns the log file for the lifetime of the process output; it is flushed and
/// closed once both pipes are drained.
fn spawn_log_collector(
    mut log_rx: mpsc::UnboundedReceiver<LogLine>,
    buffer: Arc<Mutex<Vec<LogLine>>>,
    verbose: bool,
    mut log_file: Option<tokio::fs::File>,
    port: u16,
) {
    tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            if verbose {
                match line.stream {
                    LogStream::Stdout => debug!(port, "{}", line.line),
                    LogStream::Stderr => warn!(port, "{}", line.line),
                }
            }

            let write_error = match log_file.as_mut() {
                Some(file) => write_log_line(file, &line.line).await.err(),
                None => None,
            };
            if let Some(err) = write_error {
                warn!(port, error = %err, "disabling mock engine log file after write error");
                log_file = None;
            }

            if let Ok(mut guard) = buffer.lock() {
                guard.push(line);
            }
        }

        if let Some(mut file) = log_file {
            let _ = file.flush().await;
        }
    });
}

async fn write_log_line(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}
