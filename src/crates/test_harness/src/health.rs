use std::process::ExitStatus;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::error::HarnessResult;

/// Outcome of waiting for the engine's status endpoint.
#[derive(Debug)]
pub(crate) enum Readiness {
    Ready,
    Exited(ExitStatus),
    /// The supervisor stopped without reporting an exit status.
    Lost,
}

/// Issue a single readiness probe. Any failure counts as "not ready yet".
pub(crate) async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) if resp.status() == StatusCode::OK => true,
        Ok(resp) => {
            trace!(url, status = %resp.status(), "status endpoint not ready");
            false
        }
        Err(err) => {
            trace!(url, error = %err, "status probe failed");
            false
        }
    }
}

/// Poll `url` until it answers 200 or the process reports an exit status.
///
/// The exit channel is checked before every probe and raced against every
/// backoff delay, so a dead process ends the wait immediately.
pub(crate) async fn wait_until_ready(
    url: &str,
    probe_timeout: Duration,
    interval: Duration,
    mut exited: watch::Receiver<Option<ExitStatus>>,
) -> HarnessResult<Readiness> {
    let client = reqwest::Client::builder()
        .timeout(probe_timeout)
        .no_proxy()
        .build()?;

    debug!(url, "waiting for mock engine status endpoint");
    let mut attempts: u64 = 0;
    loop {
        if let Some(status) = *exited.borrow_and_update() {
            return Ok(Readiness::Exited(status));
        }

        attempts += 1;
        if probe(&client, url).await {
            debug!(url, attempts, "mock engine is up");
            return Ok(Readiness::Ready);
        }

        let supervised = tokio::select! {
            _ = sleep(interval) => true,
            changed = exited.changed() => changed.is_ok(),
        };
        if !supervised && exited.borrow().is_none() {
            return Ok(Readiness::Lost);
        }
    }
}
