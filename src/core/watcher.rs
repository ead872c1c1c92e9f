//! Polling drive watcher.
//!
//! Enumerates removable volumes at a fixed interval, diffs the result against
//! the registry's known set and reports insertions and removals. When batch
//! mode is armed, every newly inserted volume gets its own workflow task.
//!
//! ## Lifecycle
//!
//! `start()` primes the known set (volumes attached at startup are not treated
//! as inserted) and spawns the loop. `stop()` cancels the loop and waits for it
//! with a bounded timeout. Workflow tasks are never cancelled by either.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::EnumerationError;
use super::events::{EventKind, EventSink, WorkflowEvent};
use super::registry::{VolumeDiff, VolumeRegistry};
use super::volume::VolumeEnumerator;
use super::workflow::{WorkflowOutcome, WorkflowRunner};
use crate::logging::LogThrottle;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default wait for the loop to exit on stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one poll cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub diff: VolumeDiff,
    /// Workflow tasks spawned for inserted volumes, keyed by identifier.
    pub workflows: Vec<(String, JoinHandle<WorkflowOutcome>)>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct DriveWatcher {
    registry: VolumeRegistry,
    enumerator: Arc<dyn VolumeEnumerator>,
    sink: Arc<dyn EventSink>,
    runner: WorkflowRunner,
    poll_interval: Duration,
    stop_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl DriveWatcher {
    pub fn new(
        registry: VolumeRegistry,
        enumerator: Arc<dyn VolumeEnumerator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let runner = WorkflowRunner::new(registry.clone(), enumerator.clone(), sink.clone());
        Self {
            registry,
            enumerator,
            sink,
            runner,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            running: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Record the volumes currently attached without reporting them.
    pub async fn prime(&self) -> Result<usize, EnumerationError> {
        let current = self.enumerate_ids().await?;
        let count = current.len();
        self.registry.replace_known(current);
        Ok(count)
    }

    /// Prime the known set and spawn the poll loop. No-op if already running.
    ///
    /// The running slot stays locked from the liveness check to the store, so
    /// concurrent callers spawn at most one loop.
    pub async fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }

        match self.prime().await {
            Ok(count) => info!(volumes = count, "Initial removable volumes recorded"),
            Err(e) => warn!(error = %e, "Initial enumeration failed"),
        }

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let watcher = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { watcher.run_loop(token).await });
        *running = Some(Running { cancel, handle });
        drop(running);

        info!(interval_ms = self.poll_interval.as_millis() as u64, "Drive watcher started");
    }

    /// Stop polling. In-flight workflows keep running.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(Running { cancel, handle }) = running else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(_) => info!("Drive watcher stopped"),
            Err(_) => warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Drive watcher did not exit in time"
            ),
        }
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let throttle = LogThrottle::new(Duration::from_secs(60));

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                Ok(outcome) => {
                    if !outcome.diff.is_empty() {
                        debug!(
                            inserted = outcome.diff.inserted.len(),
                            removed = outcome.diff.removed.len(),
                            workflows = outcome.workflows.len(),
                            "Volume set changed"
                        );
                    }
                    throttle.reset();
                }
                Err(e) => {
                    if let Some(suppressed) = throttle.check() {
                        warn!(error = %e, suppressed, "Poll cycle failed, retrying next interval");
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("Poll loop exited");
    }

    /// Run exactly one poll cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome, EnumerationError> {
        let current = self.enumerate_ids().await?;
        let diff = self.registry.replace_known(current);

        if diff.is_empty() {
            return Ok(PollOutcome::default());
        }

        for id in &diff.removed {
            info!(volume = %id, "Volume removed");
            self.sink
                .notify(WorkflowEvent::new(EventKind::Removed, id.clone(), "volume removed"));
        }
        for id in &diff.inserted {
            info!(volume = %id, "Volume inserted");
            self.sink.notify(WorkflowEvent::new(
                EventKind::Inserted,
                id.clone(),
                "volume inserted",
            ));
        }

        let mut workflows = Vec::new();
        for id in &diff.inserted {
            let Some(job) = self.registry.claim_for_batch(id) else {
                continue;
            };

            let runner = self.runner.clone();
            let volume_id = id.clone();
            let handle = tokio::spawn(async move { runner.run(volume_id, job).await });
            workflows.push((id.clone(), handle));
        }

        Ok(PollOutcome { diff, workflows })
    }

    async fn enumerate_ids(&self) -> Result<BTreeSet<String>, EnumerationError> {
        let enumerator = self.enumerator.clone();

        let volumes = tokio::task::spawn_blocking(move || enumerator.enumerate())
            .await
            .map_err(|e| EnumerationError::Task(e.to_string()))??;

        Ok(volumes.into_iter().map(|v| v.id).collect())
    }
}
