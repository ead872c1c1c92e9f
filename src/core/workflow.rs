//! Per-volume batch workflow: wipe, copy, verify, finalize.
//!
//! Each instance owns exactly one volume identifier. Stages run strictly in
//! order; the first failure ends the instance with a single `Error` event.
//! Whatever the outcome, the instance releases its own processing entry when
//! it ends; an entry re-claimed by a newer instance is left alone.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::copy::{CopyRequest, copy_to_volume};
use super::error::{Stage, WorkflowError};
use super::events::{EventKind, EventSink, Reporter};
use super::registry::{BatchJob, VolumeRegistry};
use super::verifier::verify_on_volume;
use super::volume::VolumeEnumerator;
use super::wipe::wipe_volume;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    Failed { stage: Stage, error: String },
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Clone)]
pub struct WorkflowRunner {
    registry: VolumeRegistry,
    enumerator: Arc<dyn VolumeEnumerator>,
    sink: Arc<dyn EventSink>,
}

impl WorkflowRunner {
    pub fn new(
        registry: VolumeRegistry,
        enumerator: Arc<dyn VolumeEnumerator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            enumerator,
            sink,
        }
    }

    /// Run the workflow for a volume already placed in the processing set.
    pub async fn run(&self, volume_id: String, job: BatchJob) -> WorkflowOutcome {
        let run_id = Uuid::now_v7();
        let span = info_span!("workflow", volume = %volume_id, run_id = %run_id);

        async {
            let reporter = Reporter::new(volume_id.clone(), self.sink.clone());
            reporter.emit(EventKind::Start, "processing started");
            info!(source = %job.source_file.display(), "Workflow started");

            let outcome = match self.execute(&reporter, &job).await {
                Ok(()) => {
                    info!("Workflow complete");
                    WorkflowOutcome::Completed
                }
                Err(e) => {
                    let stage = e.stage();
                    warn!(stage = %stage, error = %e, "Workflow failed");
                    reporter.emit(EventKind::Error, format!("{} failed: {}", stage, e));
                    WorkflowOutcome::Failed {
                        stage,
                        error: e.to_string(),
                    }
                }
            };

            self.registry.remove_processing(&volume_id, job.claim);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, reporter: &Reporter, job: &BatchJob) -> Result<(), WorkflowError> {
        let volume_id = reporter.volume_id().to_string();

        // Wipe
        let mount = self.resolve_mount(&volume_id).await?;
        reporter.progress("scanning volume contents");
        wipe_volume(&mount, reporter.clone()).await?;
        reporter.progress("clean, ready to copy");

        // Copy
        let request = CopyRequest {
            source: job.source_file.clone(),
            volume_root: mount,
            dest_filename: job.dest_filename.clone(),
        };
        let filename = request.destination_filename()?;
        let source_mb = tokio::fs::metadata(&request.source)
            .await
            .map(|m| m.len() as f64 / BYTES_PER_MB)
            .unwrap_or(0.0);
        reporter.progress(format!("copying {} ({:.1} MB)", filename, source_mb));
        let copied = copy_to_volume(&request).await?;
        reporter.progress(format!("copy complete: {}", filename));

        // Verify
        reporter.progress("verifying file integrity");
        let verified = verify_on_volume(&request.source, &copied.target).await?;
        reporter.info(format!(
            "verified: file size {:.1} MB, integrity confirmed",
            verified.bytes_verified as f64 / BYTES_PER_MB
        ));

        // Finalize
        if !self.registry.complete(&volume_id, job.claim) {
            debug!("Processing entry now belongs to a newer workflow");
        }
        reporter.emit(
            EventKind::Complete,
            format!(
                "processing complete, please safely eject {} manually",
                volume_id
            ),
        );

        Ok(())
    }

    async fn resolve_mount(&self, volume_id: &str) -> Result<PathBuf, WorkflowError> {
        let enumerator = self.enumerator.clone();
        let id = volume_id.to_string();

        let resolved = tokio::task::spawn_blocking(move || enumerator.mount_path(&id))
            .await
            .map_err(|e| WorkflowError::Task {
                stage: Stage::Wipe,
                message: e.to_string(),
            })?;

        match resolved {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(WorkflowError::PathResolution {
                volume_id: volume_id.to_string(),
                source: None,
            }),
            Err(e) => Err(WorkflowError::PathResolution {
                volume_id: volume_id.to_string(),
                source: Some(e),
            }),
        }
    }
}
