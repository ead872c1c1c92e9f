//! Error taxonomy for volume detection and the per-volume workflow.
//!
//! Nothing in here ever escapes a workflow task. The watcher swallows
//! [`EnumerationError`], the runner turns [`WorkflowError`] into a single
//! `Error` event.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four workflow stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Wipe,
    Copy,
    Verify,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wipe => "wipe",
            Self::Copy => "copy",
            Self::Verify => "verify",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to list removable volumes. Transient.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to read mount table {path}: {source}")]
    MountTable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("volume enumeration unavailable: {0}")]
    Unavailable(String),

    #[error("enumeration task failed: {0}")]
    Task(String),
}

/// A single root entry that could not be deleted during wipe.
#[derive(Debug, Error)]
#[error("cannot delete {name}: {source}")]
pub struct WipeEntryError {
    pub name: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("target volume does not exist: {}", .0.display())]
    VolumeMissing(PathBuf),

    #[error("invalid destination file name derived from {}", .0.display())]
    InvalidFileName(PathBuf),

    #[error("device removed while copying to {}: {source}", .target.display())]
    DeviceRemoved {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy to {} failed: {source}", .target.display())]
    Io {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("destination file does not exist: {}", .0.display())]
    DestinationMissing(PathBuf),

    #[error("file size mismatch: source {source_bytes} bytes, destination {target_bytes} bytes")]
    SizeMismatch { source_bytes: u64, target_bytes: u64 },

    #[error("cannot stat {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Terminal failure of one workflow instance.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("volume {volume_id} is no longer mounted")]
    PathResolution {
        volume_id: String,
        #[source]
        source: Option<EnumerationError>,
    },

    #[error("cannot read volume contents at {}: {source}", .path.display())]
    Wipe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("{stage} task aborted: {message}")]
    Task { stage: Stage, message: String },
}

impl WorkflowError {
    /// Stage the error is reported against.
    pub fn stage(&self) -> Stage {
        match self {
            Self::PathResolution { .. } | Self::Wipe { .. } => Stage::Wipe,
            Self::Copy(_) => Stage::Copy,
            Self::Verify(_) => Stage::Verify,
            Self::Task { stage, .. } => *stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_attribution() {
        let err = WorkflowError::PathResolution {
            volume_id: "/dev/sdb1".into(),
            source: None,
        };
        assert_eq!(err.stage(), Stage::Wipe);
        assert_eq!(err.to_string(), "volume /dev/sdb1 is no longer mounted");

        let err = WorkflowError::from(VerifyError::SizeMismatch {
            source_bytes: 10,
            target_bytes: 9,
        });
        assert_eq!(err.stage(), Stage::Verify);
        assert!(err.to_string().contains("source 10 bytes, destination 9 bytes"));

        let err = WorkflowError::Task {
            stage: Stage::Copy,
            message: "panicked".into(),
        };
        assert_eq!(err.stage(), Stage::Copy);
        assert_eq!(err.to_string(), "copy task aborted: panicked");
    }
}
