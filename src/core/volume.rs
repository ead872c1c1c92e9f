use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::EnumerationError;

/// Snapshot of one removable volume, produced fresh on every enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Platform-stable device handle, e.g. `/dev/sdb1`.
    pub id: String,
    pub mount_path: PathBuf,
    pub filesystem: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

/// Lifecycle state of a volume identifier, derived from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Unknown,
    Idle,
    Processing,
    Completed,
}

pub trait VolumeEnumerator: Send + Sync {
    /// List the removable volumes currently mounted.
    ///
    /// Volumes that cannot be statted are left out rather than reported.
    /// NOTE: This performs blocking I/O and should be called from a blocking
    /// context (e.g., via spawn_blocking).
    fn enumerate(&self) -> Result<Vec<Volume>, EnumerationError>;

    /// Resolve an identifier to its current mount path.
    fn mount_path(&self, volume_id: &str) -> Result<Option<PathBuf>, EnumerationError> {
        Ok(self
            .enumerate()?
            .into_iter()
            .find(|v| v.id == volume_id)
            .map(|v| v.mount_path))
    }
}
