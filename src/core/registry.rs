//! Shared bookkeeping for known, processing and completed volumes.
//!
//! The three identifier sets and the batch configuration live behind one
//! mutex and are only reachable through compound operations, so the watcher
//! and any number of workflow tasks can never interleave a read-modify-write.
//! The lock is never held across an await point or any I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::volume::VolumeState;

/// Batch-mode arming, set by an external caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub enabled: bool,
    pub source_file: Option<PathBuf>,
    /// Name of the copy on the volume. Defaults to the source's file name.
    #[serde(default)]
    pub dest_filename: Option<String>,
}

impl BatchConfig {
    pub fn armed(source_file: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            source_file: Some(source_file.into()),
            dest_filename: None,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Token identifying one workflow's hold on a processing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(u64);

/// Immutable copy of the batch parameters taken when a workflow is queued,
/// plus the claim the workflow releases when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub source_file: PathBuf,
    pub dest_filename: Option<String>,
    pub claim: ClaimId,
}

/// Identifiers that appeared and disappeared between two polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeDiff {
    pub inserted: Vec<String>,
    pub removed: Vec<String>,
}

impl VolumeDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Point-in-time view of the registry, for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub processing: usize,
    pub completed: usize,
    pub processing_volumes: Vec<String>,
    pub completed_volumes: Vec<String>,
    pub known_volumes: Vec<String>,
    pub batch: BatchConfig,
}

#[derive(Default)]
struct RegistryState {
    known: BTreeSet<String>,
    /// Processing set, keyed by identifier, holding the owning claim.
    processing: BTreeMap<String, ClaimId>,
    completed: BTreeSet<String>,
    batch: BatchConfig,
    next_claim: u64,
}

impl RegistryState {
    fn add_if_absent_from_both(&mut self, volume_id: &str) -> Option<ClaimId> {
        if self.processing.contains_key(volume_id) || self.completed.contains(volume_id) {
            return None;
        }
        self.next_claim += 1;
        let claim = ClaimId(self.next_claim);
        self.processing.insert(volume_id.to_string(), claim);
        Some(claim)
    }

    fn owns(&self, volume_id: &str, claim: ClaimId) -> bool {
        self.processing.get(volume_id) == Some(&claim)
    }
}

/// Thread-safe registry, cheap to clone and share between tasks.
#[derive(Clone, Default)]
pub struct VolumeRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every operation leaves the state consistent, so a panic elsewhere
        // while holding the guard cannot corrupt it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Diff `current` against the known set and replace it, in one step.
    pub fn replace_known<I>(&self, current: I) -> VolumeDiff
    where
        I: IntoIterator<Item = String>,
    {
        let current: BTreeSet<String> = current.into_iter().collect();
        let mut state = self.lock();

        let diff = VolumeDiff {
            inserted: current.difference(&state.known).cloned().collect(),
            removed: state.known.difference(&current).cloned().collect(),
        };
        state.known = current;
        diff
    }

    /// Add to the processing set unless already processing or completed.
    /// The returned claim is needed to release the entry again.
    pub fn add_if_absent_from_both(&self, volume_id: &str) -> Option<ClaimId> {
        self.lock().add_if_absent_from_both(volume_id)
    }

    /// Queue a volume for the batch workflow.
    ///
    /// Returns the job only when batch mode is armed with a source file and the
    /// volume was absent from both the processing and completed sets. The check
    /// and the insertion happen under one lock.
    pub fn claim_for_batch(&self, volume_id: &str) -> Option<BatchJob> {
        let mut state = self.lock();
        if !state.batch.enabled {
            return None;
        }
        let source_file = state.batch.source_file.clone()?;
        let dest_filename = state.batch.dest_filename.clone();
        let claim = state.add_if_absent_from_both(volume_id)?;

        Some(BatchJob {
            source_file,
            dest_filename,
            claim,
        })
    }

    /// Release a processing entry. No-op unless `claim` still owns it.
    pub fn remove_processing(&self, volume_id: &str, claim: ClaimId) -> bool {
        let mut state = self.lock();
        if !state.owns(volume_id, claim) {
            return false;
        }
        state.processing.remove(volume_id).is_some()
    }

    pub fn add_completed(&self, volume_id: &str) -> bool {
        self.lock().completed.insert(volume_id.to_string())
    }

    /// Move a volume from processing to completed.
    ///
    /// An entry cleared by disarming still lands in completed. An entry now
    /// owned by a newer claim is left alone, so the sets stay disjoint.
    pub fn complete(&self, volume_id: &str, claim: ClaimId) -> bool {
        let mut state = self.lock();
        match state.processing.get(volume_id) {
            Some(owner) if *owner != claim => return false,
            Some(_) => {
                state.processing.remove(volume_id);
            }
            None => {}
        }
        state.completed.insert(volume_id.to_string());
        true
    }

    pub fn reset_processing_and_completed(&self) {
        let mut state = self.lock();
        state.processing.clear();
        state.completed.clear();
    }

    /// Replace the batch configuration. Disarming clears the processing and
    /// completed sets; workflows already running are left alone.
    pub fn set_batch(&self, config: BatchConfig) {
        let mut state = self.lock();
        if !config.enabled {
            state.processing.clear();
            state.completed.clear();
        }
        state.batch = config;
    }

    pub fn batch(&self) -> BatchConfig {
        self.lock().batch.clone()
    }

    pub fn state_of(&self, volume_id: &str) -> VolumeState {
        let state = self.lock();
        if state.processing.contains_key(volume_id) {
            VolumeState::Processing
        } else if state.completed.contains(volume_id) {
            VolumeState::Completed
        } else if state.known.contains(volume_id) {
            VolumeState::Idle
        } else {
            VolumeState::Unknown
        }
    }

    pub fn is_processing(&self, volume_id: &str) -> bool {
        self.lock().processing.contains_key(volume_id)
    }

    pub fn is_completed(&self, volume_id: &str) -> bool {
        self.lock().completed.contains(volume_id)
    }

    pub fn known(&self) -> Vec<String> {
        self.lock().known.iter().cloned().collect()
    }

    pub fn status(&self) -> ProcessingStatus {
        let state = self.lock();
        ProcessingStatus {
            processing: state.processing.len(),
            completed: state.completed.len(),
            processing_volumes: state.processing.keys().cloned().collect(),
            completed_volumes: state.completed.iter().cloned().collect(),
            known_volumes: state.known.iter().cloned().collect(),
            batch: state.batch.clone(),
        }
    }
}
