use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::error::EnumerationError;
use crate::core::volume::{Volume, VolumeEnumerator};

const SIMULATED_CAPACITY: u64 = 64 * 1024 * 1024 * 1024;

#[derive(Default)]
struct SimulatedState {
    volumes: BTreeMap<String, Volume>,
    failing: bool,
}

type Shared = Arc<Mutex<SimulatedState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for injecting volume insertions, ejections and enumeration
/// failures into a [`SimulatedEnumerator`].
#[derive(Clone)]
pub struct SimulatedController {
    state: Shared,
}

impl SimulatedController {
    /// Attach a volume whose contents live in `mount_path`.
    pub fn insert(&self, volume_id: &str, mount_path: impl Into<PathBuf>) {
        self.insert_volume(Volume {
            id: volume_id.to_string(),
            mount_path: mount_path.into(),
            filesystem: "vfat".to_string(),
            total_bytes: SIMULATED_CAPACITY,
            free_bytes: SIMULATED_CAPACITY,
            used_bytes: 0,
        });
    }

    pub fn insert_volume(&self, volume: Volume) {
        lock(&self.state).volumes.insert(volume.id.clone(), volume);
    }

    /// Detach a volume. Returns false if it was not attached.
    pub fn eject(&self, volume_id: &str) -> bool {
        lock(&self.state).volumes.remove(volume_id).is_some()
    }

    /// Make every enumeration fail until reset.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }
}

/// In-memory enumerator backed by real directories.
pub struct SimulatedEnumerator {
    state: Shared,
}

impl SimulatedEnumerator {
    pub fn new() -> (Self, SimulatedController) {
        let state: Shared = Arc::default();
        (
            Self {
                state: state.clone(),
            },
            SimulatedController { state },
        )
    }
}

impl VolumeEnumerator for SimulatedEnumerator {
    fn enumerate(&self) -> Result<Vec<Volume>, EnumerationError> {
        let state = lock(&self.state);
        if state.failing {
            return Err(EnumerationError::Unavailable(
                "simulated enumeration failure".to_string(),
            ));
        }

        // A volume whose backing directory is gone cannot be statted
        Ok(state
            .volumes
            .values()
            .filter(|v| v.mount_path.is_dir())
            .cloned()
            .collect())
    }
}
