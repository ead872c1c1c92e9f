pub mod copy;
pub mod error;
pub mod events;
pub mod notifications;
pub mod registry;
pub mod verifier;
pub mod volume;
pub mod watcher;
pub mod wipe;
pub mod workflow;

pub use error::{CopyError, EnumerationError, Stage, VerifyError, WipeEntryError, WorkflowError};
pub use events::{ChannelSink, EventKind, EventSink, FanoutSink, Reporter, TracingSink, WorkflowEvent};
pub use registry::{BatchConfig, BatchJob, ClaimId, ProcessingStatus, VolumeDiff, VolumeRegistry};
pub use verifier::{VerifyResult, verify_copy};
pub use volume::{Volume, VolumeEnumerator, VolumeState};
pub use watcher::{DriveWatcher, PollOutcome};
pub use wipe::WipeReport;
pub use workflow::{WorkflowOutcome, WorkflowRunner};
