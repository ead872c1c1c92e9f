use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::{Stage, VerifyError, WorkflowError};

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub bytes_verified: u64,
}

/// Check that `target` exists and has exactly the byte length of `source`.
///
/// Size-only: a corrupted copy of matching length passes.
pub fn verify_copy(source: &Path, target: &Path) -> Result<VerifyResult, VerifyError> {
    let target_bytes = match fs::metadata(target) {
        Ok(m) if m.is_file() => m.len(),
        Ok(_) => return Err(VerifyError::DestinationMissing(target.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(VerifyError::DestinationMissing(target.to_path_buf()));
        }
        Err(e) => {
            return Err(VerifyError::Io {
                path: target.to_path_buf(),
                source: e,
            });
        }
    };

    let source_bytes = fs::metadata(source)
        .map_err(|e| VerifyError::Io {
            path: source.to_path_buf(),
            source: e,
        })?
        .len();

    if source_bytes != target_bytes {
        debug!(
            source = %source.display(),
            target = %target.display(),
            source_bytes,
            target_bytes,
            "Size mismatch"
        );
        return Err(VerifyError::SizeMismatch {
            source_bytes,
            target_bytes,
        });
    }

    info!(target = %target.display(), bytes = target_bytes, "Verification complete");
    Ok(VerifyResult {
        bytes_verified: target_bytes,
    })
}

/// [`verify_copy`] on the blocking pool.
pub async fn verify_on_volume(source: &Path, target: &Path) -> Result<VerifyResult, WorkflowError> {
    let source: PathBuf = source.to_path_buf();
    let target: PathBuf = target.to_path_buf();

    let result = tokio::task::spawn_blocking(move || verify_copy(&source, &target))
        .await
        .map_err(|e| WorkflowError::Task {
            stage: Stage::Verify,
            message: e.to_string(),
        })?;

    Ok(result?)
}
