use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use super::error::{CopyError, Stage, WorkflowError};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: PathBuf,
    /// Mount root of the target volume.
    pub volume_root: PathBuf,
    /// File name on the volume; the source's file name when `None`.
    pub dest_filename: Option<String>,
}

impl CopyRequest {
    /// Name the copy will have on the volume.
    pub fn destination_filename(&self) -> Result<String, CopyError> {
        if let Some(name) = &self.dest_filename {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(CopyError::InvalidFileName(PathBuf::from(name)));
            }
            return Ok(name.clone());
        }

        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CopyError::InvalidFileName(self.source.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct CopyResult {
    pub target: PathBuf,
    pub bytes_copied: u64,
    pub duration_secs: u64,
}

/// Copy the source file onto the volume on the blocking pool.
pub async fn copy_to_volume(req: &CopyRequest) -> Result<CopyResult, WorkflowError> {
    let req = req.clone();

    let result = tokio::task::spawn_blocking(move || copy_to_volume_sync(&req))
        .await
        .map_err(|e| WorkflowError::Task {
            stage: Stage::Copy,
            message: e.to_string(),
        })?;

    Ok(result?)
}

pub fn copy_to_volume_sync(req: &CopyRequest) -> Result<CopyResult, CopyError> {
    if !req.source.is_file() {
        return Err(CopyError::SourceMissing(req.source.clone()));
    }
    if !req.volume_root.is_dir() {
        return Err(CopyError::VolumeMissing(req.volume_root.clone()));
    }

    let target = req.volume_root.join(req.destination_filename()?);
    let start_time = Instant::now();

    let bytes_copied = copy_preserving(&req.source, &target, true).map_err(|source| {
        if is_device_removed_error(&source) {
            CopyError::DeviceRemoved {
                target: target.clone(),
                source,
            }
        } else {
            CopyError::Io {
                target: target.clone(),
                source,
            }
        }
    })?;

    let duration_secs = start_time.elapsed().as_secs();
    info!(
        source = %req.source.display(),
        target = %target.display(),
        bytes = bytes_copied,
        duration_secs,
        "Copy complete"
    );

    Ok(CopyResult {
        target,
        bytes_copied,
        duration_secs,
    })
}

/// Byte-for-byte copy that keeps permissions and timestamps, overwriting any
/// existing destination.
pub fn copy_preserving(source: &Path, dest: &Path, sync_file: bool) -> io::Result<u64> {
    let source_metadata = fs::metadata(source)?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(dest)?);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        writer.write_all(&buffer[..bytes_read])?;
        bytes_written += bytes_read as u64;
    }

    writer.flush()?;

    if sync_file {
        let inner = writer.into_inner().map_err(|e| e.into_error())?;
        inner.sync_all()?;
    }

    // FAT-family volumes reject most permission bits; not worth failing over
    if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
        debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
    }

    let atime = filetime::FileTime::from_last_access_time(&source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);
    if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes_written)
}

/// Check if an I/O error indicates the device has been removed
pub fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::NotFound => true,
        ErrorKind::PermissionDenied => false,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => true,
        _ => {
            #[cfg(target_os = "linux")]
            if let Some(os_error) = error.raw_os_error() {
                return matches!(
                    os_error,
                    libc::EIO | libc::ENODEV | libc::ENXIO | libc::ENOMEDIUM | libc::EMEDIUMTYPE
                );
            }
            false
        }
    }
}
