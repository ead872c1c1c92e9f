//! Best-effort removal of everything at a volume's mount root.
//!
//! Individual entries may refuse to go away (permissions, files in use).
//! Those are collected and reported as warnings; the stage only fails when
//! the mount root itself cannot be read.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::error::{Stage, WipeEntryError, WorkflowError};
use super::events::Reporter;

/// How many names per category are listed in the scan summary.
pub const MAX_DISPLAY_ITEMS: usize = 5;

/// How many leftover names are listed after deletion.
const MAX_LEFTOVER_ITEMS: usize = 3;

/// Outcome of a wipe that could at least read the mount root.
#[derive(Debug, Default)]
pub struct WipeReport {
    /// The root had no entries; nothing was deleted.
    pub already_empty: bool,
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub deleted: usize,
    pub failures: Vec<WipeEntryError>,
    /// Names still present on the final re-listing.
    pub remaining: Vec<String>,
}

impl WipeReport {
    pub fn total(&self) -> usize {
        self.files.len() + self.directories.len()
    }

    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

struct RootEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Wipe the volume mounted at `mount` on the blocking pool.
pub async fn wipe_volume(mount: &Path, reporter: Reporter) -> Result<WipeReport, WorkflowError> {
    let mount = mount.to_path_buf();

    tokio::task::spawn_blocking(move || wipe_volume_sync(&mount, &reporter))
        .await
        .map_err(|e| WorkflowError::Task {
            stage: Stage::Wipe,
            message: e.to_string(),
        })?
}

/// Blocking wipe. Emits summary, per-entry and leftover events via `reporter`.
pub fn wipe_volume_sync(mount: &Path, reporter: &Reporter) -> Result<WipeReport, WorkflowError> {
    let read_error = |source: io::Error| WorkflowError::Wipe {
        path: mount.to_path_buf(),
        source,
    };

    if !mount.exists() {
        return Err(read_error(io::Error::new(
            ErrorKind::NotFound,
            "volume path does not exist",
        )));
    }

    let entries = list_entries(mount).map_err(read_error)?;

    if entries.is_empty() {
        debug!(mount = %mount.display(), "Volume already empty");
        reporter.info(format!("volume {} is already empty", mount.display()));
        return Ok(WipeReport {
            already_empty: true,
            ..Default::default()
        });
    }

    let mut report = WipeReport::default();
    for entry in &entries {
        if entry.is_dir {
            report.directories.push(entry.name.clone());
        } else {
            report.files.push(entry.name.clone());
        }
    }

    info!(
        mount = %mount.display(),
        files = report.files.len(),
        directories = report.directories.len(),
        "Scan complete"
    );
    reporter.info(format!(
        "scan complete: found {} files, {} directories ({} items)",
        report.files.len(),
        report.directories.len(),
        report.total()
    ));
    if !report.files.is_empty() {
        reporter.info(format_entry_list("files", &report.files));
    }
    if !report.directories.is_empty() {
        reporter.info(format_entry_list("directories", &report.directories));
    }
    reporter.info("starting cleanup");

    for entry in entries {
        match delete_entry(&entry) {
            Ok(()) => {
                report.deleted += 1;
                let what = if entry.is_dir { "directory" } else { "file" };
                reporter.info(format!("deleted {}: {}", what, entry.name));
            }
            Err(source) => {
                let failure = WipeEntryError {
                    name: entry.name,
                    source,
                };
                warn!(mount = %mount.display(), error = %failure, "Failed to delete entry");
                reporter.warning(failure.to_string());
                report.failures.push(failure);
            }
        }
    }

    report.remaining = check_remaining(mount);
    if !report.remaining.is_empty() {
        reporter.warning(format_leftovers(&report.remaining));
    }

    let mut summary = format!(
        "cleanup complete: deleted {}/{} entries",
        report.deleted,
        report.total()
    );
    if !report.failures.is_empty() {
        summary.push_str(&format!(", {} failed", report.failures.len()));
    }
    reporter.info(summary);

    Ok(report)
}

fn list_entries(mount: &Path) -> io::Result<Vec<RootEntry>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(mount)? {
        let entry = entry?;
        let path = entry.path();
        // Do not follow symlinks: a link to a directory is removed as a link.
        let is_dir = path
            .symlink_metadata()
            .map(|m| m.is_dir())
            .unwrap_or(false);

        entries.push(RootEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn delete_entry(entry: &RootEntry) -> io::Result<()> {
    if entry.is_dir {
        fs::remove_dir_all(&entry.path)
    } else {
        fs::remove_file(&entry.path)
    }
}

/// Re-list the root after deletion. An unreadable root counts as clean here;
/// the read already succeeded once and the copy stage will surface real I/O
/// problems.
fn check_remaining(mount: &Path) -> Vec<String> {
    match list_entries(mount) {
        Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
        Err(e) => {
            debug!(mount = %mount.display(), error = %e, "Could not re-list volume root");
            Vec::new()
        }
    }
}

/// `"files: a, b, c"`, truncated to [`MAX_DISPLAY_ITEMS`] names.
pub fn format_entry_list(label: &str, names: &[String]) -> String {
    if names.len() <= MAX_DISPLAY_ITEMS {
        return format!("{}: {}", label, names.join(", "));
    }

    format!(
        "{}: {} ... (and {} more)",
        label,
        names[..MAX_DISPLAY_ITEMS].join(", "),
        names.len() - MAX_DISPLAY_ITEMS
    )
}

fn format_leftovers(remaining: &[String]) -> String {
    let shown = remaining
        .iter()
        .take(MAX_LEFTOVER_ITEMS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let ellipsis = if remaining.len() > MAX_LEFTOVER_ITEMS {
        "..."
    } else {
        ""
    };

    format!(
        "{} entries could not be removed: {}{}",
        remaining.len(),
        shown,
        ellipsis
    )
}
