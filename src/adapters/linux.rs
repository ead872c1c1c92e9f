//! Removable volume enumeration for Linux.
//!
//! Mounted block devices come from the mount table. A device counts as
//! removable when its sysfs `removable` attribute (or its parent disk's) is
//! set; card readers and some USB bridges report 0 there, so udev's bus and
//! flash-media properties serve as a fallback probe.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use tracing::{debug, trace};

use crate::core::error::EnumerationError;
use crate::core::volume::{Volume, VolumeEnumerator};

#[derive(Debug, Clone)]
pub struct LinuxEnumeratorConfig {
    pub mounts_path: PathBuf,
    pub sysfs_block: PathBuf,
    /// Consult udev when sysfs does not flag a device as removable.
    pub use_udev: bool,
}

impl Default for LinuxEnumeratorConfig {
    fn default() -> Self {
        Self {
            mounts_path: PathBuf::from("/proc/self/mounts"),
            sysfs_block: PathBuf::from("/sys/class/block"),
            use_udev: true,
        }
    }
}

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: String,
    pub options: Vec<String>,
}

pub struct LinuxEnumerator {
    config: LinuxEnumeratorConfig,
}

impl LinuxEnumerator {
    pub fn new(config: LinuxEnumeratorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(LinuxEnumeratorConfig::default())
    }

    fn is_removable(&self, entry: &MountEntry) -> bool {
        let name = block_name(&entry.device);
        if self.sysfs_removable(&name) == Some(true) {
            return true;
        }

        self.config.use_udev && udev_removable(&name)
    }

    /// Read `removable` for the block device, falling back to the parent disk
    /// for partitions.
    fn sysfs_removable(&self, name: &str) -> Option<bool> {
        let dev_dir = fs::canonicalize(self.config.sysfs_block.join(name)).ok()?;

        let flag = match fs::read_to_string(dev_dir.join("removable")) {
            Ok(flag) => flag,
            Err(_) if dev_dir.join("partition").exists() => {
                fs::read_to_string(dev_dir.parent()?.join("removable")).ok()?
            }
            Err(_) => return None,
        };

        Some(flag.trim() == "1")
    }
}

impl VolumeEnumerator for LinuxEnumerator {
    fn enumerate(&self) -> Result<Vec<Volume>, EnumerationError> {
        let table = fs::read_to_string(&self.config.mounts_path).map_err(|source| {
            EnumerationError::MountTable {
                path: self.config.mounts_path.clone(),
                source,
            }
        })?;

        let mut seen = HashSet::new();
        let mut volumes = Vec::new();

        for entry in parse_mount_table(&table) {
            if !entry.device.starts_with("/dev/") {
                continue;
            }
            // Bind mounts repeat the device; the first mount point wins
            if !seen.insert(entry.device.clone()) {
                continue;
            }
            if !self.is_removable(&entry) {
                trace!(device = %entry.device, "Skipping non-removable device");
                continue;
            }

            match capacity(&entry.mount_point) {
                Ok((total_bytes, free_bytes, used_bytes)) => volumes.push(Volume {
                    id: entry.device,
                    mount_path: entry.mount_point,
                    filesystem: entry.fstype,
                    total_bytes,
                    free_bytes,
                    used_bytes,
                }),
                Err(e) => {
                    debug!(
                        device = %entry.device,
                        mount = %entry.mount_point.display(),
                        error = %e,
                        "Skipping volume that cannot be statted"
                    );
                }
            }
        }

        Ok(volumes)
    }
}

/// Parse `/proc/mounts` format. Malformed lines are skipped.
pub fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            let options = fields.next().unwrap_or_default();

            Some(MountEntry {
                device: unescape_mount_field(device),
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fstype: fstype.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Decode the kernel's octal escapes (`\040` for space and friends).
pub fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Kernel name of the block device behind a `/dev` path, resolving
/// `/dev/disk/by-*` and mapper symlinks.
fn block_name(device: &str) -> String {
    let path = fs::canonicalize(device).unwrap_or_else(|_| PathBuf::from(device));
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.to_string())
}

fn udev_removable(name: &str) -> bool {
    let Ok(device) = udev::Device::from_subsystem_sysname("block".to_string(), name.to_string())
    else {
        return false;
    };

    if device
        .property_value("ID_BUS")
        .is_some_and(|bus| bus == "usb" || bus == "mmc")
    {
        return true;
    }

    device.properties().any(|p| {
        let key = p.name().to_string_lossy();
        (key.starts_with("ID_DRIVE_FLASH") || key.starts_with("ID_DRIVE_MEDIA_FLASH"))
            && p.value() == "1"
    })
}

fn capacity(mount_point: &Path) -> nix::Result<(u64, u64, u64)> {
    let stat = statvfs(mount_point)?;
    let fragment = stat.fragment_size() as u64;
    let blocks = stat.blocks() as u64;

    let total = blocks * fragment;
    let free = stat.blocks_available() as u64 * fragment;
    let used = blocks.saturating_sub(stat.blocks_free() as u64) * fragment;

    Ok((total, free, used))
}
