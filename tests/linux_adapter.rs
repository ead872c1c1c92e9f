//! Linux enumerator tests against a fake mount table and sysfs tree.
//!
//! No root or real block devices needed: device names that do not exist under
//! /dev fall back to their file name for the sysfs lookup.

#![cfg(target_os = "linux")]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use mediad::adapters::{LinuxEnumerator, LinuxEnumeratorConfig};
use mediad::core::VolumeEnumerator;
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    sysfs: std::path::PathBuf,
    mounts: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let sysfs = root.path().join("sys/class/block");
        fs::create_dir_all(&sysfs).unwrap();
        let mounts = root.path().join("mounts");
        Self {
            _root: root,
            sysfs,
            mounts,
        }
    }

    fn disk(&self, name: &str, removable: bool) {
        let dir = self.sysfs.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("removable"), if removable { "1\n" } else { "0\n" }).unwrap();
    }

    /// Partition laid out like sysfs: nested under its disk, linked at top level.
    fn partition(&self, disk: &str, name: &str) {
        let dir = self.sysfs.join(disk).join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("partition"), "1\n").unwrap();
        symlink(&dir, self.sysfs.join(name)).unwrap();
    }

    fn write_mounts(&self, lines: &[String]) {
        fs::write(&self.mounts, lines.join("\n")).unwrap();
    }

    fn enumerator(&self) -> LinuxEnumerator {
        LinuxEnumerator::new(LinuxEnumeratorConfig {
            mounts_path: self.mounts.clone(),
            sysfs_block: self.sysfs.clone(),
            use_udev: false,
        })
    }
}

fn mount_line(device: &str, mount: &Path, fstype: &str) -> String {
    format!(
        "{} {} {} rw,relatime 0 0",
        device,
        mount.display().to_string().replace(' ', "\\040"),
        fstype
    )
}

#[test]
fn test_only_removable_devices_are_listed() {
    let fx = Fixture::new();
    let card = TempDir::new().unwrap();
    let internal = TempDir::new().unwrap();

    fx.disk("mdtestsdz1", true);
    fx.disk("mdtestsda1", false);
    fx.write_mounts(&[
        mount_line("/dev/mdtestsda1", internal.path(), "ext4"),
        mount_line("/dev/mdtestsdz1", card.path(), "vfat"),
        mount_line("tmpfs", Path::new("/run"), "tmpfs"),
    ]);

    let volumes = fx.enumerator().enumerate().unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].id, "/dev/mdtestsdz1");
    assert_eq!(volumes[0].mount_path, card.path());
    assert_eq!(volumes[0].filesystem, "vfat");
    assert!(volumes[0].total_bytes > 0);
}

#[test]
fn test_partition_inherits_parent_disk_flag() {
    let fx = Fixture::new();
    let card = TempDir::new().unwrap();

    fx.disk("mdtestsdy", true);
    fx.partition("mdtestsdy", "mdtestsdy1");
    fx.write_mounts(&[mount_line("/dev/mdtestsdy1", card.path(), "exfat")]);

    let enumerator = fx.enumerator();
    let volumes = enumerator.enumerate().unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(
        enumerator.mount_path("/dev/mdtestsdy1").unwrap().as_deref(),
        Some(card.path())
    );
    assert_eq!(enumerator.mount_path("/dev/mdtestsdx1").unwrap(), None);
}

#[test]
fn test_escaped_mount_point_and_unstattable_volume() {
    let fx = Fixture::new();
    let parent = TempDir::new().unwrap();
    let spaced = parent.path().join("SD CARD");
    fs::create_dir_all(&spaced).unwrap();

    fx.disk("mdtestsdw1", true);
    fx.disk("mdtestsdv1", true);
    fx.write_mounts(&[
        mount_line("/dev/mdtestsdw1", &spaced, "vfat"),
        mount_line("/dev/mdtestsdv1", &parent.path().join("gone"), "vfat"),
    ]);

    let volumes = fx.enumerator().enumerate().unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].mount_path, spaced);
}

#[test]
fn test_missing_mount_table_is_an_error() {
    let fx = Fixture::new();
    assert!(fx.enumerator().enumerate().is_err());
}

#[test]
fn test_mount_options_do_not_mark_a_fixed_disk_removable() {
    let fx = Fixture::new();
    let internal = TempDir::new().unwrap();

    fx.disk("mdtestsdu1", false);
    fx.write_mounts(&[format!(
        "/dev/mdtestsdu1 {} ext4 rw,removable,relatime 0 0",
        internal.path().display()
    )]);

    assert!(fx.enumerator().enumerate().unwrap().is_empty());
}
