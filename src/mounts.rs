//! Discovery of mounted Windows partitions.

use crate::error::Result;
use crate::hive_editor::WINDOWS10_REGISTRY_PATH;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kernel mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Decodes the octal escapes (`\040` for space) used in the mount table.
fn unescape_mount_point(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
                let value = digits.iter().fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
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

/// Mount points of block devices, excluding loop devices.
pub fn block_device_mount_points(mounts: &str) -> Vec<PathBuf> {
    mounts
        .lines()
        .filter(|line| line.starts_with("/dev") && !line.starts_with("/dev/loop"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_point(field)))
        .collect()
}

/// Mount points from `mounts` holding a Windows SYSTEM hive.
///
/// `is_hive` decides whether a candidate hive path exists.
pub fn windows_mount_points_from<F>(mounts: &str, is_hive: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    block_device_mount_points(mounts)
        .into_iter()
        .filter(|mount_point| is_hive(&mount_point.join(WINDOWS10_REGISTRY_PATH)))
        .collect()
}

/// Mounted Windows partitions, read from [`PROC_MOUNTS`].
pub fn locate_windows_mount_points() -> Result<Vec<PathBuf>> {
    let mounts = fs::read_to_string(PROC_MOUNTS)?;
    let found = windows_mount_points_from(&mounts, Path::is_file);
    debug!(?found, "Windows mount points");
    Ok(found)
}
