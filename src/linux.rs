//! BlueZ device store reader.
//!
//! BlueZ keeps one keyfile per paired device:
//!
//! ```text
//! /var/lib/bluetooth/<adapter MAC>/<device MAC>/info
//!
//! [General]
//! Name=DEV-1-02-Name
//! Class=0x000540
//!
//! [LinkKey]
//! Key=A515CBE4E8F2E236FF999C0A53369EF6
//!
//! [LongTermKey]
//! Key=...
//! EDiv=...
//! Rand=...
//! ```

use crate::device::{Credential, DeviceRecord, Source};
use crate::error::{Result, SyncError};
use crate::mac::Mac;
use crate::regtext::SectionDocument;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// Default BlueZ storage directory.
pub const LINUX_BT_DIR: &str = "/var/lib/bluetooth";

/// File name of a device record.
pub const DEVICE_INFO_FILE: &str = "info";

/// Extracts `(adapter, device)` MACs from a `.../<MAC>/<MAC>/info` path.
///
/// Returns `None` if the path does not end that way.
pub fn extract_macs(device_info_path: &Path) -> Option<(Mac, Mac)> {
    if device_info_path.file_name()? != DEVICE_INFO_FILE {
        return None;
    }

    let device_dir = device_info_path.parent()?;
    let adapter_dir = device_dir.parent()?;
    let device = Mac::parse_canonical(device_dir.file_name()?.to_str()?).ok()?;
    let adapter = Mac::parse_canonical(adapter_dir.file_name()?.to_str()?).ok()?;

    Some((adapter, device))
}

fn non_empty<'a>(doc: &'a SectionDocument, section: &str, name: &str) -> Option<&'a str> {
    doc.get(section, name).filter(|value| !value.is_empty())
}

fn parse_number<T: FromStr>(path: &Path, name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        SyncError::format_error(format!("{name}={value:?} is not a number in {}", path.display()))
    })
}

/// Reads the credential of a parsed keyfile.
fn credential_from(doc: &SectionDocument, path: &Path) -> Result<Credential> {
    let link_key = non_empty(doc, "LinkKey", "Key");

    let long_term_key = match (
        non_empty(doc, "LongTermKey", "Key"),
        non_empty(doc, "LongTermKey", "Rand"),
        non_empty(doc, "LongTermKey", "EDiv"),
    ) {
        (Some(ltk), Some(rand), Some(ediv)) => Some((ltk, rand, ediv)),
        (Some(_), _, _) => {
            debug!(path = %path.display(), "LongTermKey without Rand/EDiv ignored");
            None
        }
        _ => None,
    };

    match (link_key, long_term_key) {
        (Some(_), Some(_)) => Err(SyncError::ConflictingKeyMaterial {
            path: path.to_path_buf(),
        }),
        (Some(key), None) => Credential::pairing_key(key),
        (None, Some((ltk, rand, ediv))) => Credential::long_term_key(
            ltk,
            parse_number(path, "Rand", rand)?,
            parse_number(path, "EDiv", ediv)?,
        ),
        (None, None) => Err(SyncError::missing_key_material(path)),
    }
}

/// Builds a Linux [`DeviceRecord`] from a `<adapter>/<device>/info` file.
///
/// # Errors
///
/// * [`SyncError::InvalidFormat`] if the path is not `<MAC>/<MAC>/info` or
///   the keyfile is malformed.
/// * [`SyncError::MissingKeyMaterial`] if the device has no usable key.
/// * [`SyncError::ConflictingKeyMaterial`] if it has both key shapes.
pub fn read_device_info(device_info_path: &Path) -> Result<DeviceRecord> {
    let (adapter_mac, mac) = extract_macs(device_info_path).ok_or_else(|| {
        SyncError::format_error(format!(
            "Expected <adapter MAC>/<device MAC>/info, got {}",
            device_info_path.display()
        ))
    })?;

    let doc = SectionDocument::parse_keyfile(&fs::read_to_string(device_info_path)?)?;
    let credential = credential_from(&doc, device_info_path)?;

    Ok(DeviceRecord::new(Source::Linux, mac, adapter_mac, credential)
        .with_name(doc.get("General", "Name").map(str::to_string))
        .with_class(doc.get("General", "Class").map(str::to_string)))
}

/// BlueZ storage directory.
#[derive(Debug, Clone)]
pub struct LinuxStore {
    root: PathBuf,
}

impl Default for LinuxStore {
    fn default() -> Self {
        Self::new(LINUX_BT_DIR)
    }
}

impl LinuxStore {
    /// Creates a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists local adapters: subdirectories named by a MAC.
    pub fn adapters(&self) -> Result<Vec<Mac>> {
        let mut adapters = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(mac) = entry.file_name().to_str().and_then(|n| Mac::parse_canonical(n).ok()) {
                adapters.push(mac);
            }
        }
        adapters.sort();
        Ok(adapters)
    }

    /// Lists `<adapter>/<device>/info` files, sorted by path.
    pub fn device_info_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() && extract_macs(entry.path()).is_some() {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }

    /// Reads every paired device.
    ///
    /// Records with missing or conflicting key material are skipped with a
    /// warning. Any other error aborts the read.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn devices(&self) -> Result<Vec<DeviceRecord>> {
        let mut devices = Vec::new();
        for path in self.device_info_paths()? {
            match read_device_info(&path) {
                Ok(device) => devices.push(device),
                Err(err) if err.is_record_skippable() => {
                    warn!(path = %path.display(), error = %err, "Skipping device record");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(count = devices.len(), "Read Linux devices");
        Ok(devices)
    }
}
