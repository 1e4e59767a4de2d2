//! # Bluetooth Dual-Boot Key Sync
//!
//! Keeps Bluetooth pairing keys consistent between a Linux BlueZ store and
//! the `SYSTEM` registry hive of a Windows installation on the same machine,
//! so a device paired in both systems keeps working after a reboot.
//!
//! ## Features
//!
//! - **Both key shapes**: legacy link keys and Bluetooth 5.1 LE long term keys
//!   (`LTK`/`ERand`/`EDIV`), which may coexist under one adapter
//! - **Classification**: synced, needing sync, absent on Windows
//! - **All-or-nothing pushes**: every target is validated before a single
//!   import touches the hive
//! - **Pluggable hive access**: [`Reged`] drives chntpw's `reged`,
//!   [`MemoryHive`] keeps a hive in memory
//!
//! ## Architecture
//!
//! ```text
//! /var/lib/bluetooth/<adapter>/<device>/info ──> linux ───┐
//!                                                         ├──> sync::DeviceIndex ──> SyncManager::push
//! SYSTEM hive ──> HiveEditor::export ──> windows ─────────┘                              │
//!                                                                                         v
//!                                          HiveEditor::import <── RegistryPatch <── device records
//! ```
//!
//! 1. **Codec** ([`codec`], [`mac`]): registry text literals and MAC forms
//! 2. **Stores** ([`linux`], [`windows`]): read [`DeviceRecord`]s
//! 3. **Planner** ([`sync`]): joins, classifies and pushes
//! 4. **Hive editor** ([`hive_editor`]): the only writer of the hive
//!
//! ## Examples
//!
//! ```no_run
//! use bt_dualboot::{LinuxStore, Reged, SyncManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let editor = Reged::for_windows_mount("/mnt/windows");
//! let mut manager = SyncManager::new(editor, LinuxStore::default());
//!
//! for device in manager.devices_needing_sync()? {
//!     println!("needs sync: {device}");
//! }
//!
//! let ready = manager.devices_needing_sync()?;
//! let outcome = manager.push(&ready, false)?;
//! println!("pushed {} devices", outcome.pushed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### In-memory hive
//!
//! ```
//! use bt_dualboot::{HiveEditor, ImportMode, MemoryHive, RegistryPatch};
//!
//! let mut hive = MemoryHive::new();
//! let mut patch = RegistryPatch::new();
//! patch.insert(
//!     r"ControlSet001\Services\BTHPORT\Parameters\Keys\a46b6c9de2fb",
//!     "\"b6c2d3e5f20d\"",
//!     "hex:a5,15",
//! );
//! hive.import(&patch, ImportMode::Structural).unwrap();
//! assert!(hive.export(r"ControlSet001\Services\BTHPORT").unwrap().contains("hex:a5,15"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod hive_editor;
pub mod linux;
pub mod mac;
pub mod mounts;
pub mod regtext;
pub mod sync;
pub mod windows;

// Re-export main types for convenience
pub use config::Config;
pub use device::{Credential, DeviceRecord, Source};
pub use error::{NotFoundReason, Result, SyncError};
pub use hive_editor::{HiveBackup, HiveEditor, ImportMode, MemoryHive, Reged};
pub use linux::LinuxStore;
pub use mac::Mac;
pub use regtext::{RegistryPatch, SectionDocument};
pub use sync::{Anomaly, DeviceIndex, PushOutcome, PushTarget, SyncManager, SyncState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
