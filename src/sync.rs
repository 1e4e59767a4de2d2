//! Device index and sync planner.
//!
//! [`SyncManager`] joins both stores by device MAC, classifies Linux records
//! against Windows, and pushes Linux credentials into the Windows hive.
//!
//! ```text
//!            Linux record     Windows record      class
//!            ------------     --------------      -----
//!                 yes           same key          both synced
//!                 yes           other key         needs sync
//!                 yes              no             absent on Windows
//!                  no              yes            (Windows only, not listed)
//! ```
//!
//! The index is memoized; [`SyncManager::push`] always rebuilds it before
//! validating targets and drops it afterwards.

use crate::device::{DeviceRecord, Source};
use crate::error::{NotFoundReason, Result, SyncError};
use crate::hive_editor::{HiveEditor, ImportMode};
use crate::linux::LinuxStore;
use crate::mac::Mac;
use crate::regtext::RegistryPatch;
use crate::windows;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Unexpected store contents reported as warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// One device MAC has more than one record on one side.
    MultipleAdapters {
        /// Side with the duplicate records.
        source: Source,
        /// Device MAC.
        mac: Mac,
        /// Adapter of each record, in read order. May repeat.
        adapters: Vec<Mac>,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::MultipleAdapters { source, mac, adapters } => {
                let adapters: Vec<String> = adapters.iter().map(Mac::to_string).collect();
                write!(
                    f,
                    "{source}: device {mac} has multiple records (adapters {}), only the first one is used",
                    adapters.join(", ")
                )
            }
        }
    }
}

/// Sync state of one device MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Same credential on both sides.
    Synced,
    /// Paired on both sides with different credentials.
    NeedsSync,
    /// Paired on Linux only.
    AbsentOnWindows,
    /// Paired on Windows only.
    AbsentOnLinux,
}

/// Records of one device MAC from both stores.
#[derive(Debug, Clone, Default)]
pub struct IndexEntry {
    linux: Vec<DeviceRecord>,
    windows: Vec<DeviceRecord>,
}

impl IndexEntry {
    /// First Linux record, if any.
    pub fn linux(&self) -> Option<&DeviceRecord> {
        self.linux.first()
    }

    /// First Windows record, if any.
    pub fn windows(&self) -> Option<&DeviceRecord> {
        self.windows.first()
    }

    /// All records read from `source`.
    pub fn records(&self, source: Source) -> &[DeviceRecord] {
        match source {
            Source::Linux => &self.linux,
            Source::Windows => &self.windows,
        }
    }

    /// Classifies the entry.
    pub fn state(&self) -> SyncState {
        match (self.linux(), self.windows()) {
            (Some(linux), Some(windows)) if linux.is_synced_with(windows) => SyncState::Synced,
            (Some(_), Some(_)) => SyncState::NeedsSync,
            (Some(_), None) => SyncState::AbsentOnWindows,
            (None, _) => SyncState::AbsentOnLinux,
        }
    }
}

/// Both stores joined by device MAC.
#[derive(Debug, Clone, Default)]
pub struct DeviceIndex {
    entries: BTreeMap<Mac, IndexEntry>,
    anomalies: Vec<Anomaly>,
}

impl DeviceIndex {
    /// Joins records of both stores.
    ///
    /// A MAC read more than once from the same side keeps its first record
    /// and is reported as [`Anomaly::MultipleAdapters`].
    pub fn build(linux: Vec<DeviceRecord>, windows: Vec<DeviceRecord>) -> Self {
        let mut entries: BTreeMap<Mac, IndexEntry> = BTreeMap::new();
        for record in linux {
            entries.entry(record.mac).or_default().linux.push(record);
        }
        for record in windows {
            entries.entry(record.mac).or_default().windows.push(record);
        }

        let mut anomalies = Vec::new();
        for (mac, entry) in &entries {
            for source in [Source::Linux, Source::Windows] {
                let records = entry.records(source);
                if records.len() > 1 {
                    let anomaly = Anomaly::MultipleAdapters {
                        source,
                        mac: *mac,
                        adapters: records.iter().map(|record| record.adapter_mac).collect(),
                    };
                    warn!("{anomaly}");
                    anomalies.push(anomaly);
                }
            }
        }

        Self { entries, anomalies }
    }

    /// Returns the entry of a device MAC.
    pub fn get(&self, mac: &Mac) -> Option<&IndexEntry> {
        self.entries.get(mac)
    }

    /// Iterates over entries in MAC order.
    pub fn entries(&self) -> impl Iterator<Item = (&Mac, &IndexEntry)> {
        self.entries.iter()
    }

    /// Anomalies found while building.
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Linux records whose entry is in `state`, in MAC order.
    pub fn linux_records_in(&self, state: SyncState) -> Vec<DeviceRecord> {
        self.entries
            .values()
            .filter(|entry| entry.state() == state)
            .filter_map(|entry| entry.linux().cloned())
            .collect()
    }
}

/// Device to push, by MAC or by record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTarget {
    /// Device MAC.
    Mac(Mac),
    /// Device record; only its MAC is used.
    Device(DeviceRecord),
}

impl PushTarget {
    /// MAC of the target.
    pub fn mac(&self) -> Mac {
        match self {
            PushTarget::Mac(mac) => *mac,
            PushTarget::Device(record) => record.mac,
        }
    }
}

impl From<Mac> for PushTarget {
    fn from(mac: Mac) -> Self {
        PushTarget::Mac(mac)
    }
}

impl From<&Mac> for PushTarget {
    fn from(mac: &Mac) -> Self {
        PushTarget::Mac(*mac)
    }
}

impl From<DeviceRecord> for PushTarget {
    fn from(record: DeviceRecord) -> Self {
        PushTarget::Device(record)
    }
}

impl From<&DeviceRecord> for PushTarget {
    fn from(record: &DeviceRecord) -> Self {
        PushTarget::Device(record.clone())
    }
}

/// Result of [`SyncManager::push`].
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Pushed device MACs in caller order.
    pub pushed: Vec<Mac>,
    /// Patch that was (or, in a dry run, would have been) imported.
    pub patch: RegistryPatch,
    /// True if the import was skipped.
    pub dry_run: bool,
}

/// Normalizes targets to MACs, dropping repeats and keeping first-seen order.
fn target_macs<I, T>(targets: I) -> Vec<Mac>
where
    I: IntoIterator<Item = T>,
    T: Into<PushTarget>,
{
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .map(|target| target.into().mac())
        .filter(|mac| seen.insert(*mac))
        .collect()
}

/// Classifies devices and pushes Linux keys into the Windows hive.
#[derive(Debug)]
pub struct SyncManager<E: HiveEditor> {
    editor: E,
    linux: LinuxStore,
    import_mode: ImportMode,
    index: Option<DeviceIndex>,
}

impl<E: HiveEditor> SyncManager<E> {
    /// Creates a manager with [`ImportMode::Safe`] imports.
    pub fn new(editor: E, linux: LinuxStore) -> Self {
        Self {
            editor,
            linux,
            import_mode: ImportMode::default(),
            index: None,
        }
    }

    /// Sets how pushes may change the hive.
    pub fn with_import_mode(mut self, import_mode: ImportMode) -> Self {
        self.import_mode = import_mode;
        self
    }

    /// Returns the hive editor.
    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Returns the hive editor mutably. Changes made through it are seen
    /// after the next [`flush_cache`](Self::flush_cache).
    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    /// Consumes the manager, returning the hive editor.
    pub fn into_editor(self) -> E {
        self.editor
    }

    /// Returns the Linux store.
    pub fn linux_store(&self) -> &LinuxStore {
        &self.linux
    }

    /// Drops the memoized index.
    pub fn flush_cache(&mut self) {
        self.index = None;
    }

    /// Runs `f` with the index flushed before and after.
    pub fn with_no_cache<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.flush_cache();
        let result = f(self);
        self.flush_cache();
        result
    }

    /// Returns the index, reading both stores if it is not memoized.
    pub fn index(&mut self) -> Result<&DeviceIndex> {
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let linux = self.linux.devices()?;
                let windows = windows::get_devices(&self.editor)?;
                debug!(linux = linux.len(), windows = windows.len(), "Building device index");
                DeviceIndex::build(linux, windows)
            }
        };
        Ok(self.index.insert(index))
    }

    /// Anomalies of the current index.
    pub fn warnings(&mut self) -> Result<Vec<Anomaly>> {
        Ok(self.index()?.anomalies().to_vec())
    }

    /// Linux devices with the same key on Windows.
    pub fn devices_both_synced(&mut self) -> Result<Vec<DeviceRecord>> {
        Ok(self.index()?.linux_records_in(SyncState::Synced))
    }

    /// Linux devices paired on Windows with another key.
    pub fn devices_needing_sync(&mut self) -> Result<Vec<DeviceRecord>> {
        Ok(self.index()?.linux_records_in(SyncState::NeedsSync))
    }

    /// Linux devices not paired on Windows.
    pub fn devices_absent_on_windows(&mut self) -> Result<Vec<DeviceRecord>> {
        Ok(self.index()?.linux_records_in(SyncState::AbsentOnWindows))
    }

    /// Pushes Linux credentials of `targets` into the Windows hive.
    ///
    /// All targets are validated against freshly read stores before anything
    /// is staged; the patch is imported in one call unless `dry_run`.
    ///
    /// # Errors
    ///
    /// * [`SyncError::DeviceNotFound`] if a target is not in the needs-sync
    ///   set. The hive is not touched.
    /// * Errors of the store reads or of the import.
    #[instrument(skip(self, targets))]
    pub fn push<I, T>(&mut self, targets: I, dry_run: bool) -> Result<PushOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<PushTarget>,
    {
        let macs = target_macs(targets);
        self.with_no_cache(|manager| manager.push_macs(macs, dry_run))
    }

    fn push_macs(&mut self, macs: Vec<Mac>, dry_run: bool) -> Result<PushOutcome> {
        let index = self.index()?;

        let mut staged = Vec::with_capacity(macs.len());
        for mac in &macs {
            let entry = index
                .get(mac)
                .ok_or_else(|| SyncError::device_not_found(*mac, NotFoundReason::Unknown))?;
            let (linux, windows) = match (entry.linux(), entry.windows()) {
                (Some(linux), Some(windows)) => (linux, windows),
                (None, _) => return Err(SyncError::device_not_found(*mac, NotFoundReason::AbsentOnLinux)),
                (_, None) => return Err(SyncError::device_not_found(*mac, NotFoundReason::AbsentOnWindows)),
            };
            if linux.is_synced_with(windows) {
                return Err(SyncError::device_not_found(*mac, NotFoundReason::AlreadySynced));
            }
            if linux.credential.is_legacy() != windows.credential.is_legacy() {
                return Err(SyncError::CredentialMismatch {
                    mac: *mac,
                    linux: linux.credential.kind(),
                    windows: windows.credential.kind(),
                });
            }
            staged.push(windows.with_credential_from(linux));
        }

        let mut patch = RegistryPatch::new();
        for record in &staged {
            record.write_to_patch(&mut patch)?;
        }

        if dry_run {
            info!(devices = staged.len(), "Dry run, Windows registry left unchanged");
        } else if !patch.is_empty() {
            self.editor.import(&patch, self.import_mode)?;
            info!(devices = staged.len(), "Pushed Linux keys to Windows");
        }

        Ok(PushOutcome {
            pushed: macs,
            patch,
            dry_run,
        })
    }
}
