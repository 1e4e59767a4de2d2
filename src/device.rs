//! Bluetooth device records shared by both stores.

use crate::codec::{
    ediv_to_reg_text, hex_to_reg_value, mac_to_reg_key, normalize_hex, qword_to_reg_value, quote,
};
use crate::error::{Result, SyncError};
use crate::mac::Mac;
use crate::regtext::RegistryPatch;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Registry section holding Bluetooth pairing keys, relative to the SYSTEM hive.
pub const BT_KEYS_SECTION: &str = r"ControlSet001\Services\BTHPORT\Parameters\Keys";

/// Value name of the BLE long term key.
pub const LTK_VALUE: &str = "LTK";

/// Value name of the BLE random number.
pub const ERAND_VALUE: &str = "ERand";

/// Value name of the BLE encrypted diversifier.
pub const EDIV_VALUE: &str = "EDIV";

/// Which operating system a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Source {
    /// BlueZ store under `/var/lib/bluetooth`.
    Linux,
    /// `SYSTEM` registry hive.
    Windows,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Linux => f.write_str("Linux"),
            Source::Windows => f.write_str("Windows"),
        }
    }
}

/// Pairing credential. A device carries exactly one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Credential {
    /// Legacy (Bluetooth <= 5.0) link key, uppercase hex.
    PairingKey(String),

    /// Bluetooth 5.1 LE long term key triple.
    LongTermKey {
        /// Long term key, uppercase hex.
        ltk: String,
        /// Random number.
        rand: u64,
        /// Encrypted diversifier.
        ediv: u32,
    },
}

/// A key is at least one whole hex byte.
fn key_hex(text: &str) -> Result<String> {
    if text.is_empty() {
        return Err(SyncError::malformed_hex(text));
    }
    normalize_hex(text)
}

impl Credential {
    /// Creates a legacy link key credential, validating and uppercasing `key`.
    ///
    /// # Errors
    ///
    /// [`SyncError::MalformedHex`] if `key` is empty or not whole hex bytes.
    pub fn pairing_key(key: &str) -> Result<Self> {
        Ok(Credential::PairingKey(key_hex(key)?))
    }

    /// Creates a long term key credential, validating and uppercasing `ltk`.
    pub fn long_term_key(ltk: &str, rand: u64, ediv: u32) -> Result<Self> {
        Ok(Credential::LongTermKey {
            ltk: key_hex(ltk)?,
            rand,
            ediv,
        })
    }

    /// Returns true for a legacy link key.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Credential::PairingKey(_))
    }

    /// Human readable kind of the credential.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::PairingKey(_) => "link key",
            Credential::LongTermKey { .. } => "long term key",
        }
    }
}

/// One Bluetooth pairing entry from either store.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceRecord {
    /// Device MAC, identity key within a source.
    pub mac: Mac,

    /// MAC of the local adapter the device is paired with.
    pub adapter_mac: Mac,

    /// Display name, Linux only.
    pub name: Option<String>,

    /// Device class, Linux only.
    pub device_class: Option<String>,

    /// Store this record was read from.
    pub source: Source,

    /// Key material.
    pub credential: Credential,
}

impl DeviceRecord {
    /// Creates a record without display metadata.
    pub fn new(source: Source, mac: Mac, adapter_mac: Mac, credential: Credential) -> Self {
        Self {
            mac,
            adapter_mac,
            name: None,
            device_class: None,
            source,
            credential,
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Sets the device class.
    pub fn with_class(mut self, device_class: Option<String>) -> Self {
        self.device_class = device_class;
        self
    }

    /// Returns true if both records carry byte-for-byte equal key material.
    ///
    /// Records with different credential shapes are never in sync.
    pub fn is_synced_with(&self, other: &DeviceRecord) -> bool {
        self.credential == other.credential
    }

    /// Returns a copy of this record carrying `from`'s credential.
    ///
    /// Used to stage a Windows record before serialization; `self` is not
    /// touched.
    pub fn with_credential_from(&self, from: &DeviceRecord) -> DeviceRecord {
        DeviceRecord {
            credential: from.credential.clone(),
            ..self.clone()
        }
    }

    /// Registry section the credential is stored under on Windows.
    ///
    /// Legacy keys live as values of the adapter section, long term keys in
    /// a per-device subsection.
    pub fn win_section_path(&self) -> String {
        let adapter_section = format!("{BT_KEYS_SECTION}\\{}", mac_to_reg_key(&self.adapter_mac));
        match self.credential {
            Credential::PairingKey(_) => adapter_section,
            Credential::LongTermKey { .. } => {
                format!("{adapter_section}\\{}", mac_to_reg_key(&self.mac))
            }
        }
    }

    /// Adds the registry values for this record's credential to `patch`.
    ///
    /// One value line for a legacy key, three for a long term key.
    pub fn write_to_patch(&self, patch: &mut RegistryPatch) -> Result<()> {
        let section = self.win_section_path();
        match &self.credential {
            Credential::PairingKey(key) => {
                patch.insert(section, quote(&mac_to_reg_key(&self.mac)), hex_to_reg_value(key)?);
            }
            Credential::LongTermKey { ltk, rand, ediv } => {
                patch.insert(section.clone(), quote(LTK_VALUE), hex_to_reg_value(ltk)?);
                patch.insert(section.clone(), quote(ERAND_VALUE), qword_to_reg_value(*rand));
                patch.insert(section, quote(EDIV_VALUE), ediv_to_reg_text(*ediv));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.mac, self.name.as_deref().unwrap_or(""))
    }
}
