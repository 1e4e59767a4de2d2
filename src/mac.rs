//! Bluetooth hardware addresses.

use crate::error::{Result, SyncError};
use std::fmt;
use std::str::FromStr;

/// Number of bytes in a Bluetooth MAC.
pub const MAC_LEN: usize = 6;

/// A 6-byte Bluetooth hardware address.
///
/// Displays in canonical form: six uppercase hex pairs joined by colons,
/// e.g. `D5:1F:FA:42:1C:4C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mac([u8; MAC_LEN]);

impl Mac {
    /// Creates a MAC from raw bytes.
    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn bytes(&self) -> [u8; MAC_LEN] {
        self.0
    }

    /// Parses canonical colon-separated notation. Case-insensitive.
    pub fn parse_canonical(text: &str) -> Result<Self> {
        let pairs: Vec<&str> = text.split(':').collect();
        if pairs.len() != MAC_LEN || pairs.iter().any(|p| p.len() != 2) {
            return Err(SyncError::invalid_mac_key(text));
        }

        Self::from_hex_digits(&pairs.concat()).ok_or_else(|| SyncError::invalid_mac_key(text))
    }

    /// Decodes exactly 12 hex digits.
    pub(crate) fn from_hex_digits(digits: &str) -> Option<Self> {
        if digits.len() != MAC_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; MAC_LEN];
        hex::decode_to_slice(digits, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Mac {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_canonical(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Mac {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Mac {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
