//! Error types for key sync operations.
//!
//! Codec and parsing errors are raised close to the point of detection.
//! Planner errors ([`SyncError::DeviceNotFound`] and
//! [`SyncError::CredentialMismatch`]) are produced before any mutation of
//! the Windows hive is attempted.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::mac::Mac;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while reading device stores or syncing keys.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error occurred while reading a store or a temporary file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Hex text with an odd number of digits or non-hex characters.
    #[error("Malformed hex string: {0:?}")]
    MalformedHex(String),

    /// Text is not a 12-digit registry MAC key nor a canonical MAC.
    #[error("Invalid MAC key: {0:?}")]
    InvalidMacKey(String),

    /// Device record has neither a link key nor a complete long term key.
    #[error("Neither LinkKey->Key nor a complete LongTermKey exist in {}", path.display())]
    MissingKeyMaterial {
        /// Path of the rejected device record.
        path: PathBuf,
    },

    /// Device record carries both a link key and a long term key.
    #[error("Both LinkKey and LongTermKey exist in {}, refusing to guess which one to sync", path.display())]
    ConflictingKeyMaterial {
        /// Path of the rejected device record.
        path: PathBuf,
    },

    /// Push target absent, Linux-only, Windows-only or already synced.
    #[error("Can't push {mac}! {reason}")]
    DeviceNotFound {
        /// Requested device MAC.
        mac: Mac,
        /// Why the device cannot be pushed.
        reason: NotFoundReason,
    },

    /// Linux holds a link key where Windows holds a long term key, or the
    /// reverse. Pushing would leave Windows with both shapes.
    #[error("Can't push {mac}! Linux has a {linux} but Windows has a {windows}, re-pair it on Windows first")]
    CredentialMismatch {
        /// Requested device MAC.
        mac: Mac,
        /// Credential kind on Linux.
        linux: &'static str,
        /// Credential kind on Windows.
        windows: &'static str,
    },

    /// The external hive editor reported a failure.
    #[error("External tool failure: {0}")]
    ExternalToolFailure(String),

    /// Registry text or a device record does not follow the expected layout.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Reason attached to [`SyncError::DeviceNotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// MAC unknown to both stores.
    Unknown,
    /// Paired on Windows only.
    AbsentOnLinux,
    /// Paired on Linux only.
    AbsentOnWindows,
    /// Both stores already hold the same key.
    AlreadySynced,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            NotFoundReason::Unknown => "Not found!",
            NotFoundReason::AbsentOnLinux => "Not found on Linux!",
            NotFoundReason::AbsentOnWindows => "Not found on Windows!",
            NotFoundReason::AlreadySynced => "Not found among devices needing sync, already in sync!",
        };
        f.write_str(message)
    }
}

impl SyncError {
    /// Creates a malformed hex error.
    pub fn malformed_hex(text: &str) -> Self {
        Self::MalformedHex(text.to_string())
    }

    /// Creates an invalid MAC key error.
    pub fn invalid_mac_key(text: &str) -> Self {
        Self::InvalidMacKey(text.to_string())
    }

    /// Creates a missing key material error for the record at `path`.
    pub fn missing_key_material(path: &Path) -> Self {
        Self::MissingKeyMaterial {
            path: path.to_path_buf(),
        }
    }

    /// Creates a device not found error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bt_dualboot::error::{NotFoundReason, SyncError};
    /// # use bt_dualboot::Mac;
    /// let mac: Mac = "AA:AA:AA:AA:AA:AA".parse().unwrap();
    /// let err = SyncError::device_not_found(mac, NotFoundReason::Unknown);
    /// assert!(err.to_string().contains("Not found"));
    /// ```
    pub fn device_not_found(mac: Mac, reason: NotFoundReason) -> Self {
        Self::DeviceNotFound { mac, reason }
    }

    /// Creates a format error with detailed context.
    pub fn format_error(message: String) -> Self {
        Self::InvalidFormat(message)
    }

    /// Returns true for errors that only disqualify a single device record.
    pub fn is_record_skippable(&self) -> bool {
        matches!(
            self,
            SyncError::MissingKeyMaterial { .. } | SyncError::ConflictingKeyMaterial { .. }
        )
    }
}
