//! Runtime configuration.
//!
//! Defaults come from the standard locations, environment variables
//! override them and command line flags override both.

use crate::hive_editor::REGED_PROGRAM;
use crate::linux::LINUX_BT_DIR;
use std::env;
use std::path::PathBuf;

/// Default directory for hive backups.
pub const DEFAULT_BACKUP_DIR: &str = "/var/backup/bt-dualboot";

/// Overrides the BlueZ storage directory.
pub const ENV_LINUX_DIR: &str = "BT_DUALBOOT_LINUX_DIR";

/// Overrides the `reged` executable.
pub const ENV_REGED: &str = "BT_DUALBOOT_REGED";

/// Overrides the backup directory.
pub const ENV_BACKUP_DIR: &str = "BT_DUALBOOT_BACKUP_DIR";

/// `DEBUG=1` enables debug logging.
pub const ENV_DEBUG: &str = "DEBUG";

/// Settings shared by the library entry points and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// BlueZ storage directory.
    pub linux_bt_dir: PathBuf,
    /// `reged` executable.
    pub reged_program: PathBuf,
    /// Where hive backups are written.
    pub backup_dir: PathBuf,
    /// Debug logging.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            linux_bt_dir: PathBuf::from(LINUX_BT_DIR),
            reged_program: PathBuf::from(REGED_PROGRAM),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            debug: false,
        }
    }
}

impl Config {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads overrides through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let path = |name: &str, default: PathBuf| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        Self {
            linux_bt_dir: path(ENV_LINUX_DIR, defaults.linux_bt_dir),
            reged_program: path(ENV_REGED, defaults.reged_program),
            backup_dir: path(ENV_BACKUP_DIR, defaults.backup_dir),
            debug: lookup(ENV_DEBUG).as_deref() == Some("1"),
        }
    }
}
