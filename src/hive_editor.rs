//! Hive editor capability: the only path that reads or writes the Windows hive.
//!
//! [`HiveEditor`] exports a registry subtree as text and imports a
//! [`RegistryPatch`]. [`Reged`] shells out to `reged` from the chntpw
//! package; [`MemoryHive`] keeps sections in memory and follows the same
//! contract.

use crate::error::{Result, SyncError};
use crate::regtext::{RegistryPatch, SectionDocument};
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, instrument, warn};

/// Location of the SYSTEM hive relative to a Windows mount point.
pub const WINDOWS10_REGISTRY_PATH: &str = "Windows/System32/config/SYSTEM";

/// Default `reged` executable.
pub const REGED_PROGRAM: &str = "reged";

/// Prefix `reged` mounts the hive under; identical for export and import.
pub const EXCHANGE_PREFIX: &str = "BTDUALBOOTEXCHANGE";

/// Exit status `reged -I -C` reports after committing an import.
pub const REGED_IMPORT_SUCCESS: i32 = 2;

/// How an import may change the hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Only overwrite existing values with data of the same byte length.
    #[default]
    Safe,
    /// Allow new keys, new values and length changes.
    Structural,
}

/// Export/import access to a registry hive.
pub trait HiveEditor {
    /// Exports `section_path` and its subsections as registry editor text.
    fn export(&self, section_path: &str) -> Result<String>;

    /// Imports all of `patch` as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExternalToolFailure`] if the editor rejects the
    /// patch. Partial application must not be reported as success.
    fn import(&mut self, patch: &RegistryPatch, mode: ImportMode) -> Result<()>;
}

/// Byte length a registry literal occupies in the hive.
fn value_byte_len(value: &str) -> usize {
    match value.split_once(':') {
        Some((kind, body)) if kind.to_ascii_lowercase().starts_with("hex") => {
            body.split(',').filter(|pair| !pair.trim().is_empty()).count()
        }
        Some((kind, _)) if kind.eq_ignore_ascii_case("dword") => 4,
        _ => value.len(),
    }
}

/// In-memory hive with the [`HiveEditor`] contract of [`Reged`].
///
/// Section paths are stored without the exchange prefix.
#[derive(Debug, Clone, Default)]
pub struct MemoryHive {
    doc: SectionDocument,
    imports: usize,
}

impl MemoryHive {
    /// Creates an empty hive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hive holding the sections of registry editor text.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Self {
            doc: SectionDocument::parse(text)?,
            imports: 0,
        })
    }

    /// Returns the current contents.
    pub fn document(&self) -> &SectionDocument {
        &self.doc
    }

    /// Number of successful imports.
    pub fn import_count(&self) -> usize {
        self.imports
    }

    fn check_safe(&self, patch: &RegistryPatch) -> Result<()> {
        for (section, values) in patch.sections() {
            for (name, value) in values {
                let current = self.doc.get(section, name).ok_or_else(|| {
                    SyncError::ExternalToolFailure(format!(
                        "safe import cannot create {section}\\{name}"
                    ))
                })?;
                if value_byte_len(current) != value_byte_len(value) {
                    return Err(SyncError::ExternalToolFailure(format!(
                        "safe import cannot resize {section}\\{name}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl HiveEditor for MemoryHive {
    fn export(&self, section_path: &str) -> Result<String> {
        let nested = format!("{section_path}\\");
        let mut subset = SectionDocument::default();

        for (path, values) in self.doc.sections() {
            if path == section_path || path.starts_with(&nested) {
                subset.ensure_section(path);
                for (name, value) in values {
                    subset.insert(path, name, value);
                }
            }
        }

        Ok(subset.render())
    }

    fn import(&mut self, patch: &RegistryPatch, mode: ImportMode) -> Result<()> {
        if mode == ImportMode::Safe {
            self.check_safe(patch)?;
        }

        for (section, values) in patch.sections() {
            self.doc.ensure_section(section);
            for (name, value) in values {
                self.doc.insert(section, name, value);
            }
        }
        self.imports += 1;
        Ok(())
    }
}

/// Result of [`backup_hive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveBackup {
    /// Where the copy was (or, in a dry run, would be) written.
    pub backup_file: PathBuf,
    /// The hive that was copied.
    pub target_file: PathBuf,
}

/// Copies `target` into `backup_dir` as `<name>-<YYYY-mm-dd--HH-MM-SS>`.
pub fn backup_hive(target: &Path, backup_dir: &Path, dry_run: bool) -> Result<HiveBackup> {
    backup_hive_at(target, backup_dir, Local::now().naive_local(), dry_run)
}

/// [`backup_hive`] with an explicit timestamp.
pub fn backup_hive_at(
    target: &Path,
    backup_dir: &Path,
    timestamp: NaiveDateTime,
    dry_run: bool,
) -> Result<HiveBackup> {
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SyncError::format_error(format!("No file name in {}", target.display())))?;
    let backup_file = backup_dir.join(format!("{file_name}-{}", timestamp.format("%Y-%m-%d--%H-%M-%S")));

    if !dry_run {
        fs::create_dir_all(backup_dir)?;
        fs::copy(target, &backup_file)?;
        info!(from = %target.display(), to = %backup_file.display(), "Hive backed up");
    }

    Ok(HiveBackup {
        backup_file,
        target_file: target.to_path_buf(),
    })
}

/// Decodes an exported `.reg` file: UTF-16 with BOM or UTF-8.
pub fn decode_reg_file(bytes: &[u8]) -> String {
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "Exported registry text had invalid sequences");
    }
    text.into_owned()
}

/// [`HiveEditor`] backed by the `reged` tool from chntpw.
#[derive(Debug, Clone)]
pub struct Reged {
    program: PathBuf,
    registry_file: PathBuf,
}

impl Reged {
    /// Creates an editor for the hive file at `registry_file`.
    pub fn new<P: AsRef<Path>>(registry_file: P) -> Self {
        Self {
            program: PathBuf::from(REGED_PROGRAM),
            registry_file: registry_file.as_ref().to_path_buf(),
        }
    }

    /// Creates an editor for the SYSTEM hive of a mounted Windows partition.
    pub fn for_windows_mount<P: AsRef<Path>>(mount_point: P) -> Self {
        Self::new(mount_point.as_ref().join(WINDOWS10_REGISTRY_PATH))
    }

    /// Uses another `reged` executable.
    pub fn with_program<P: AsRef<Path>>(mut self, program: P) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Returns the hive file path.
    pub fn registry_file(&self) -> &Path {
        &self.registry_file
    }

    /// Copies the hive into `backup_dir`, see [`backup_hive`].
    pub fn backup(&self, backup_dir: &Path, dry_run: bool) -> Result<HiveBackup> {
        backup_hive(&self.registry_file, backup_dir, dry_run)
    }

    fn run(&self, command: &mut Command) -> Result<Output> {
        let output = command.output().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SyncError::ExternalToolFailure(format!(
                "{} not found, install the chntpw package",
                self.program.display()
            )),
            _ => SyncError::Io(err),
        })?;

        debug!(
            status = ?output.status.code(),
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "reged finished"
        );
        Ok(output)
    }
}

impl HiveEditor for Reged {
    #[instrument(skip(self), fields(hive = %self.registry_file.display()))]
    fn export(&self, section_path: &str) -> Result<String> {
        let temp_dir = tempfile::tempdir()?;
        let exported = temp_dir.path().join("exported.reg");

        // reged -x <hive> <prefix> <key> <out.reg>
        let output = self.run(
            Command::new(&self.program)
                .arg("-x")
                .arg(&self.registry_file)
                .arg(EXCHANGE_PREFIX)
                .arg(section_path)
                .arg(&exported),
        )?;

        if !exported.is_file() {
            return Err(SyncError::ExternalToolFailure(format!(
                "reged exported nothing for {section_path} (status {:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = decode_reg_file(&fs::read(&exported)?);
        debug!(%text, "Exported from Windows registry");
        Ok(text)
    }

    #[instrument(skip(self, patch), fields(hive = %self.registry_file.display(), values = patch.value_count()))]
    fn import(&mut self, patch: &RegistryPatch, mode: ImportMode) -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let for_import = temp_dir.path().join("for_import.reg");
        let text = patch.render(Some(EXCHANGE_PREFIX));
        debug!(%text, "Importing into Windows registry");
        fs::write(&for_import, text)?;

        // reged [-N -E] -I -C <hive> <prefix> <file.reg>
        let mut command = Command::new(&self.program);
        if mode == ImportMode::Safe {
            command.args(["-N", "-E"]);
        }
        command
            .arg("-I")
            .arg("-C")
            .arg(&self.registry_file)
            .arg(EXCHANGE_PREFIX)
            .arg(&for_import);

        let output = self.run(&mut command)?;
        if output.status.code() != Some(REGED_IMPORT_SUCCESS) {
            return Err(SyncError::ExternalToolFailure(format!(
                "Data couldn't be saved, reged exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).trim()
            )));
        }

        info!("Windows registry updated");
        Ok(())
    }
}
