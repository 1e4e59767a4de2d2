//! Section-document text used by registry exports/imports and BlueZ keyfiles.
//!
//! Both formats share one shape:
//!
//! ```text
//! Windows Registry Editor Version 5.00      <- optional header
//!
//! [PREFIX\ControlSet001\...\Keys\d46d6d97629b]
//! "a4bfc6d0e5ff"=hex:a4,3c,6b,d9,\
//!   e1,59,2c,1f
//! ```
//!
//! Value names keep their quotes; callers unquote them. In registry text a
//! trailing `\` joins the next line onto the value; keyfiles keep it as data.

use crate::error::{Result, SyncError};
use std::collections::BTreeMap;

/// First line of every registry editor file.
pub const REG_FILE_SIGNATURE: &str = "Windows Registry Editor Version 5.00";

/// Header of legacy (Windows 9x/NT4) registry files.
const REG_FILE_SIGNATURE_V4: &str = "REGEDIT4";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Parsed document: section path → value name → raw value text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionDocument {
    sections: Sections,
}

impl SectionDocument {
    /// Parses registry editor text, joining `\`-continued lines.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidFormat`] for an unterminated section header,
    /// a value line outside of any section, or a line without `=`.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, true)
    }

    /// Parses a BlueZ keyfile. Every line stands alone, so a value may end
    /// in a literal `\`.
    ///
    /// # Errors
    ///
    /// Same as [`SectionDocument::parse`].
    pub fn parse_keyfile(text: &str) -> Result<Self> {
        Self::parse_with(text, false)
    }

    fn parse_with(text: &str, line_continuation: bool) -> Result<Self> {
        let mut sections = Sections::new();
        let mut current: Option<String> = None;
        let mut lines = text.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let line = raw.trim_start_matches('\u{feff}').trim();

            if line.is_empty()
                || line.starts_with(';')
                || line.starts_with('#')
                || line == REG_FILE_SIGNATURE
                || line == REG_FILE_SIGNATURE_V4
            {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let path = header.strip_suffix(']').ok_or_else(|| {
                    SyncError::format_error(format!("Unterminated section header at line {}", index + 1))
                })?;
                sections.entry(path.to_string()).or_default();
                current = Some(path.to_string());
                continue;
            }

            let Some(section) = current.as_ref() else {
                return Err(SyncError::format_error(format!(
                    "Value outside of any section at line {}",
                    index + 1
                )));
            };

            let (name, value) = split_entry(line).ok_or_else(|| {
                SyncError::format_error(format!("Expected name=value at line {}", index + 1))
            })?;

            let mut value = value.to_string();
            while line_continuation && value.ends_with('\\') {
                value.pop();
                match lines.next() {
                    Some((_, next)) => value.push_str(next.trim()),
                    None => break,
                }
            }

            sections
                .entry(section.clone())
                .or_default()
                .insert(name.to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    /// Returns the values of a section.
    pub fn section(&self, path: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(path)
    }

    /// Returns a raw value by exact section path and exact value name.
    pub fn get(&self, section: &str, name: &str) -> Option<&str> {
        self.section(section)?.get(name).map(String::as_str)
    }

    /// Iterates over `(section path, values)` in path order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.sections.iter().map(|(path, values)| (path.as_str(), values))
    }

    /// Returns true if the document has no sections.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Creates an empty section unless it exists.
    pub fn ensure_section(&mut self, section: &str) {
        self.sections.entry(section.to_string()).or_default();
    }

    /// Inserts or replaces a value, creating the section if needed.
    pub fn insert(&mut self, section: &str, name: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Renders the document in registry editor format.
    pub fn render(&self) -> String {
        render_sections(&self.sections, None)
    }
}

/// Looks up a value name case-insensitively, as the registry does.
///
/// Quotes around stored names are ignored.
pub fn value_ignore_case<'a>(values: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    values
        .iter()
        .find(|(key, _)| crate::codec::unquote(key).eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Splits `name=value`, honouring a quoted name that may contain `=`.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        let close = rest.find('"')? + 1;
        let (name, tail) = line.split_at(close + 1);
        let value = tail.trim_start().strip_prefix('=')?;
        return Some((name.trim(), value.trim()));
    }

    let (name, value) = line.split_once('=')?;
    Some((name.trim(), value.trim()))
}

/// Prepends `prefix` to a section path unless it is absolute or already
/// carries the prefix.
pub fn with_prefix(prefix: &str, section: &str) -> String {
    if section.starts_with('\\') || section.starts_with(prefix) {
        section.to_string()
    } else {
        format!("{prefix}\\{section}")
    }
}

fn render_sections(sections: &Sections, prefix: Option<&str>) -> String {
    let mut out = String::from(REG_FILE_SIGNATURE);
    out.push('\n');

    for (path, values) in sections {
        let path = match prefix {
            Some(prefix) => with_prefix(prefix, path),
            None => path.clone(),
        };
        out.push('\n');
        out.push_str(&format!("[{path}]\n"));
        for (name, value) in values {
            out.push_str(&format!("{name}={value}\n"));
        }
    }

    out
}

/// Pending registry import: section path → value name → encoded value.
///
/// Values inserted for the same section merge into one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryPatch {
    sections: Sections,
}

impl RegistryPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name=value` in `section`.
    pub fn insert(&mut self, section: impl Into<String>, name: impl Into<String>, value: impl Into<String>) {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Iterates over `(section path, values)` in path order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.sections.iter().map(|(path, values)| (path.as_str(), values))
    }

    /// Returns a value by exact section path and name.
    pub fn get(&self, section: &str, name: &str) -> Option<&str> {
        self.sections.get(section)?.get(name).map(String::as_str)
    }

    /// Returns true if the patch carries no values.
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    /// Number of value lines in the patch.
    pub fn value_count(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }

    /// Renders the patch as an importable registry file.
    ///
    /// With `prefix`, section paths are rooted under the editor's exchange
    /// prefix (see [`with_prefix`]).
    pub fn render(&self, prefix: Option<&str>) -> String {
        render_sections(&self.sections, prefix)
    }
}
