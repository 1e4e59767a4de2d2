//! Windows registry device store reader.
//!
//! Parses text exported for [`BT_KEYS_SECTION`]. Two device shapes coexist:
//!
//! ```text
//! [...\Keys\d46d6d97629b]                 legacy: one value per device
//! "a4bfc6d0e5ff"=hex:a4,3c,...
//! "MasterIRK"=hex:...                     (ignored)
//!
//! [...\Keys\d46d6d97629b\c29e1de23da5]    BLE 5.1: one section per device
//! "LTK"=hex:...
//! "ERand"=hex(b):...
//! "EDIV"=dword:...
//! ```

use crate::codec::{
    ediv_from_reg_text, hex_from_reg_value, is_mac_reg_key, mac_from_reg_key, qword_from_reg_value,
};
use crate::device::{Credential, DeviceRecord, Source, BT_KEYS_SECTION, EDIV_VALUE, ERAND_VALUE, LTK_VALUE};
use crate::error::Result;
use crate::hive_editor::HiveEditor;
use crate::mac::Mac;
use crate::regtext::{value_ignore_case, SectionDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

static ADAPTER_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Services\\BTHPORT\\Parameters\\Keys\\([0-9a-f]{12})$").expect("static adapter section pattern")
});

static DEVICE_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Services\\BTHPORT\\Parameters\\Keys\\([0-9a-f]{12})\\([0-9a-f]{12})$")
        .expect("static device section pattern")
});

/// Extracts the adapter MAC from a legacy adapter section path.
///
/// ```rust
/// # use bt_dualboot::windows::extract_adapter_mac;
/// let key = r"ControlSet001\Services\BTHPORT\Parameters\Keys\d46d6d97629b";
/// assert_eq!(extract_adapter_mac(key).unwrap().to_string(), "D4:6D:6D:97:62:9B");
/// ```
pub fn extract_adapter_mac(section: &str) -> Option<Mac> {
    let captures = ADAPTER_SECTION.captures(section)?;
    mac_from_reg_key(captures.get(1)?.as_str()).ok()
}

/// Extracts `(adapter, device)` MACs from a BLE device section path.
pub fn extract_device_section_macs(section: &str) -> Option<(Mac, Mac)> {
    let captures = DEVICE_SECTION.captures(section)?;
    let adapter = mac_from_reg_key(captures.get(1)?.as_str()).ok()?;
    let device = mac_from_reg_key(captures.get(2)?.as_str()).ok()?;
    Some((adapter, device))
}

fn legacy_devices(adapter_mac: Mac, values: &BTreeMap<String, String>) -> Result<Vec<DeviceRecord>> {
    let mut devices = Vec::new();
    for (name, value) in values {
        if !is_mac_reg_key(name) {
            continue;
        }
        let mac = mac_from_reg_key(name)?;
        let key = hex_from_reg_value(value)?;
        if key.is_empty() {
            warn!(%mac, %adapter_mac, "Empty link key, device skipped");
            continue;
        }
        let credential = Credential::pairing_key(&key)?;
        devices.push(DeviceRecord::new(Source::Windows, mac, adapter_mac, credential));
    }
    Ok(devices)
}

fn long_term_key_device(
    section: &str,
    adapter_mac: Mac,
    mac: Mac,
    values: &BTreeMap<String, String>,
) -> Result<Option<DeviceRecord>> {
    let ltk = value_ignore_case(values, LTK_VALUE);
    let rand = value_ignore_case(values, ERAND_VALUE);
    let ediv = value_ignore_case(values, EDIV_VALUE);

    match (ltk, rand, ediv) {
        (Some(ltk), Some(rand), Some(ediv)) => {
            let ltk = hex_from_reg_value(ltk)?;
            if ltk.is_empty() {
                warn!(section, "Empty LTK, device skipped");
                return Ok(None);
            }
            let credential = Credential::long_term_key(
                &ltk,
                qword_from_reg_value(rand)?,
                ediv_from_reg_text(ediv)?,
            )?;
            Ok(Some(DeviceRecord::new(Source::Windows, mac, adapter_mac, credential)))
        }
        (None, None, None) => Ok(None),
        _ => {
            warn!(section, "Incomplete LTK/ERand/EDIV triple, device skipped");
            Ok(None)
        }
    }
}

/// Parses device records from exported registry text.
///
/// Sections matching neither device shape are skipped.
pub fn devices_from_export(text: &str) -> Result<Vec<DeviceRecord>> {
    let doc = SectionDocument::parse(text)?;
    let mut devices = Vec::new();

    for (section, values) in doc.sections() {
        if let Some(adapter_mac) = extract_adapter_mac(section) {
            devices.extend(legacy_devices(adapter_mac, values)?);
        } else if let Some((adapter_mac, mac)) = extract_device_section_macs(section) {
            devices.extend(long_term_key_device(section, adapter_mac, mac, values)?);
        }
    }

    Ok(devices)
}

/// Reads all paired devices from the Windows hive through `editor`.
#[instrument(skip(editor))]
pub fn get_devices<E: HiveEditor + ?Sized>(editor: &E) -> Result<Vec<DeviceRecord>> {
    let exported = editor.export(BT_KEYS_SECTION)?;
    let devices = devices_from_export(&exported)?;
    debug!(count = devices.len(), "Read Windows devices");
    Ok(devices)
}
