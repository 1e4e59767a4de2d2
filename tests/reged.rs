//! `Reged` editor against a scripted stand-in for the real tool.
//!
//! Runs as a single test: the script is written and executed from one
//! thread only.

#![cfg(unix)]

use bt_dualboot::device::BT_KEYS_SECTION;
use bt_dualboot::hive_editor::EXCHANGE_PREFIX;
use bt_dualboot::{HiveEditor, ImportMode, Reged, RegistryPatch, SyncError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const FAKE_REGED: &str = r#"#!/bin/sh
dir=$(dirname "$0")
printf '%s\n' "$*" >> "$dir/calls.log"
if [ "$1" = "-x" ]; then
    if [ -f "$dir/export_fails" ]; then
        echo "key not found" >&2
        exit 1
    fi
    printf 'Windows Registry Editor Version 5.00\r\n\r\n[%s\\%s\\a46b6c9de2fb]\r\n"a4bfc6d0e5ff"=hex:a4,3c,6b,d9\r\n' "$3" "$4" > "$5"
    exit 0
fi
for last; do :; done
cp "$last" "$dir/imported.reg"
if [ -f "$dir/import_fails" ]; then
    echo "hive is read only"
    exit 1
fi
exit 2
"#;

fn write_script(dir: &Path) -> std::path::PathBuf {
    let script = dir.join("reged");
    fs::write(&script, FAKE_REGED).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[test]
fn test_reged_export_import_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let hive = dir.path().join("SYSTEM");
    fs::write(&hive, b"regf").unwrap();
    let mut reged = Reged::new(&hive).with_program(&script);

    // export
    let exported = reged.export(BT_KEYS_SECTION).unwrap();
    assert!(exported.contains(&format!("[{EXCHANGE_PREFIX}\\{BT_KEYS_SECTION}\\a46b6c9de2fb]")));
    let devices = bt_dualboot::windows::devices_from_export(&exported).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].mac.to_string(), "A4:BF:C6:D0:E5:FF");

    // safe import
    let mut patch = RegistryPatch::new();
    patch.insert(format!("{BT_KEYS_SECTION}\\a46b6c9de2fb"), "\"a4bfc6d0e5ff\"", "hex:01,02,03,04");
    reged.import(&patch, ImportMode::Safe).unwrap();

    let imported = fs::read_to_string(dir.path().join("imported.reg")).unwrap();
    assert!(imported.contains(&format!("[{EXCHANGE_PREFIX}\\{BT_KEYS_SECTION}\\a46b6c9de2fb]")));
    assert!(imported.contains("\"a4bfc6d0e5ff\"=hex:01,02,03,04"));

    // structural import drops -N -E
    reged.import(&patch, ImportMode::Structural).unwrap();

    let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap();
    let calls: Vec<&str> = calls.lines().collect();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with(&format!("-x {} {EXCHANGE_PREFIX} {BT_KEYS_SECTION} ", hive.display())));
    assert!(calls[1].starts_with(&format!("-N -E -I -C {} {EXCHANGE_PREFIX} ", hive.display())));
    assert!(calls[2].starts_with(&format!("-I -C {} {EXCHANGE_PREFIX} ", hive.display())));

    // failures surface as ExternalToolFailure
    fs::write(dir.path().join("import_fails"), b"").unwrap();
    match reged.import(&patch, ImportMode::Safe) {
        Err(SyncError::ExternalToolFailure(message)) => assert!(message.contains("hive is read only")),
        other => panic!("expected ExternalToolFailure, got {other:?}"),
    }

    fs::write(dir.path().join("export_fails"), b"").unwrap();
    match reged.export(BT_KEYS_SECTION) {
        Err(SyncError::ExternalToolFailure(message)) => assert!(message.contains("key not found")),
        other => panic!("expected ExternalToolFailure, got {other:?}"),
    }
}
