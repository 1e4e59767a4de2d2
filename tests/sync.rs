//! End-to-end sync tests against a BlueZ tree on disk and an in-memory hive.
//!
//! Layout:
//!
//! ```text
//! adapter A4:6B:6C:9D:E2:FB
//!     A4:BF:C6:D0:E5:FF   same key on both sides
//!     B6:C2:D3:E5:F2:0D   same key on both sides
//!     C2:9E:1D:E2:3D:A5   keys differ
//!     D1:8A:4E:71:5D:C1   Linux only
//!     E9:1D:FE:2A:C3:C8   Windows only
//! adapter B4:6B:6C:9D:E2:FB
//!     A4:80:1D:C5:4F:7E   same key on both sides
//!     B8:94:A5:FD:F1:0A   keys differ
//!     C4:72:B3:6F:82:42   Linux only
//! ```

use bt_dualboot::codec::{hex_to_reg_value, mac_to_reg_key, quote};
use bt_dualboot::device::BT_KEYS_SECTION;
use bt_dualboot::{
    Anomaly, Credential, DeviceRecord, HiveEditor, ImportMode, LinuxStore, Mac, MemoryHive, NotFoundReason,
    RegistryPatch, Source, SyncError, SyncManager,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ADAPTER_A: &str = "A4:6B:6C:9D:E2:FB";
const ADAPTER_B: &str = "B4:6B:6C:9D:E2:FB";

const PUSH_MAC1: &str = "C2:9E:1D:E2:3D:A5";
const PUSH_MAC2: &str = "B8:94:A5:FD:F1:0A";

/// (adapter, device, Linux key, Windows key)
const SCHEME: &[(&str, &str, Option<&str>, Option<&str>)] = &[
    (ADAPTER_A, "A4:BF:C6:D0:E5:FF", Some("A43C6BD9E1592C1FFA0DE17F3DB6F38B"), Some("A43C6BD9E1592C1FFA0DE17F3DB6F38B")),
    (ADAPTER_A, "B6:C2:D3:E5:F2:0D", Some("A515CBE4E8F2E236FF999C0A53369EF6"), Some("A515CBE4E8F2E236FF999C0A53369EF6")),
    (ADAPTER_A, PUSH_MAC1, Some("C29E1DE23DA5C29E1DE23DA5C29E1DE2"), Some("12121212121212121212121212121212")),
    (ADAPTER_A, "D1:8A:4E:71:5D:C1", Some("D18A4E715DC1D18A4E715DC1D18A4E71"), None),
    (ADAPTER_A, "E9:1D:FE:2A:C3:C8", None, Some("34343434343434343434343434343434")),
    (ADAPTER_B, "A4:80:1D:C5:4F:7E", Some("A12B5D441EC1A9D517794FC2B4889202"), Some("A12B5D441EC1A9D517794FC2B4889202")),
    (ADAPTER_B, PUSH_MAC2, Some("B894A5FDF10AB894A5FDF10AB894A5FD"), Some("71717171717171717171717171717171")),
    (ADAPTER_B, "C4:72:B3:6F:82:42", Some("C472B36F8242C472B36F8242C472B36F"), None),
];

fn mac(text: &str) -> Mac {
    text.parse().unwrap()
}

fn write_info(root: &Path, adapter: &str, device: &str, body: &str) {
    let dir = root.join(adapter).join(device);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("info"), body).unwrap();
}

fn link_key_info(name: &str, key: &str) -> String {
    format!("[General]\nName={name}\nClass=0x000540\n\n[LinkKey]\nKey={key}\nType=4\nPINLength=0\n")
}

fn legacy_section(adapter: &str) -> String {
    format!("{BT_KEYS_SECTION}\\{}", mac_to_reg_key(&mac(adapter)))
}

struct Fixture {
    // Keeps the BlueZ tree alive for the duration of the test.
    _linux_dir: TempDir,
    manager: SyncManager<MemoryHive>,
}

impl Fixture {
    fn new() -> Self {
        let linux_dir = tempfile::tempdir().unwrap();
        let mut seed = RegistryPatch::new();

        for (adapter, device, linux_key, windows_key) in SCHEME {
            if let Some(key) = linux_key {
                write_info(linux_dir.path(), adapter, device, &link_key_info(&format!("DEV-{device}"), key));
            }
            if let Some(key) = windows_key {
                seed.insert(
                    legacy_section(adapter),
                    quote(&mac_to_reg_key(&mac(device))),
                    hex_to_reg_value(key).unwrap(),
                );
            }
        }

        let mut hive = MemoryHive::new();
        hive.import(&seed, ImportMode::Structural).unwrap();

        Self {
            manager: SyncManager::new(hive, LinuxStore::new(linux_dir.path())),
            _linux_dir: linux_dir,
        }
    }

    fn linux_root(&self) -> &Path {
        self.manager.linux_store().root()
    }

    fn hive_text(&self) -> String {
        self.manager.editor().export(BT_KEYS_SECTION).unwrap()
    }
}

fn sorted_macs(devices: &[DeviceRecord]) -> Vec<String> {
    let mut macs: Vec<String> = devices.iter().map(|device| device.mac.to_string()).collect();
    macs.sort();
    macs
}

fn assert_not_found(result: bt_dualboot::Result<bt_dualboot::PushOutcome>, expected: NotFoundReason) {
    match result {
        Err(err @ SyncError::DeviceNotFound { .. }) => {
            assert!(err.to_string().contains("Not found"), "{err}");
            if let SyncError::DeviceNotFound { reason, .. } = err {
                assert_eq!(reason, expected);
            }
        }
        other => panic!("expected DeviceNotFound({expected:?}), got {other:?}"),
    }
}

#[test]
fn test_initial_classification() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    assert_eq!(
        sorted_macs(&manager.devices_both_synced().unwrap()),
        vec!["A4:80:1D:C5:4F:7E", "A4:BF:C6:D0:E5:FF", "B6:C2:D3:E5:F2:0D"]
    );
    assert_eq!(
        sorted_macs(&manager.devices_needing_sync().unwrap()),
        vec![PUSH_MAC2, PUSH_MAC1]
    );
    assert_eq!(
        sorted_macs(&manager.devices_absent_on_windows().unwrap()),
        vec!["C4:72:B3:6F:82:42", "D1:8A:4E:71:5D:C1"]
    );
    assert!(manager.warnings().unwrap().is_empty());
}

#[test]
fn test_classification_partitions_linux_devices() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    let mut all = manager.devices_both_synced().unwrap();
    all.extend(manager.devices_needing_sync().unwrap());
    all.extend(manager.devices_absent_on_windows().unwrap());

    let linux = manager.linux_store().devices().unwrap();
    assert_eq!(all.len(), linux.len());
    assert_eq!(sorted_macs(&all), sorted_macs(&linux));
    assert!(all.iter().all(|device| device.source == Source::Linux));
}

#[test]
fn test_push_single_mac_then_synced() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    let outcome = manager.push([mac(PUSH_MAC1)], false).unwrap();
    assert_eq!(outcome.pushed, vec![mac(PUSH_MAC1)]);
    assert!(!outcome.dry_run);
    assert_eq!(outcome.patch.value_count(), 1);

    assert_eq!(
        sorted_macs(&manager.devices_both_synced().unwrap()),
        vec!["A4:80:1D:C5:4F:7E", "A4:BF:C6:D0:E5:FF", "B6:C2:D3:E5:F2:0D", PUSH_MAC1]
    );
    assert_eq!(sorted_macs(&manager.devices_needing_sync().unwrap()), vec![PUSH_MAC2]);
    assert_eq!(
        sorted_macs(&manager.devices_absent_on_windows().unwrap()),
        vec!["C4:72:B3:6F:82:42", "D1:8A:4E:71:5D:C1"]
    );

    let value = manager
        .editor()
        .document()
        .get(&legacy_section(ADAPTER_A), "\"c29e1de23da5\"")
        .unwrap()
        .to_string();
    assert_eq!(value, "hex:c2,9e,1d,e2,3d,a5,c2,9e,1d,e2,3d,a5,c2,9e,1d,e2");
}

#[test]
fn test_push_accepts_macs_and_records() {
    let by_mac_list = {
        let mut fixture = Fixture::new();
        fixture.manager.push(vec![mac(PUSH_MAC1)], false).unwrap();
        fixture.hive_text()
    };

    let by_record = {
        let mut fixture = Fixture::new();
        let record = fixture
            .manager
            .devices_needing_sync()
            .unwrap()
            .into_iter()
            .find(|device| device.mac == mac(PUSH_MAC1))
            .unwrap();
        fixture.manager.push([record], false).unwrap();
        fixture.hive_text()
    };

    let by_record_refs = {
        let mut fixture = Fixture::new();
        let needing = fixture.manager.devices_needing_sync().unwrap();
        let targets: Vec<&DeviceRecord> = needing.iter().filter(|device| device.mac == mac(PUSH_MAC1)).collect();
        fixture.manager.push(targets, false).unwrap();
        fixture.hive_text()
    };

    assert_eq!(by_mac_list, by_record);
    assert_eq!(by_mac_list, by_record_refs);
}

#[test]
fn test_push_multiple_devices_in_one_import() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    let outcome = manager
        .push([mac(PUSH_MAC2), mac(PUSH_MAC1), mac(PUSH_MAC2)], false)
        .unwrap();

    assert_eq!(outcome.pushed, vec![mac(PUSH_MAC2), mac(PUSH_MAC1)]);
    assert_eq!(outcome.patch.value_count(), 2);
    assert_eq!(outcome.patch.sections().count(), 2);
    assert!(manager.devices_needing_sync().unwrap().is_empty());
    // one import from the seed, one from the push
    assert_eq!(manager.editor().import_count(), 2);
}

#[test]
fn test_push_unknown_mac_leaves_hive_untouched() {
    let mut fixture = Fixture::new();
    let before = fixture.hive_text();

    assert_not_found(
        fixture.manager.push([mac("AA:AA:AA:AA:AA:AA")], false),
        NotFoundReason::Unknown,
    );

    assert_eq!(fixture.hive_text(), before);
    assert_eq!(fixture.manager.editor().import_count(), 1);
}

#[test]
fn test_push_rejects_devices_outside_needs_sync() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    assert_not_found(manager.push([mac("A4:BF:C6:D0:E5:FF")], false), NotFoundReason::AlreadySynced);
    assert_not_found(manager.push([mac("D1:8A:4E:71:5D:C1")], false), NotFoundReason::AbsentOnWindows);
    assert_not_found(manager.push([mac("E9:1D:FE:2A:C3:C8")], false), NotFoundReason::AbsentOnLinux);
    assert_eq!(manager.editor().import_count(), 1);
}

#[test]
fn test_push_is_all_or_nothing() {
    let mut fixture = Fixture::new();
    let before = fixture.hive_text();

    assert_not_found(
        fixture
            .manager
            .push([mac(PUSH_MAC1), mac("AA:AA:AA:AA:AA:AA"), mac(PUSH_MAC2)], false),
        NotFoundReason::Unknown,
    );

    assert_eq!(fixture.hive_text(), before);
    assert_eq!(
        sorted_macs(&fixture.manager.devices_needing_sync().unwrap()),
        vec![PUSH_MAC2, PUSH_MAC1]
    );
}

#[test]
fn test_second_push_fails_already_synced() {
    let mut fixture = Fixture::new();
    let manager = &mut fixture.manager;

    manager.push([mac(PUSH_MAC1)], false).unwrap();
    assert_not_found(manager.push([mac(PUSH_MAC1)], false), NotFoundReason::AlreadySynced);
    assert_eq!(manager.editor().import_count(), 2);
}

#[test]
fn test_dry_run_stages_without_import() {
    let mut fixture = Fixture::new();
    let before = fixture.hive_text();

    let outcome = fixture.manager.push([mac(PUSH_MAC1)], true).unwrap();
    assert!(outcome.dry_run);
    assert_eq!(
        outcome.patch.get(&legacy_section(ADAPTER_A), "\"c29e1de23da5\""),
        Some("hex:c2,9e,1d,e2,3d,a5,c2,9e,1d,e2,3d,a5,c2,9e,1d,e2")
    );

    assert_eq!(fixture.hive_text(), before);
    assert_eq!(fixture.manager.editor().import_count(), 1);
}

#[test]
fn test_push_rereads_stores() {
    let mut fixture = Fixture::new();

    // populate the cache, then make PUSH_MAC1 synced behind the manager's back
    assert_eq!(fixture.manager.devices_needing_sync().unwrap().len(), 2);
    let mut patch = RegistryPatch::new();
    patch.insert(
        legacy_section(ADAPTER_A),
        "\"c29e1de23da5\"",
        hex_to_reg_value("C29E1DE23DA5C29E1DE23DA5C29E1DE2").unwrap(),
    );
    fixture
        .manager
        .editor_mut()
        .import(&patch, ImportMode::Safe)
        .unwrap();

    // the memoized index still reports the old state
    assert_eq!(fixture.manager.devices_needing_sync().unwrap().len(), 2);
    assert_not_found(fixture.manager.push([mac(PUSH_MAC1)], false), NotFoundReason::AlreadySynced);

    let in_sync = fixture
        .manager
        .with_no_cache(|manager| manager.devices_needing_sync().unwrap());
    assert_eq!(sorted_macs(&in_sync), vec![PUSH_MAC2]);
}

#[test]
fn test_long_term_key_push() {
    let mut fixture = Fixture::new();
    let device = "22:94:90:56:EE:38";
    write_info(
        fixture.linux_root(),
        ADAPTER_A,
        device,
        "[General]\nName=Mouse\n\n[LongTermKey]\nKey=00112233445566778899AABBCCDDEEFF\nAuthenticated=0\nEncSize=16\nEDiv=4660\nRand=1311768467294899695\n",
    );

    let section = format!("{}\\{}", legacy_section(ADAPTER_A), mac_to_reg_key(&mac(device)));
    let mut seed = RegistryPatch::new();
    seed.insert(section.clone(), "\"LTK\"", hex_to_reg_value("FFEEDDCCBBAA99887766554433221100").unwrap());
    seed.insert(section.clone(), "\"KeyLength\"", "dword:00000010");
    seed.insert(section.clone(), "\"ERand\"", "hex(b):00,00,00,00,00,00,00,00");
    seed.insert(section.clone(), "\"EDIV\"", "dword:00000000");
    fixture
        .manager
        .editor_mut()
        .import(&seed, ImportMode::Structural)
        .unwrap();
    fixture.manager.flush_cache();

    let needing = fixture.manager.devices_needing_sync().unwrap();
    assert_eq!(sorted_macs(&needing), vec![device, PUSH_MAC2, PUSH_MAC1]);

    let outcome = fixture.manager.push([mac(device)], false).unwrap();
    assert_eq!(outcome.patch.value_count(), 3);

    let doc = fixture.manager.editor().document();
    assert_eq!(doc.get(&section, "\"LTK\""), Some("hex:00,11,22,33,44,55,66,77,88,99,aa,bb,cc,dd,ee,ff"));
    assert_eq!(doc.get(&section, "\"ERand\""), Some("hex(b):ef,cd,ab,90,78,56,34,12"));
    assert_eq!(doc.get(&section, "\"EDIV\""), Some("dword:34120000"));
    assert_eq!(doc.get(&section, "\"KeyLength\""), Some("dword:00000010"));

    let synced = fixture.manager.devices_both_synced().unwrap();
    let pushed = synced.iter().find(|record| record.mac == mac(device)).unwrap();
    assert_eq!(
        pushed.credential,
        Credential::LongTermKey {
            ltk: "00112233445566778899AABBCCDDEEFF".to_string(),
            rand: 1311768467294899695,
            ediv: 4660,
        }
    );
}

#[test]
fn test_push_refuses_to_change_credential_kind() {
    let mut fixture = Fixture::new();
    write_info(
        fixture.linux_root(),
        ADAPTER_A,
        PUSH_MAC1,
        "[General]\nName=Repaired\n\n[LongTermKey]\nKey=00112233445566778899AABBCCDDEEFF\nEDiv=4660\nRand=1311768467294899695\n",
    );
    let Fixture { _linux_dir, manager } = fixture;
    let mut manager = manager.with_import_mode(ImportMode::Structural);
    let before = manager.editor().document().clone();

    let needing = manager.devices_needing_sync().unwrap();
    assert!(needing.iter().any(|device| device.mac == mac(PUSH_MAC1)));

    let err = manager.push([mac(PUSH_MAC1), mac(PUSH_MAC2)], false).unwrap_err();
    match &err {
        SyncError::CredentialMismatch { mac: rejected, linux, windows } => {
            assert_eq!(*rejected, mac(PUSH_MAC1));
            assert_eq!(*linux, "long term key");
            assert_eq!(*windows, "link key");
        }
        other => panic!("expected CredentialMismatch, got {other:?}"),
    }
    assert_eq!(manager.editor().document(), &before);

    let dry = manager.push([mac(PUSH_MAC1)], true);
    assert!(matches!(dry, Err(SyncError::CredentialMismatch { .. })));
}

#[test]
fn test_device_paired_with_two_adapters_warns() {
    let mut fixture = Fixture::new();
    write_info(
        fixture.linux_root(),
        ADAPTER_B,
        "A4:BF:C6:D0:E5:FF",
        &link_key_info("Twin", "00000000000000000000000000000000"),
    );
    fixture.manager.flush_cache();

    let warnings = fixture.manager.warnings().unwrap();
    assert_eq!(
        warnings,
        vec![Anomaly::MultipleAdapters {
            source: Source::Linux,
            mac: mac("A4:BF:C6:D0:E5:FF"),
            adapters: vec![mac(ADAPTER_A), mac(ADAPTER_B)],
        }]
    );

    // first record (adapter A) wins, so the device still counts as synced
    assert!(fixture
        .manager
        .devices_both_synced()
        .unwrap()
        .iter()
        .any(|device| device.mac == mac("A4:BF:C6:D0:E5:FF")));
}

#[test]
fn test_safe_import_refuses_new_device_values() {
    let hive = MemoryHive::new();
    let linux_dir = tempfile::tempdir().unwrap();
    let mut manager = SyncManager::new(hive, LinuxStore::new(linux_dir.path()));

    let mut patch = RegistryPatch::new();
    patch.insert(legacy_section(ADAPTER_A), "\"a4bfc6d0e5ff\"", "hex:01,02");
    assert!(matches!(
        manager.editor_mut().import(&patch, ImportMode::Safe),
        Err(SyncError::ExternalToolFailure(_))
    ));
    assert!(manager.editor().document().is_empty());
}
