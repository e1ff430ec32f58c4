#![allow(clippy::unwrap_used)]
// Integration tests for the snapshot file and `MemoryQubes` persistence.

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use qubes_admin::{
    AdminClient, AssignmentMode, DevClass, DeviceAssignment, DeviceInfo, DeviceInterface, Domain,
    DomainClass, DomainState, MemoryQubes, Port, Snapshot,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn sample() -> Snapshot {
    let keyboard = DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "046d:c31c")
        .with_vendor("Logitech")
        .with_product("Keyboard K120")
        .with_interfaces(vec![DeviceInterface::new("u030101").unwrap()]);

    let mut usb = DomainState::from(
        Domain::new("sys-usb", DomainClass::AppVM)
            .running(true)
            .with_feature("servicevm", "1"),
    );
    usb.exposed.push(keyboard.clone());

    let mut work = DomainState::from(Domain::new("work", DomainClass::AppVM).with_template("fedora-40"));
    work.assigned.push(
        DeviceAssignment::for_device(&keyboard, "work", AssignmentMode::AutoAttach).with_option("read-only"),
    );
    work.denied.push(DeviceInterface::new("u07****").unwrap());

    Snapshot {
        domains: vec![
            DomainState::from(Domain::new("dom0", DomainClass::AdminVM)),
            DomainState::from(Domain::new("fedora-40", DomainClass::TemplateVM)),
            usb,
            work,
        ],
    }
}

// ── Snapshot files ──────────────────────────────────────────────────

#[test]
fn test_toml_snapshot_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qubes.toml");

    sample().save(&path).unwrap();
    assert_eq!(Snapshot::load(&path).unwrap(), sample());
}

#[test]
fn test_json_snapshot_selected_by_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("qubes.json");

    sample().save(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.trim_start().starts_with('{'), "expected JSON, got: {text}");
    assert_eq!(Snapshot::load(&path).unwrap(), sample());
}

#[test]
fn test_invalid_interface_in_state_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qubes.toml");
    std::fs::write(
        &path,
        "[[domains]]\nname = \"work\"\ndenied = [\"x123\"]\n",
    )
    .unwrap();

    assert!(Snapshot::load(&path).is_err());
}

// ── Autosave ────────────────────────────────────────────────────────

#[test]
fn test_open_missing_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let qubes = MemoryQubes::open(&dir.path().join("absent.toml")).unwrap();
    assert!(qubes.domains().unwrap().is_empty());
}

#[test]
fn test_mutations_are_written_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qubes.toml");
    sample().save(&path).unwrap();

    {
        let qubes = MemoryQubes::open(&path).unwrap();
        qubes
            .deny("work", &DeviceInterface::new("b******").unwrap())
            .unwrap();
        qubes.shutdown("sys-usb", false).unwrap();
    }

    let reopened = MemoryQubes::open(&path).unwrap();
    assert_eq!(
        reopened.denied("work").unwrap(),
        vec![
            DeviceInterface::new("u07****").unwrap(),
            DeviceInterface::new("b******").unwrap(),
        ]
    );
    assert!(!reopened.domain("sys-usb").unwrap().running);
    assert_eq!(
        reopened.assigned_devices("work", DevClass::Usb).unwrap().len(),
        1
    );
}

#[test]
fn test_derived_vms_follow_template_property() {
    let qubes = MemoryQubes::from_snapshot(sample());
    let derived: Vec<String> = qubes
        .derived_vms("fedora-40")
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(derived, vec!["work"]);
}
