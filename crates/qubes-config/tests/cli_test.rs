//! Integration tests for the `qubes-config` CLI binary.
//!
//! Every test runs against a state snapshot and policy directory in a
//! temporary directory, so nothing touches a real system.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use qubes_admin::{DevClass, DeviceInfo, Domain, DomainClass, DomainState, Port, Snapshot};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// A scratch system: dom0, a template, a USB qube exposing a stick and
/// two app qubes based on the template.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut usb = DomainState::from(
            Domain::new("sys-usb", DomainClass::AppVM)
                .with_template("fedora")
                .with_feature("servicevm", "1")
                .running(true),
        );
        usb.exposed.push(
            DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "0951:1666")
                .with_vendor("Kingston")
                .with_product("DataTraveler"),
        );
        let snapshot = Snapshot {
            domains: vec![
                Domain::new("dom0", DomainClass::AdminVM).running(true).into(),
                Domain::new("fedora", DomainClass::TemplateVM).running(true).into(),
                usb,
                Domain::new("work", DomainClass::AppVM)
                    .with_template("fedora")
                    .running(true)
                    .into(),
                Domain::new("personal", DomainClass::AppVM)
                    .with_template("fedora")
                    .into(),
            ],
        };
        snapshot.save(&dir.path().join("state.toml")).unwrap();
        Self { dir }
    }

    fn state(&self) -> PathBuf {
        self.dir.path().join("state.toml")
    }

    fn policy_dir(&self) -> PathBuf {
        self.dir.path().join("policy.d")
    }

    /// Build a [`Command`] with env isolation and this fixture's backend.
    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = qubes_config_cmd(self.dir.path());
        cmd.arg("--state")
            .arg(self.state())
            .arg("--policy-dir")
            .arg(self.policy_dir());
        cmd
    }

    fn saved(&self) -> Snapshot {
        Snapshot::load(&self.state()).unwrap()
    }
}

/// Build a [`Command`] for the binary that cannot see the user's settings.
///
/// Clears all `QUBES_CONFIG_*` env vars and points config directories at
/// `home`.
fn qubes_config_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("qubes-config");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("QUBES_CONFIG_OUTPUT")
        .env_remove("QUBES_CONFIG_STATE")
        .env_remove("QUBES_CONFIG_POLICY_DIR")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim_end().to_owned()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let fx = Fixture::new();
    let output = fx.cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let fx = Fixture::new();
    fx.cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Qubes")
            .and(predicate::str::contains("assignments"))
            .and(predicate::str::contains("policy"))
            .and(predicate::str::contains("restart")),
    );
}

#[test]
fn test_version_flag() {
    let fx = Fixture::new();
    fx.cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("qubes-config"));
}

#[test]
fn test_completions_bash() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_output_format() {
    let fx = Fixture::new();
    let output = fx.cmd().args(["-o", "xml", "pages"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Pages ───────────────────────────────────────────────────────────

#[test]
fn test_pages_plain_lists_every_page() {
    let fx = Fixture::new();
    let output = fx.cmd().args(["-o", "plain", "pages"]).output().unwrap();
    assert!(output.status.success());
    insta::assert_snapshot!(stdout(&output), @r"
    basics
    usb
    updates
    splitgpg
    clipboard
    file
    url
    thisdevice
    devices
    ");
}

#[test]
fn test_open_at_resolves_location() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["pages", "--open-at", "devices#blocks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("devices#blocks"));
}

#[test]
fn test_open_at_unknown_page_warns_and_succeeds() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["pages", "--open-at", "nowhere"])
        .assert()
        .success()
        .stdout(predicate::str::contains("basics"))
        .stderr(predicate::str::contains("Page not found: nowhere"));
}

#[test]
fn test_open_at_unknown_location_keeps_page() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["pages", "--open-at", "usb#nothing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("usb"))
        .stderr(predicate::str::contains("Location nothing not found on page usb"));
}

// ── Devices & assignments ───────────────────────────────────────────

#[test]
fn test_devices_list_plain() {
    let fx = Fixture::new();
    let output = fx.cmd().args(["-o", "plain", "devices", "list"]).output().unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    insta::assert_snapshot!(stdout(&output), @"sys-usb:2-1");
}

#[test]
fn test_assignment_add_persists_and_lists() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["assignments", "add", "-d", "sys-usb:2-1", "-f", "work"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));

    let work = fx
        .saved()
        .domains
        .into_iter()
        .find(|d| d.domain.name == "work")
        .unwrap();
    assert_eq!(work.assigned.len(), 1);
    assert_eq!(work.assigned[0].device_id, "0951:1666");

    let output = fx
        .cmd()
        .args(["-o", "json", "assignments", "list"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["frontends"][0], "work");
    assert_eq!(rows[0]["mode"], "auto-attach");
    assert_eq!(rows[0]["port"], "sys-usb:2-1");
}

#[test]
fn test_required_rule_lands_in_required_list() {
    let fx = Fixture::new();
    fx.cmd()
        .args([
            "assignments", "add", "-d", "sys-usb:2-1", "-f", "work", "-m", "required",
        ])
        .assert()
        .success();

    let auto = fx
        .cmd()
        .args(["-o", "plain", "assignments", "list"])
        .output()
        .unwrap();
    assert_eq!(stdout(&auto), "");

    let required = fx
        .cmd()
        .args(["-o", "plain", "assignments", "list", "-l", "required"])
        .output()
        .unwrap();
    assert_eq!(stdout(&required), "0");
}

#[test]
fn test_assignment_unknown_device_is_not_found() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["assignments", "add", "-d", "sys-usb:9-9", "-f", "work"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
}

#[test]
fn test_assignment_bad_device_syntax_is_usage_error() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["assignments", "add", "-d", "sys-usb", "-f", "work"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("BACKEND:PORT"));
}

#[test]
fn test_remove_missing_row_is_not_found() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["--yes", "assignments", "remove", "3"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn test_remove_without_terminal_requires_yes() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["assignments", "add", "-d", "sys-usb:2-1", "-f", "work"])
        .assert()
        .success();

    let output = fx.cmd().args(["assignments", "remove", "0"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "{}", combined_output(&output));
    assert_eq!(fx.saved().domains.iter().map(|d| d.assigned.len()).sum::<usize>(), 1);

    fx.cmd()
        .args(["--yes", "assignments", "remove", "0"])
        .assert()
        .success();
    assert_eq!(fx.saved().domains.iter().map(|d| d.assigned.len()).sum::<usize>(), 0);
}

// ── Blocks ──────────────────────────────────────────────────────────

#[test]
fn test_block_add_denies_category_codes() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["blocks", "add", "--vm", "work", "-c", "usb_storage"])
        .assert()
        .success();

    let work = fx
        .saved()
        .domains
        .into_iter()
        .find(|d| d.domain.name == "work")
        .unwrap();
    assert!(!work.denied.is_empty());

    fx.cmd()
        .args(["-o", "json", "blocks", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("usb_storage"));
}

#[test]
fn test_block_unknown_category_is_usage_error() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["blocks", "add", "--vm", "work", "-c", "toaster"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("toaster"));
}

#[test]
fn test_block_on_unknown_qube_is_not_found() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["blocks", "add", "--vm", "ghost", "-c", "network"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

// ── Policy ──────────────────────────────────────────────────────────

#[test]
fn test_policy_show_defaults_without_file() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["policy", "show", "clipboard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qubes.ClipboardPaste"));
}

#[test]
fn test_policy_add_rule_writes_file() {
    let fx = Fixture::new();
    fx.cmd()
        .args([
            "policy", "add-rule", "filecopy", "-s", "work", "-t", "personal", "-a", "deny",
        ])
        .assert()
        .success();

    fx.cmd()
        .args(["policy", "show", "filecopy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qubes.Filecopy\t*\twork\tpersonal\tdeny"));

    let written: Vec<_> = std::fs::read_dir(fx.policy_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        written.iter().any(|name| name.starts_with("50-config-filecopy")),
        "{written:?}"
    );
}

#[test]
fn test_policy_invalid_rule_is_rejected() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args([
            "policy", "add-rule", "filecopy", "-s", "ghost", "-t", "personal", "-a", "deny",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(!fx.policy_dir().join("50-config-filecopy.policy").exists());
}

#[test]
fn test_key_qube_needs_splitgpg() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["policy", "add-key-qube", "clipboard", "work"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Updates & restart ───────────────────────────────────────────────

#[test]
fn test_update_check_set_and_show() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["updates", "check", "set", "--dom0", "false", "--exception", "work"])
        .assert()
        .success();

    let output = fx
        .cmd()
        .args(["-o", "json", "updates", "check", "show"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(state["dom0"], false);
    assert_eq!(state["exceptions"][0], "work");
}

#[test]
fn test_restart_dry_run_lists_candidates() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["-o", "plain", "restart", "-t", "fedora", "--dry-run"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    insta::assert_snapshot!(stdout(&output), @r"
    sys-usb
    work
    ");
    assert!(String::from_utf8_lossy(&output.stderr).contains("fedora"));
}

#[test]
fn test_restart_shuts_down_selected() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["--yes", "restart", "-t", "fedora", "--other", "true"])
        .assert()
        .success();

    let saved = fx.saved();
    let running = |name: &str| {
        saved
            .domains
            .iter()
            .find(|d| d.domain.name == name)
            .unwrap()
            .domain
            .running
    };
    assert!(!running("work"));
    assert!(!running("fedora"));
    assert!(running("sys-usb"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_defaults() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("debounce_ms = 300"));
}

#[test]
fn test_config_path_is_toml_file() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("config.toml\n"));
}
