#![allow(clippy::unwrap_used)]
// Handler scenarios against the in-process admin backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use qubes_admin::client::method::{SHUTDOWN, START};
use qubes_admin::{
    AdminClient, AssignmentMode, Call, DevClass, DeviceAssignment, DeviceInfo, DeviceInterface,
    Domain, DomainClass, MemoryPolicyStore, MemoryQubes, PolicyStore, Port, TOKEN_ANY, WILDCARD,
};
use qubes_config_core::devices::parse_interfaces;
use qubes_config_core::policy::{Action, CLIPBOARD_POLICY};
use qubes_config_core::{
    AttachmentKind, CategoryId, DevicesHandler, GlobalConfig, Locale, PageContext, PageHandler,
    PageId, PolicyHandler, RestartPlan, RestartSelection, RestartStatus, Restarter, RowList,
    RuleEdit, UnsavedDecision,
};

// ── Fixtures ────────────────────────────────────────────────────────

fn usb_key() -> DeviceInfo {
    DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "1050:0407:u030000")
        .with_vendor("Yubico")
        .with_product("YubiKey")
}

fn qubes() -> Arc<MemoryQubes> {
    let qubes = Arc::new(MemoryQubes::new());
    qubes.insert_domain(Domain::new("dom0", DomainClass::AdminVM).running(true));
    qubes.insert_domain(Domain::new("sys-usb", DomainClass::AppVM).running(true));
    for name in ["personal", "work", "vault", "untrusted"] {
        qubes.insert_domain(Domain::new(name, DomainClass::AppVM));
    }
    qubes.expose(usb_key()).unwrap();
    qubes
}

fn assign(qubes: &MemoryQubes, frontend: &str) -> DeviceAssignment {
    let assignment = DeviceAssignment::for_device(&usb_key(), frontend, AssignmentMode::AutoAttach);
    qubes.assign(&assignment).unwrap();
    assignment
}

fn devices(qubes: &Arc<MemoryQubes>) -> DevicesHandler {
    let client: Arc<dyn AdminClient> = qubes.clone();
    DevicesHandler::new(client, Locale::identity()).unwrap()
}

fn methods(calls: &[Call]) -> Vec<(String, String)> {
    calls
        .iter()
        .map(|c| (c.dest.clone(), c.method.clone()))
        .collect()
}

// ── Grouping ────────────────────────────────────────────────────────

#[test]
fn test_same_key_assignments_collapse_into_one_row() {
    let qubes = qubes();
    assign(&qubes, "work");
    assign(&qubes, "personal");

    let handler = devices(&qubes);
    let rows = handler.attachments(AttachmentKind::Auto).rows();
    assert_eq!(rows.len(), 1);
    let frontends: BTreeSet<&str> = rows[0].wrapper.frontends().iter().map(String::as_str).collect();
    assert_eq!(frontends, BTreeSet::from(["personal", "work"]));
}

#[test]
fn test_differing_options_stay_apart() {
    let qubes = qubes();
    assign(&qubes, "work");
    let read_only = DeviceAssignment::for_device(&usb_key(), "personal", AssignmentMode::AutoAttach)
        .with_option("read-only");
    qubes.assign(&read_only).unwrap();

    let handler = devices(&qubes);
    assert_eq!(handler.attachments(AttachmentKind::Auto).rows().len(), 2);
}

// ── Options and validity ────────────────────────────────────────────

#[test]
fn test_unknown_option_blocks_editing() {
    let qubes = qubes();
    let odd = DeviceAssignment::for_device(&usb_key(), "work", AssignmentMode::AutoAttach)
        .with_option("frobnicate");
    qubes.assign(&odd).unwrap();

    let handler = devices(&qubes);
    let row = &handler.attachments(AttachmentKind::Auto).rows()[0];
    assert!(!row.wrapper.is_valid());
    assert!(!row.editable);
    assert_eq!(
        row.tooltip.as_deref(),
        Some("This rule cannot be edited with GUI tools.")
    );
    assert!(handler.edit_attachment(AttachmentKind::Auto, 0).is_err());
}

#[test]
fn test_double_wildcard_group_is_invalid() {
    let qubes = qubes();
    let mut anything = DeviceAssignment::for_device(&usb_key(), "work", AssignmentMode::AutoAttach);
    anything.port_id = WILDCARD.into();
    anything.device_id = WILDCARD.into();
    qubes.assign(&anything).unwrap();

    let handler = devices(&qubes);
    let row = &handler.attachments(AttachmentKind::Auto).rows()[0];
    assert!(!row.wrapper.is_valid());
}

#[test]
fn test_required_block_options_survive_a_save() {
    let qubes = qubes();
    let disk = DeviceInfo::new(Port::new("sys-usb", "sda", DevClass::Block), "SanDisk_Cruzer");
    qubes.expose(disk.clone()).unwrap();

    let mut handler = devices(&qubes);
    let mut draft = handler.new_attachment(AttachmentKind::Required);
    draft.select_device(disk);
    draft.frontends = vec!["vault".into()];
    draft.read_only = true;
    handler.add_attachment(&draft).unwrap();
    handler.save().unwrap();

    let reloaded = devices(&qubes);
    let row = &reloaded.attachments(AttachmentKind::Required).rows()[0];
    assert!(row.wrapper.read_only());
    assert!(!row.wrapper.permissive());
    assert!(!row.wrapper.no_strict_reset());
    assert!(row.editable);
}

// ── Save semantics ──────────────────────────────────────────────────

#[test]
fn test_editing_frontends_recreates_the_whole_group() {
    let qubes = qubes();
    assign(&qubes, "personal");
    assign(&qubes, "work");

    let mut handler = devices(&qubes);
    let mut draft = handler.edit_attachment(AttachmentKind::Auto, 0).unwrap();
    draft.frontends = vec!["work".into(), "vault".into()];
    handler.update_attachment(0, &draft).unwrap();

    qubes.clear_calls();
    handler.save().unwrap();

    let usb = |verb: &str| DevClass::Usb.method(verb);
    assert_eq!(
        methods(&qubes.calls()),
        vec![
            ("personal".into(), usb("Unassign")),
            ("work".into(), usb("Unassign")),
            ("work".into(), usb("Assign")),
            ("vault".into(), usb("Assign")),
        ]
    );
}

#[test]
fn test_second_save_without_edits_is_a_no_op() {
    let qubes = qubes();
    assign(&qubes, "work");

    let mut handler = devices(&qubes);
    let mut draft = handler.edit_attachment(AttachmentKind::Auto, 0).unwrap();
    draft.mode = AssignmentMode::AskToAttach;
    handler.update_attachment(0, &draft).unwrap();

    qubes.clear_calls();
    handler.save().unwrap();
    let first = qubes.calls().len();
    assert_eq!(first, 2);

    qubes.clear_calls();
    handler.save().unwrap();
    assert!(qubes.calls().is_empty());
}

// ── Dirty-page gate ─────────────────────────────────────────────────

#[test]
fn test_reset_restores_clean_state_without_remote_calls() {
    let qubes = qubes();
    assign(&qubes, "work");
    let mut handler = devices(&qubes);
    assert_eq!(handler.get_unsaved(), "");

    handler.remove_attachment(AttachmentKind::Auto, 0).unwrap();
    let mut block = handler.new_block();
    block.vm = Some("untrusted".into());
    block.selection.set(CategoryId::Microphone, true);
    handler.add_block(&block).unwrap();
    assert!(!handler.get_unsaved().is_empty());

    qubes.clear_calls();
    handler.reset();
    assert_eq!(handler.get_unsaved(), "");
    assert!(qubes.calls().is_empty());
}

// ── Categories ──────────────────────────────────────────────────────

#[test]
fn test_keyboard_mouse_printer_decode_to_specific_categories() {
    let interfaces: Vec<DeviceInterface> = ["u03**01", "u03**02", "u07****", "u0e****"]
        .iter()
        .map(|c| DeviceInterface::new(*c).unwrap())
        .collect();
    let (categories, leftover) = parse_interfaces(&interfaces);
    assert_eq!(
        categories,
        vec![CategoryId::Keyboard, CategoryId::Mouse, CategoryId::Printer]
    );
    assert_eq!(leftover, vec![DeviceInterface::new("u0e****").unwrap()]);
}

// ── Policy pages ────────────────────────────────────────────────────

fn context(qubes: &Arc<MemoryQubes>, store: &Arc<MemoryPolicyStore>) -> PageContext {
    PageContext {
        client: qubes.clone(),
        policies: store.clone(),
        locale: Locale::identity(),
    }
}

fn custom_clipboard() -> MemoryPolicyStore {
    MemoryPolicyStore::new().with_policy(
        "50-config-clipboard",
        "qubes.ClipboardPaste * @adminvm @anyvm ask\n\
         qubes.ClipboardPaste * work vault ask\n\
         qubes.ClipboardPaste * @anyvm @anyvm deny\n",
    )
}

#[test]
fn test_stale_token_conflicts_and_keeps_page_dirty() {
    let qubes = qubes();
    let store = Arc::new(custom_clipboard());
    let mut config = GlobalConfig::new(context(&qubes, &store));

    let page = config.page(PageId::Clipboard).unwrap();
    let policy = page.policy_mut("50-config-clipboard").unwrap();
    let work = policy
        .rows(RowList::PolicyExceptions)
        .iter()
        .position(|r| r.rule().source() == "work")
        .unwrap();
    policy.remove_rule(RowList::PolicyExceptions, work).unwrap();

    let foreign = "qubes.ClipboardPaste * @anyvm @anyvm ask\n";
    store
        .policy_replace("50-config-clipboard", foreign, TOKEN_ANY)
        .unwrap();

    let err = config.save_page(PageId::Clipboard).unwrap_err();
    assert!(err.source.is_conflict());
    assert!(err.to_string().starts_with("The following error occurred: "));
    assert_eq!(store.policy_get("50-config-clipboard").unwrap().0, foreign);
    assert_eq!(
        config.page(PageId::Clipboard).unwrap().get_unsaved(),
        "Policy rules"
    );
}

#[test]
fn test_saved_policy_round_trips_through_the_store() {
    let qubes = qubes();
    let store = Arc::new(custom_clipboard());
    let mut config = GlobalConfig::new(context(&qubes, &store));

    let policy = config
        .page(PageId::Clipboard)
        .unwrap()
        .policy_mut("50-config-clipboard")
        .unwrap();
    let index = policy.add_rule().unwrap();
    policy
        .set_edit(
            RowList::PolicyExceptions,
            index,
            RuleEdit {
                source: "untrusted".into(),
                target: "personal".into(),
                action: Action::Deny,
            },
        )
        .unwrap();
    policy.accept_edit(RowList::PolicyExceptions, index).unwrap();

    config.save_page(PageId::Clipboard).unwrap();
    assert_eq!(config.page(PageId::Clipboard).unwrap().get_unsaved(), "");

    let (text, _) = store.policy_get("50-config-clipboard").unwrap();
    assert!(text.contains("qubes.ClipboardPaste\t*\tuntrusted\tpersonal\tdeny\n"));
    assert!(text.ends_with("qubes.ClipboardPaste\t*\t@anyvm\t@anyvm\tdeny\n"));
}

#[test]
fn test_unparseable_rules_are_written_back_on_every_save() {
    let qubes = qubes();
    let store = Arc::new(MemoryPolicyStore::new().with_policy(
        "50-config-filecopy",
        "qubes.Filecopy * @anyvm @anyvm deny\n\
         qubes.Filecopy * work personal allow\n\
         qubes.Filecopy * work vault allow target=personal\n",
    ));
    let mut config = GlobalConfig::new(context(&qubes, &store));
    let kept = |store: &MemoryPolicyStore| {
        let (text, _) = store.policy_get("50-config-filecopy").unwrap();
        text.lines()
            .any(|l| l.contains("work\tvault\tallow") && l.contains("target=personal"))
    };

    let policy = config
        .page(PageId::File)
        .unwrap()
        .policy_mut("50-config-filecopy")
        .unwrap();
    assert_eq!(policy.errors().len(), 1);
    let work = policy
        .rows(RowList::PolicyExceptions)
        .iter()
        .position(|r| r.rule().source() == "work")
        .unwrap();
    policy.remove_rule(RowList::PolicyExceptions, work).unwrap();

    config.save_page(PageId::File).unwrap();
    assert!(kept(&store));
    config.save_page(PageId::File).unwrap();
    assert!(kept(&store));

    let (text, _) = store.policy_get("50-config-filecopy").unwrap();
    assert!(!text.contains("work\tpersonal\tallow"));
    assert_eq!(config.page(PageId::File).unwrap().get_unsaved(), "");
}

#[test]
fn test_cancelling_rows() {
    let qubes = qubes();
    let store: Arc<dyn PolicyStore> = Arc::new(custom_clipboard());
    let mut policy =
        PolicyHandler::new(CLIPBOARD_POLICY, store, qubes.as_ref(), Locale::identity()).unwrap();
    let before = policy.rows(RowList::PolicyExceptions).len();

    let index = policy.add_rule().unwrap();
    policy.cancel_edit(RowList::PolicyExceptions, index).unwrap();
    assert_eq!(policy.rows(RowList::PolicyExceptions).len(), before);

    let existing = policy
        .rows(RowList::PolicyExceptions)
        .iter()
        .position(|r| r.rule().source() == "work")
        .unwrap();
    policy.start_edit(RowList::PolicyExceptions, existing).unwrap();
    policy
        .set_edit(
            RowList::PolicyExceptions,
            existing,
            RuleEdit {
                source: "work".into(),
                target: "vault".into(),
                action: Action::Deny,
            },
        )
        .unwrap();
    policy.cancel_edit(RowList::PolicyExceptions, existing).unwrap();
    let row = &policy.rows(RowList::PolicyExceptions)[existing];
    assert_eq!(row.rule().action(), Action::Ask);
    assert!(!row.is_editing());
}

#[test]
fn test_leaving_a_dirty_page() {
    let qubes = qubes();
    let store = Arc::new(custom_clipboard());
    let mut config = GlobalConfig::new(context(&qubes, &store));

    let policy = config
        .page(PageId::Clipboard)
        .unwrap()
        .policy_mut("50-config-clipboard")
        .unwrap();
    policy.set_use_default(true);

    let mut asked = String::new();
    let leave = config
        .verify_changes(PageId::Clipboard, |text| {
            asked = text.to_owned();
            UnsavedDecision::Cancel
        })
        .unwrap();
    assert!(!leave);
    assert_eq!(asked, "Policy rules");

    let leave = config
        .verify_changes(PageId::Clipboard, |_| UnsavedDecision::Discard)
        .unwrap();
    assert!(leave);
    assert_eq!(config.page(PageId::Clipboard).unwrap().get_unsaved(), "");
}

// ── Restart ─────────────────────────────────────────────────────────

fn updated_system() -> Arc<MemoryQubes> {
    let qubes = Arc::new(MemoryQubes::new());
    qubes.insert_domain(Domain::new("debian", DomainClass::TemplateVM).running(true));
    qubes.insert_domain(
        Domain::new("sys-firewall", DomainClass::AppVM)
            .with_template("debian")
            .with_feature("servicevm", "1")
            .running(true),
    );
    qubes.insert_domain(
        Domain::new("mail", DomainClass::AppVM)
            .with_template("debian")
            .running(true),
    );
    qubes
}

#[test]
fn test_restart_runs_templates_then_services_then_others() {
    let qubes = updated_system();
    let selection = RestartSelection {
        service_vms: true,
        other_vms: true,
        excluded: false,
    };
    let plan = RestartPlan::from_updated(qubes.as_ref(), &["debian".into()], selection).unwrap();

    let client: Arc<dyn AdminClient> = qubes.clone();
    let report = Restarter::spawn(client, plan).unwrap().join().unwrap();
    assert_eq!(report.status, RestartStatus::Ok);
    assert_eq!(
        methods(&qubes.calls()),
        vec![
            ("debian".into(), SHUTDOWN.into()),
            ("sys-firewall".into(), SHUTDOWN.into()),
            ("sys-firewall".into(), START.into()),
            ("mail".into(), SHUTDOWN.into()),
        ]
    );
}

#[test]
fn test_restart_failures_accumulate() {
    let qubes = updated_system();
    qubes.fail_on("sys-firewall", START, "not enough memory");
    qubes.fail_on("mail", SHUTDOWN, "busy");
    let selection = RestartSelection {
        service_vms: true,
        other_vms: true,
        excluded: false,
    };
    let plan = RestartPlan::from_updated(qubes.as_ref(), &["debian".into()], selection).unwrap();

    let client: Arc<dyn AdminClient> = qubes.clone();
    let report = Restarter::spawn(client, plan).unwrap().join().unwrap();
    assert_eq!(report.status, RestartStatus::Error);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].starts_with("sys-firewall cannot start: "));
    assert!(report.errors[1].starts_with("mail cannot shutdown: "));
}
