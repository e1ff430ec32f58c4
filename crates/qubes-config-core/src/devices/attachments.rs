// ── Attachment rule lists ──
//
// The "automatically attached" and "required" lists of the devices page.
// Rows are assignment groups; edits go through an `AttachmentDraft`,
// which plays the part of the edit dialog and is validated on commit.

use std::sync::Arc;

use qubes_admin::device::{OPTION_NO_STRICT_RESET, OPTION_PERMISSIVE, OPTION_READ_ONLY};
use qubes_admin::{AdminClient, AssignmentMode, DevClass, DeviceAssignment, DeviceInfo};
use serde::Serialize;
use strum::Display;
use tracing::debug;

use super::assignment::{AssignmentWrapper, GroupKey};
use super::manager::DeviceManager;
use super::rule_list::{DeviceRule, DeviceRuleList};
use crate::context::Locale;
use crate::error::CoreError;

const NOT_EDITABLE: &str = "This rule cannot be edited with GUI tools.";

// ── AttachmentKind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttachmentKind {
    /// Auto-attach and ask-to-attach rules.
    Auto,
    /// Rules a qube cannot start without.
    Required,
}

impl AttachmentKind {
    pub fn classes(self) -> &'static [DevClass] {
        match self {
            Self::Auto => &[DevClass::Block, DevClass::Mic, DevClass::Usb],
            Self::Required => &[DevClass::Block, DevClass::Pci],
        }
    }

    pub fn accepts(self, mode: AssignmentMode) -> bool {
        match self {
            Self::Auto => matches!(mode, AssignmentMode::AutoAttach | AssignmentMode::AskToAttach),
            Self::Required => mode == AssignmentMode::Required,
        }
    }

    fn default_mode(self) -> AssignmentMode {
        match self {
            Self::Auto => AssignmentMode::AutoAttach,
            Self::Required => AssignmentMode::Required,
        }
    }
}

/// Options the edit dialog offers for a device class.
pub fn offered_options(class: DevClass) -> &'static [&'static str] {
    match class {
        DevClass::Pci => &[OPTION_PERMISSIVE, OPTION_NO_STRICT_RESET],
        DevClass::Block => &[OPTION_READ_ONLY],
        DevClass::Mic | DevClass::Usb => &[],
    }
}

// ── AttachmentRow ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub wrapper: AssignmentWrapper,
    pub editable: bool,
    /// Why the row is read-only.
    pub tooltip: Option<String>,
}

impl DeviceRule for AttachmentRow {
    fn is_changed(&self) -> bool {
        self.wrapper.is_changed()
    }

    fn save(&mut self, client: &dyn AdminClient) -> Result<(), CoreError> {
        self.wrapper.save(client)
    }

    fn remove(&self, client: &dyn AdminClient) -> Result<(), CoreError> {
        self.wrapper.remove(client)
    }

    fn describe(&self) -> String {
        self.wrapper.to_string()
    }
}

// ── AttachmentDraft ─────────────────────────────────────────────────

/// Buffered edit of one attachment rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDraft {
    pub kind: AttachmentKind,
    pub device: Option<DeviceInfo>,
    pub frontends: Vec<String>,
    pub mode: AssignmentMode,
    pub port_required: bool,
    pub device_identity_required: bool,
    pub read_only: bool,
    pub permissive: bool,
    pub no_strict_reset: bool,
}

impl AttachmentDraft {
    pub fn for_new(kind: AttachmentKind) -> Self {
        Self {
            kind,
            device: None,
            frontends: Vec::new(),
            mode: kind.default_mode(),
            port_required: true,
            device_identity_required: true,
            read_only: false,
            permissive: false,
            no_strict_reset: false,
        }
    }

    pub fn from_wrapper(kind: AttachmentKind, wrapper: &AssignmentWrapper) -> Self {
        Self {
            kind,
            device: wrapper.device().cloned(),
            frontends: wrapper.frontends().to_vec(),
            mode: wrapper.mode(),
            port_required: wrapper.port_required(),
            device_identity_required: wrapper.device_identity_required(),
            read_only: wrapper.read_only(),
            permissive: wrapper.permissive(),
            no_strict_reset: wrapper.no_strict_reset(),
        }
    }

    /// Pick a device and drop settings its class does not allow.
    pub fn select_device(&mut self, device: DeviceInfo) {
        let class = device.devclass();
        let offered = offered_options(class);
        if !offered.contains(&OPTION_READ_ONLY) {
            self.read_only = false;
        }
        if !offered.contains(&OPTION_PERMISSIVE) {
            self.permissive = false;
        }
        if !offered.contains(&OPTION_NO_STRICT_RESET) {
            self.no_strict_reset = false;
        }
        if class == DevClass::Pci {
            self.port_required = true;
        }
        self.device = Some(device);
    }

    /// First reason the draft cannot be committed, if any.
    pub fn validity_error(&self) -> Option<String> {
        let Some(device) = &self.device else {
            return Some("Select a device".into());
        };
        if !self.kind.classes().contains(&device.devclass()) {
            return Some(format!(
                "{} devices cannot be used in this list",
                device.devclass()
            ));
        }
        if !self.kind.accepts(self.mode) {
            return Some(format!("Mode {} does not belong in this list", self.mode));
        }
        if self.frontends.is_empty() {
            return Some("Select at least one qube".into());
        }
        if !self.port_required && !self.device_identity_required {
            return Some("A rule must match the port, the device identity, or both".into());
        }
        if self.frontends.iter().any(|f| f == device.backend_domain()) {
            return Some("A device cannot be attached to the qube that provides it".into());
        }
        let class = device.devclass();
        if class == DevClass::Pci && !self.port_required {
            return Some("pci devices must be bound to a port".into());
        }
        let offered = offered_options(class);
        for (option, set) in [
            (OPTION_READ_ONLY, self.read_only),
            (OPTION_PERMISSIVE, self.permissive),
            (OPTION_NO_STRICT_RESET, self.no_strict_reset),
        ] {
            if set && !offered.contains(&option) {
                return Some(format!("Option {option} is not available for {class} devices"));
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.validity_error().is_none()
    }

    /// Write the draft into a wrapper, touching only fields that differ.
    pub fn apply_to(&self, wrapper: &mut AssignmentWrapper) {
        if wrapper.device() != self.device.as_ref() {
            wrapper.set_device(self.device.clone());
        }
        if wrapper.frontends() != self.frontends.as_slice() {
            wrapper.set_frontends(self.frontends.clone());
        }
        if wrapper.mode() != self.mode {
            wrapper.set_mode(self.mode);
        }
        if wrapper.port_required() != self.port_required {
            wrapper.set_port_required(self.port_required);
        }
        if wrapper.device_identity_required() != self.device_identity_required {
            wrapper.set_device_identity_required(self.device_identity_required);
        }
        if wrapper.read_only() != self.read_only {
            wrapper.set_read_only(self.read_only);
        }
        if wrapper.permissive() != self.permissive {
            wrapper.set_permissive(self.permissive);
        }
        if wrapper.no_strict_reset() != self.no_strict_reset {
            wrapper.set_no_strict_reset(self.no_strict_reset);
        }
    }
}

// ── AttachmentHandler ───────────────────────────────────────────────

pub struct AttachmentHandler {
    kind: AttachmentKind,
    client: Arc<dyn AdminClient>,
    locale: Arc<Locale>,
    rules: DeviceRuleList<AttachmentRow>,
}

impl AttachmentHandler {
    pub fn new(kind: AttachmentKind, manager: &DeviceManager, locale: Arc<Locale>) -> Self {
        let mut handler = Self {
            kind,
            client: Arc::clone(manager.client()),
            locale,
            rules: DeviceRuleList::default(),
        };
        handler.reset(manager);
        handler
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn rows(&self) -> &[AttachmentRow] {
        self.rules.rows()
    }

    pub fn removed(&self) -> &[AttachmentRow] {
        self.rules.removed()
    }

    fn load_rows(&self, manager: &DeviceManager) -> Vec<AttachmentRow> {
        let mut groups: Vec<(GroupKey, Vec<DeviceAssignment>)> = Vec::new();
        for assignment in manager
            .assignments(self.kind.classes())
            .filter(|a| self.kind.accepts(a.mode))
        {
            let key = GroupKey::from(assignment);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(assignment.clone()),
                None => groups.push((key, vec![assignment.clone()])),
            }
        }

        groups
            .into_iter()
            .filter_map(|(_, members)| {
                let device = members.first().and_then(|a| manager.find_device(a)).cloned();
                AssignmentWrapper::new_from_existing(members, device).ok()
            })
            .map(|wrapper| {
                let admin_frontend = wrapper
                    .frontends()
                    .iter()
                    .any(|f| manager.domain(f).is_some_and(qubes_admin::Domain::is_admin));
                let editable = wrapper.is_valid() && !admin_frontend;
                AttachmentRow {
                    tooltip: (!editable).then(|| self.locale.tr(NOT_EDITABLE).to_owned()),
                    editable,
                    wrapper,
                }
            })
            .collect()
    }

    // ── Editing ──────────────────────────────────────────────────────

    pub fn new_draft(&self) -> AttachmentDraft {
        AttachmentDraft::for_new(self.kind)
    }

    fn check(&self, draft: &AttachmentDraft) -> Result<(), CoreError> {
        if draft.kind != self.kind {
            return Err(CoreError::validation(format!(
                "draft for {} rules committed to {} list",
                draft.kind, self.kind
            )));
        }
        match draft.validity_error() {
            Some(message) => Err(CoreError::validation(self.locale.tr(&message).to_owned())),
            None => Ok(()),
        }
    }

    /// Add a row built from a new draft. Returns its description.
    pub fn commit_new(&mut self, draft: &AttachmentDraft) -> Result<String, CoreError> {
        self.check(draft)?;
        let class = draft.device.as_ref().map_or(DevClass::Usb, DeviceInfo::devclass);
        let mut wrapper = AssignmentWrapper::blank(class);
        draft.apply_to(&mut wrapper);
        let row = AttachmentRow {
            wrapper,
            editable: true,
            tooltip: None,
        };
        let text = row.describe();
        self.rules.push(row);
        Ok(text)
    }

    /// Draft for an existing row; read-only rows cannot be edited.
    pub fn edit_draft(&self, index: usize) -> Result<AttachmentDraft, CoreError> {
        let row = self.row(index)?;
        if !row.editable {
            return Err(CoreError::NotEditable);
        }
        Ok(AttachmentDraft::from_wrapper(self.kind, &row.wrapper))
    }

    pub fn commit_edit(&mut self, index: usize, draft: &AttachmentDraft) -> Result<String, CoreError> {
        self.check(draft)?;
        if !self.row(index)?.editable {
            return Err(CoreError::NotEditable);
        }
        let row = self
            .rules
            .row_mut(index)
            .ok_or_else(|| row_not_found(index))?;
        draft.apply_to(&mut row.wrapper);
        Ok(row.describe())
    }

    pub fn remove_rule(&mut self, index: usize) -> Result<String, CoreError> {
        if !self.row(index)?.editable {
            return Err(CoreError::NotEditable);
        }
        self.rules
            .remove(index)
            .map(DeviceRule::describe)
            .ok_or_else(|| row_not_found(index))
    }

    fn row(&self, index: usize) -> Result<&AttachmentRow, CoreError> {
        self.rules.rows().get(index).ok_or_else(|| row_not_found(index))
    }

    // ── Page contract ────────────────────────────────────────────────

    /// Push changed rows and removals. The caller reloads afterwards.
    pub fn save(&mut self) -> Result<(), CoreError> {
        debug!(kind = %self.kind, rows = self.rules.len(), removed = self.rules.removed().len(), "saving attachments");
        self.rules.save(self.client.as_ref())
    }

    pub fn reset(&mut self, manager: &DeviceManager) {
        let rows = self.load_rows(manager);
        self.rules.replace(rows);
    }

    pub fn get_unsaved(&self) -> String {
        self.rules
            .unsaved_lines(
                self.locale.tr("Attachment changed: "),
                self.locale.tr("Removed assignment: "),
            )
            .join("\n")
    }
}

fn row_not_found(index: usize) -> CoreError {
    CoreError::NotFound {
        entity_type: "row".into(),
        identifier: index.to_string(),
    }
}

/// Rows of all given handlers that duplicate another row: same device
/// description and at least one common frontend.
pub fn duplicate_rows(handlers: &[&AttachmentHandler]) -> Vec<String> {
    let rows: Vec<&AttachmentRow> = handlers.iter().flat_map(|h| h.rows()).collect();
    let mut duplicates = Vec::new();
    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            let same_device = a.wrapper.device_description() == b.wrapper.device_description();
            let overlap = a
                .wrapper
                .frontends()
                .iter()
                .any(|f| b.wrapper.frontends().contains(f));
            if same_device && overlap {
                duplicates.push(b.describe());
            }
        }
    }
    duplicates
}
