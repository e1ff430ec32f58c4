// ── Assignment groups ──
//
// All assignments sharing (device_id, port_id, options) are edited as
// one unit with several frontends. Saving is a full replace: every old
// assignment of the group is removed, then one assignment per frontend
// is created from the edited fields.

use std::collections::BTreeMap;
use std::fmt;

use qubes_admin::device::{OPTION_NO_STRICT_RESET, OPTION_PERMISSIVE, OPTION_READ_ONLY, OPTION_TRUE};
use qubes_admin::{
    AdminClient, AssignmentMode, DevClass, DeviceAssignment, DeviceInfo, Port, WILDCARD,
};
use tracing::debug;

use crate::error::CoreError;

const KNOWN_OPTIONS: [&str; 3] = [OPTION_READ_ONLY, OPTION_PERMISSIVE, OPTION_NO_STRICT_RESET];

/// Grouping key of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub device_id: String,
    pub port_id: String,
    pub options: BTreeMap<String, String>,
}

impl From<&DeviceAssignment> for GroupKey {
    fn from(a: &DeviceAssignment) -> Self {
        Self {
            device_id: a.device_id.clone(),
            port_id: a.port_id.clone(),
            options: a.options.clone(),
        }
    }
}

/// A set of same-key assignments presented as one editable rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentWrapper {
    assignments: Vec<DeviceAssignment>,
    devclass: DevClass,
    port: Option<Port>,
    device: Option<DeviceInfo>,
    frontends: Vec<String>,
    mode: AssignmentMode,
    port_required: bool,
    device_identity_required: bool,
    read_only: bool,
    permissive: bool,
    no_strict_reset: bool,
    valid: bool,
    changed: bool,
}

impl AssignmentWrapper {
    /// Empty wrapper for a rule that does not exist yet.
    pub fn blank(devclass: DevClass) -> Self {
        Self {
            assignments: Vec::new(),
            devclass,
            port: None,
            device: None,
            frontends: Vec::new(),
            mode: AssignmentMode::Required,
            port_required: true,
            device_identity_required: true,
            read_only: false,
            permissive: false,
            no_strict_reset: false,
            valid: true,
            changed: false,
        }
    }

    /// Wrap a non-empty list of assignments that share one [`GroupKey`].
    ///
    /// `device` is the exposed device the group points at; when it is not
    /// currently present a device is synthesized from the assignment.
    pub fn new_from_existing(
        assignments: Vec<DeviceAssignment>,
        device: Option<DeviceInfo>,
    ) -> Result<Self, CoreError> {
        let first = assignments
            .first()
            .cloned()
            .ok_or_else(|| CoreError::Internal("empty assignment group".into()))?;

        let device_identity_required = first.device_id != WILDCARD;
        let port_required = first.port_id != WILDCARD;
        let flag = |key: &str| first.options.get(key).is_some_and(|v| v == OPTION_TRUE);
        let unknown_option = first
            .options
            .keys()
            .any(|k| !KNOWN_OPTIONS.contains(&k.as_str()));

        let device = device.unwrap_or_else(|| DeviceInfo::new(first.port(), first.device_id.clone()));

        Ok(Self {
            frontends: assignments.iter().map(|a| a.frontend_domain.clone()).collect(),
            devclass: first.devclass,
            port: Some(first.port()),
            device: Some(device),
            mode: first.mode,
            port_required,
            device_identity_required,
            read_only: flag(OPTION_READ_ONLY),
            permissive: flag(OPTION_PERMISSIVE),
            no_strict_reset: flag(OPTION_NO_STRICT_RESET),
            valid: (device_identity_required || port_required) && !unknown_option,
            changed: false,
            assignments,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn assignments(&self) -> &[DeviceAssignment] {
        &self.assignments
    }

    pub fn devclass(&self) -> DevClass {
        self.devclass
    }

    pub fn port(&self) -> Option<&Port> {
        self.port.as_ref()
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn frontends(&self) -> &[String] {
        &self.frontends
    }

    pub fn mode(&self) -> AssignmentMode {
        self.mode
    }

    pub fn port_required(&self) -> bool {
        self.port_required
    }

    pub fn device_identity_required(&self) -> bool {
        self.device_identity_required
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn permissive(&self) -> bool {
        self.permissive
    }

    pub fn no_strict_reset(&self) -> bool {
        self.no_strict_reset
    }

    /// `false` when the group holds something these tools cannot express.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    // ── Setters ──────────────────────────────────────────────────────
    //
    // No validation here; drafts check validity before committing.

    pub fn set_device(&mut self, device: Option<DeviceInfo>) {
        if let Some(d) = &device {
            self.devclass = d.devclass();
            self.port = Some(d.port.clone());
        }
        self.device = device;
        self.changed = true;
    }

    pub fn set_frontends(&mut self, frontends: Vec<String>) {
        self.frontends = frontends;
        self.changed = true;
    }

    pub fn set_mode(&mut self, mode: AssignmentMode) {
        self.mode = mode;
        self.changed = true;
    }

    pub fn set_port_required(&mut self, value: bool) {
        self.port_required = value;
        self.changed = true;
    }

    pub fn set_device_identity_required(&mut self, value: bool) {
        self.device_identity_required = value;
        self.changed = true;
    }

    pub fn set_read_only(&mut self, value: bool) {
        self.read_only = value;
        self.changed = true;
    }

    pub fn set_permissive(&mut self, value: bool) {
        self.permissive = value;
        self.changed = true;
    }

    pub fn set_no_strict_reset(&mut self, value: bool) {
        self.no_strict_reset = value;
        self.changed = true;
    }

    // ── Descriptions ─────────────────────────────────────────────────

    /// Markup describing which device(s) the rule covers.
    pub fn device_description(&self) -> String {
        let port = self.port.as_ref().map(ToString::to_string).unwrap_or_default();
        if !self.device_identity_required {
            return format!("Any {} device attached to <b>{port}</b>", self.devclass);
        }
        let name = self
            .device
            .as_ref()
            .map_or_else(|| "Unknown device".to_owned(), DeviceInfo::description);
        if self.port_required {
            return format!("<b>({port}) {name}</b>");
        }
        let backend = self
            .device
            .as_ref()
            .map(|d| d.backend_domain().to_owned())
            .unwrap_or_default();
        format!("<b>({backend}) {name}</b>")
    }

    pub fn action_description(&self) -> &'static str {
        match self.mode {
            AssignmentMode::AutoAttach => "will attach automatically to",
            AssignmentMode::Required => "is required by ",
            AssignmentMode::AskToAttach => "will ask to be attached to",
        }
    }

    /// Identity text, empty when the rule does not pin the identity.
    pub fn device_identity_description(&self) -> String {
        match (&self.device, self.device_identity_required) {
            (Some(device), true) => device.identity_description(),
            _ => String::new(),
        }
    }

    // ── Remote operations ────────────────────────────────────────────

    /// Options as they will be written: only the three recognized flags.
    fn encoded_options(&self) -> BTreeMap<String, String> {
        [
            (OPTION_READ_ONLY, self.read_only),
            (OPTION_PERMISSIVE, self.permissive),
            (OPTION_NO_STRICT_RESET, self.no_strict_reset),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(k, _)| (k.to_owned(), OPTION_TRUE.to_owned()))
        .collect()
    }

    /// Unassign every assignment of the group.
    pub fn remove(&self, client: &dyn AdminClient) -> Result<(), CoreError> {
        for assignment in &self.assignments {
            client.unassign(assignment)?;
        }
        Ok(())
    }

    /// Replace the group on the system. No-op when nothing changed.
    pub fn save(&mut self, client: &dyn AdminClient) -> Result<(), CoreError> {
        if !self.changed {
            return Ok(());
        }
        let device = self.device.clone().ok_or(CoreError::DeviceNotFound)?;

        self.remove(client)?;
        self.assignments.clear();

        let template = DeviceAssignment {
            backend_domain: device.backend_domain().to_owned(),
            port_id: if self.port_required {
                device.port.port_id.clone()
            } else {
                WILDCARD.to_owned()
            },
            device_id: if self.device_identity_required {
                device.device_id.clone()
            } else {
                WILDCARD.to_owned()
            },
            devclass: device.devclass(),
            frontend_domain: String::new(),
            mode: self.mode,
            options: self.encoded_options(),
        };

        for frontend in &self.frontends {
            let assignment = DeviceAssignment {
                frontend_domain: frontend.clone(),
                ..template.clone()
            };
            client.assign(&assignment)?;
            self.assignments.push(assignment);
        }
        debug!(rule = %self, frontends = self.frontends.len(), "assignment group saved");

        self.changed = false;
        Ok(())
    }
}

impl fmt::Display for AssignmentWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.device_description(),
            self.action_description().trim_end(),
            self.frontends.join(", ")
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assignment(frontend: &str, device_id: &str, port_id: &str) -> DeviceAssignment {
        DeviceAssignment {
            backend_domain: "sys-usb".into(),
            port_id: port_id.into(),
            device_id: device_id.into(),
            devclass: DevClass::Usb,
            frontend_domain: frontend.into(),
            mode: AssignmentMode::AutoAttach,
            options: BTreeMap::new(),
        }
    }

    #[test]
    fn group_collects_frontends_and_flags() {
        let a = assignment("work", "1234:5678", "2-1").with_option(OPTION_READ_ONLY);
        let b = assignment("personal", "1234:5678", "2-1").with_option(OPTION_READ_ONLY);
        let group = AssignmentWrapper::new_from_existing(vec![a, b], None).unwrap();

        assert_eq!(group.frontends(), ["work", "personal"]);
        assert!(group.read_only());
        assert!(!group.permissive());
        assert!(group.device_identity_required());
        assert!(group.port_required());
        assert!(group.is_valid());
        assert!(!group.is_changed());
    }

    #[test]
    fn double_wildcard_is_invalid() {
        let group =
            AssignmentWrapper::new_from_existing(vec![assignment("work", "*", "*")], None).unwrap();
        assert!(!group.is_valid());
    }

    #[test]
    fn unknown_option_is_invalid() {
        let a = assignment("work", "1234:5678", "2-1").with_option("frobnicate");
        let group = AssignmentWrapper::new_from_existing(vec![a], None).unwrap();
        assert!(!group.is_valid());
    }

    #[test]
    fn descriptions_follow_wildcards() {
        let port_only =
            AssignmentWrapper::new_from_existing(vec![assignment("work", "*", "2-1")], None).unwrap();
        assert_eq!(
            port_only.device_description(),
            "Any usb device attached to <b>sys-usb:2-1</b>"
        );

        let device = DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "1234:5678")
            .with_vendor("Yubico")
            .with_product("YubiKey");
        let any_port = AssignmentWrapper::new_from_existing(
            vec![assignment("work", "1234:5678", "*")],
            Some(device),
        )
        .unwrap();
        assert_eq!(any_port.device_description(), "<b>(sys-usb) Yubico YubiKey</b>");
        assert_eq!(
            any_port.to_string(),
            "<b>(sys-usb) Yubico YubiKey</b> will attach automatically to work"
        );
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(AssignmentWrapper::new_from_existing(Vec::new(), None).is_err());
    }
}
