//! Shared helpers for command handlers.

use std::io::IsTerminal;

use qubes_admin::{AssignmentMode, DevClass};
use qubes_config_core::{AttachmentKind, DevicesHandler, GlobalConfig, PageId};

use crate::cli::{AttachmentListArg, DeviceClassArg, ModeArg};
use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
///
/// Without a terminal to ask on, the operation is refused.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// The devices page handler.
pub fn devices_handler(config: &mut GlobalConfig) -> Result<&mut DevicesHandler, CliError> {
    config
        .page(PageId::Devices)?
        .devices_mut()
        .ok_or_else(|| CliError::Backend {
            message: "devices page has no device lists".into(),
        })
}

// ── Arg conversions ─────────────────────────────────────────────────

pub fn devclass(arg: DeviceClassArg) -> DevClass {
    match arg {
        DeviceClassArg::Block => DevClass::Block,
        DeviceClassArg::Mic => DevClass::Mic,
        DeviceClassArg::Pci => DevClass::Pci,
        DeviceClassArg::Usb => DevClass::Usb,
    }
}

pub fn attachment_kind(arg: AttachmentListArg) -> AttachmentKind {
    match arg {
        AttachmentListArg::Auto => AttachmentKind::Auto,
        AttachmentListArg::Required => AttachmentKind::Required,
    }
}

pub fn mode(arg: ModeArg) -> AssignmentMode {
    match arg {
        ModeArg::AutoAttach => AssignmentMode::AutoAttach,
        ModeArg::AskToAttach => AssignmentMode::AskToAttach,
        ModeArg::Required => AssignmentMode::Required,
    }
}

/// The list a rule with this mode belongs to.
pub fn kind_for_mode(mode: AssignmentMode) -> AttachmentKind {
    match mode {
        AssignmentMode::Required => AttachmentKind::Required,
        AssignmentMode::AutoAttach | AssignmentMode::AskToAttach => AttachmentKind::Auto,
    }
}

/// Lookup failure for a row index of a listed rule set.
pub fn row_not_found(index: usize, list_command: &str) -> CliError {
    CliError::NotFound {
        resource_type: "row".into(),
        identifier: index.to_string(),
        list_command: list_command.into(),
    }
}
