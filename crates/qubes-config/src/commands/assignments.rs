//! Attachment rule command handlers.

use qubes_admin::{DevClass, DeviceInfo};
use qubes_config_core::{AttachmentKind, DevicesHandler, GlobalConfig, PageId};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{AssignmentsArgs, AssignmentsCommand, DeviceClassArg};
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

// ── View ────────────────────────────────────────────────────────────

/// One displayed rule: a group of assignments sharing device, port and options.
#[derive(Serialize)]
struct AssignmentView {
    index: usize,
    device: String,
    port: Option<String>,
    device_id: Option<String>,
    class: String,
    mode: String,
    frontends: Vec<String>,
    port_required: bool,
    identity_required: bool,
    options: Vec<&'static str>,
    editable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tooltip: Option<String>,
}

#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Qubes")]
    frontends: String,
    #[tabled(rename = "Options")]
    options: String,
    #[tabled(rename = "Editable")]
    editable: String,
}

fn views(handler: &DevicesHandler, kind: AttachmentKind) -> Vec<AssignmentView> {
    handler
        .attachments(kind)
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let w = &row.wrapper;
            let options = [
                ("read-only", w.read_only()),
                ("permissive", w.permissive()),
                ("no-strict-reset", w.no_strict_reset()),
            ]
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect();
            AssignmentView {
                index,
                device: output::strip_markup(&w.device_description()),
                port: w.port().map(ToString::to_string),
                device_id: w.device().map(|d| d.device_id.clone()),
                class: w.devclass().to_string(),
                mode: w.mode().to_string(),
                frontends: w.frontends().to_vec(),
                port_required: w.port_required(),
                identity_required: w.device_identity_required(),
                options,
                editable: row.editable,
                tooltip: row.tooltip.clone(),
            }
        })
        .collect()
}

// ── Device lookup ───────────────────────────────────────────────────

/// Find an exposed device by `BACKEND:PORT` among the classes a list accepts.
fn find_device(
    handler: &DevicesHandler,
    kind: AttachmentKind,
    port_arg: &str,
    class: Option<DeviceClassArg>,
) -> Result<DeviceInfo, CliError> {
    let (backend, port) = port_arg.split_once(':').ok_or_else(|| CliError::Validation {
        field: "device".into(),
        reason: format!("expected BACKEND:PORT, got '{port_arg}'"),
    })?;
    let class: Option<DevClass> = class.map(util::devclass);
    let matches: Vec<&DeviceInfo> = handler
        .manager()
        .available_devices(kind.classes())
        .filter(|d| d.port.backend_domain == backend && d.port.port_id == port)
        .filter(|d| class.is_none_or(|c| d.devclass() == c))
        .collect();
    match matches.as_slice() {
        [device] => Ok((*device).clone()),
        [] => Err(CliError::NotFound {
            resource_type: "device".into(),
            identifier: port_arg.into(),
            list_command: "devices list".into(),
        }),
        _ => Err(CliError::Validation {
            field: "device".into(),
            reason: format!("'{port_arg}' exists in several device classes; pass --class"),
        }),
    }
}

fn warn_duplicates(handler: &DevicesHandler) {
    for row in handler.validate_all_rows() {
        eprintln!("warning: duplicate rule: {}", output::strip_markup(&row));
    }
}

fn report(text: &str, verb: &str, ctx: &Ctx<'_>) {
    output::print_output(&format!("{verb}: {}", output::strip_markup(text)), ctx.global.quiet);
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub fn handle(
    config: &mut GlobalConfig,
    args: AssignmentsArgs,
    ctx: &Ctx<'_>,
) -> Result<(), CliError> {
    match args.command {
        AssignmentsCommand::List { list } => {
            let handler = util::devices_handler(config)?;
            let views = views(handler, util::attachment_kind(list));
            let color = ctx.color;
            let out = output::render_list(
                ctx.format,
                &views,
                |v| AssignmentRow {
                    index: v.index,
                    device: v.device.clone(),
                    mode: v.mode.clone(),
                    frontends: v.frontends.join(", "),
                    options: v.options.join(", "),
                    editable: output::flag(v.editable, color),
                },
                |v| v.index.to_string(),
            );
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }

        AssignmentsCommand::Add {
            device,
            class,
            frontends,
            mode,
            any_port,
            any_device,
            read_only,
            permissive,
            no_strict_reset,
        } => {
            let mode = util::mode(mode);
            let kind = util::kind_for_mode(mode);
            let handler = util::devices_handler(config)?;
            let device = find_device(handler, kind, &device, class)?;

            let mut draft = handler.new_attachment(kind);
            draft.select_device(device);
            draft.frontends = frontends;
            draft.mode = mode;
            draft.port_required = !any_port;
            draft.device_identity_required = !any_device;
            draft.read_only = read_only;
            draft.permissive = permissive;
            draft.no_strict_reset = no_strict_reset;

            let text = handler.add_attachment(&draft)?;
            warn_duplicates(handler);
            config.save_page(PageId::Devices)?;
            report(&text, "Added", ctx);
            Ok(())
        }

        AssignmentsCommand::Remove { index, list } => {
            let kind = util::attachment_kind(list);
            let handler = util::devices_handler(config)?;
            let row = handler
                .attachments(kind)
                .rows()
                .get(index)
                .ok_or_else(|| util::row_not_found(index, "assignments list"))?;
            let prompt = format!("Remove rule: {}?", output::strip_markup(&row.wrapper.to_string()));
            if !util::confirm(&prompt, ctx.global.yes)? {
                return Ok(());
            }
            let text = handler.remove_attachment(kind, index)?;
            config.save_page(PageId::Devices)?;
            report(&text, "Removed", ctx);
            Ok(())
        }

        AssignmentsCommand::SetMode { index, mode, list } => {
            let kind = util::attachment_kind(list);
            let handler = util::devices_handler(config)?;
            let mut draft = handler.edit_attachment(kind, index)?;
            draft.mode = util::mode(mode);
            let text = handler.update_attachment(index, &draft)?;
            config.save_page(PageId::Devices)?;
            report(&text, "Updated", ctx);
            Ok(())
        }

        AssignmentsCommand::SetFrontends {
            index,
            frontends,
            list,
        } => {
            let kind = util::attachment_kind(list);
            let handler = util::devices_handler(config)?;
            let mut draft = handler.edit_attachment(kind, index)?;
            draft.frontends = frontends;
            let text = handler.update_attachment(index, &draft)?;
            warn_duplicates(handler);
            config.save_page(PageId::Devices)?;
            report(&text, "Updated", ctx);
            Ok(())
        }
    }
}
