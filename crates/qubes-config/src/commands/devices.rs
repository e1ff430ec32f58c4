//! Device command handlers.

use qubes_admin::{DevClass, DeviceInfo, DeviceInterface};
use qubes_config_core::GlobalConfig;
use strum::IntoEnumIterator;
use tabled::Tabled;

use crate::cli::{DevicesArgs, DevicesCommand};
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Device ID")]
    device_id: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Interfaces")]
    interfaces: String,
}

impl From<&DeviceInfo> for DeviceRow {
    fn from(d: &DeviceInfo) -> Self {
        Self {
            port: d.port.to_string(),
            class: d.devclass().to_string(),
            device_id: d.device_id.clone(),
            description: d.description(),
            interfaces: d
                .interfaces
                .iter()
                .map(DeviceInterface::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(config: &mut GlobalConfig, args: DevicesArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List { class } => {
            let classes: Vec<DevClass> = match class {
                Some(c) => vec![util::devclass(c)],
                None => DevClass::iter().collect(),
            };
            let handler = util::devices_handler(config)?;
            let devices: Vec<DeviceInfo> = handler
                .manager()
                .available_devices(&classes)
                .cloned()
                .collect();
            let out = output::render_list(ctx.format, &devices, |d| DeviceRow::from(d), |d| {
                d.port.to_string()
            });
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }
    }
}
