//! Update check command handlers.

use std::fmt::Write as _;

use qubes_config_core::updates::UpdateCheckState;
use qubes_config_core::{GlobalConfig, PageId, UpdateCheckHandler};

use crate::cli::{UpdateCheckCommand, UpdatesArgs, UpdatesCommand};
use crate::error::CliError;
use crate::output;

use super::Ctx;

fn update_check(config: &mut GlobalConfig) -> Result<&mut UpdateCheckHandler, CliError> {
    config
        .page(PageId::Updates)?
        .update_check_mut()
        .ok_or_else(|| CliError::Backend {
            message: "updates page has no update check section".into(),
        })
}

fn detail(state: &UpdateCheckState, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "dom0:       {}", output::flag(state.dom0, color));
    let _ = writeln!(out, "default:    {}", output::flag(state.default, color));
    if state.exceptions_enabled && !state.exceptions.is_empty() {
        let behavior = if state.default { "do not check" } else { "check" };
        let _ = writeln!(out, "exceptions ({behavior}):");
        for vm in &state.exceptions {
            let _ = writeln!(out, "  {vm}");
        }
    } else {
        let _ = writeln!(out, "exceptions: none");
    }
    out.trim_end().to_owned()
}

pub fn handle(config: &mut GlobalConfig, args: UpdatesArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    let UpdatesCommand::Check(check) = args.command;
    match check.command {
        UpdateCheckCommand::Show => {
            let handler = update_check(config)?;
            let color = ctx.color;
            let out = output::render_single(
                ctx.format,
                handler.state(),
                |s| detail(s, color),
                |s| s.exceptions.iter().cloned().collect::<Vec<_>>().join("\n"),
            );
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }

        UpdateCheckCommand::Set {
            dom0,
            default,
            add,
            remove,
            clear_exceptions,
        } => {
            let handler = update_check(config)?;
            if let Some(value) = dom0 {
                handler.set_dom0(value);
            }
            // Flipping the default drops exceptions first, so additions land after it
            if let Some(value) = default {
                handler.set_default(value);
            }
            if clear_exceptions {
                handler.set_exceptions_enabled(false);
            }
            for vm in &remove {
                if !handler.remove_exception(vm) {
                    tracing::warn!(vm = %vm, "qube was not an exception");
                }
            }
            for vm in &add {
                handler.add_exception(vm)?;
            }
            let summary = detail(handler.state(), ctx.color);
            config.save_page(PageId::Updates)?;
            output::print_output(&summary, ctx.global.quiet);
            Ok(())
        }
    }
}
