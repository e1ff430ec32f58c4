//! Restart-after-update command handler.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use qubes_config_core::restart::RestartCandidate;
use qubes_config_core::{GlobalConfig, RestartPlan, RestartStatus, Restarter};
use tabled::Tabled;

use crate::cli::RestartArgs;
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "Qube")]
    name: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Opted out")]
    excluded: String,
    #[tabled(rename = "Selected")]
    selected: String,
    #[tabled(rename = "Action")]
    action: &'static str,
}

fn action(c: &RestartCandidate) -> &'static str {
    match (c.selected, c.service) {
        (false, _) => "-",
        (true, true) => "restart",
        (true, false) => "shutdown",
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message("Restarting qubes...");
    bar.enable_steady_tick(POLL_INTERVAL);
    bar
}

pub fn handle(config: &GlobalConfig, args: &RestartArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    let mut selection = ctx.settings.restart_selection();
    if let Some(service) = args.service {
        selection.service_vms = service;
    }
    if let Some(other) = args.other {
        selection.other_vms = other;
    }
    selection.excluded = args.excluded;

    let client = Arc::clone(&config.context().client);
    let plan = RestartPlan::from_updated(client.as_ref(), &args.templates, selection)?;

    let color = ctx.color;
    let out = output::render_list(
        ctx.format,
        plan.candidates(),
        |c| CandidateRow {
            name: c.name.clone(),
            service: output::flag(c.service, color),
            excluded: output::flag(c.excluded, color),
            selected: output::flag(c.selected, color),
            action: action(c),
        },
        |c| c.name.clone(),
    );
    output::print_output(&out, ctx.global.quiet);
    if !plan.templates().is_empty() && !ctx.global.quiet {
        eprintln!("Templates to shut down: {}", plan.templates().join(", "));
    }

    if args.dry_run {
        return Ok(());
    }
    if plan.is_empty() {
        output::print_output("No qubes need to be restarted.", ctx.global.quiet);
        return Ok(());
    }
    if !util::confirm("Restart the selected qubes?", ctx.global.yes)? {
        return Ok(());
    }

    let bar = spinner(ctx.global.quiet);
    let restarter = Restarter::spawn(client, plan)?;
    while !restarter.is_finished() {
        thread::sleep(POLL_INTERVAL);
    }
    let report = restarter.join()?;
    bar.finish_and_clear();

    if report.status == RestartStatus::Error {
        return Err(CliError::RestartFailed {
            failed: report.errors.len(),
            details: report.errors.join("\n"),
        });
    }
    output::print_output(&report.to_string(), ctx.global.quiet);
    Ok(())
}
