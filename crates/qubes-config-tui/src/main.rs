//! `qubes-config-tui`: terminal front end for the global Qubes settings.
//!
//! One tab per settings page: Basics, USB, Updates, Split GPG, Clipboard,
//! File Access, URLs, This Device and Devices, reachable with the number
//! keys 1-9. Edits stay in memory until applied; leaving a page with
//! pending edits asks whether to save or discard them.
//!
//! Logs are written to a file (default `/tmp/qubes-config-tui.log`) so they
//! do not corrupt the terminal. A device watcher keeps the list of
//! connected devices current while the app runs.

mod action;
mod app;
mod bridge;
mod component;
mod event;
mod screen;
mod screens;
mod theme;
mod tui;
mod widgets;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use qubes_config_core::{GlobalConfig, OpenAt};

use crate::app::{App, AppOptions};
use crate::theme::Palette;

/// Terminal editor for Qubes global settings.
#[derive(Parser, Debug)]
#[command(name = "qubes-config-tui", version, about)]
struct Cli {
    /// Page to open, optionally with a location (e.g. `devices#blocks`)
    #[arg(long, default_value = "basics")]
    open_at: String,

    /// Qube state snapshot, overriding the config file
    #[arg(long, env = "QUBES_CONFIG_STATE")]
    state: Option<PathBuf>,

    /// Policy directory, overriding the config file
    #[arg(long, env = "QUBES_CONFIG_POLICY_DIR")]
    policy_dir: Option<PathBuf>,

    /// Log file path (defaults to /tmp/qubes-config-tui.log)
    #[arg(long, default_value = "/tmp/qubes-config-tui.log")]
    log_file: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// File-based tracing; stdout belongs to the terminal UI. The guard must
/// live until exit so buffered lines are flushed.
fn setup_tracing(cli: &Cli) -> WorkerGuard {
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "qubes_config_tui={log_level},qubes_config_core={log_level},qubes_admin={log_level}"
        ))
    });

    let log_dir = cli
        .log_file
        .parent()
        .unwrap_or(std::path::Path::new("/tmp"));
    let log_filename = cli
        .log_file
        .file_name()
        .unwrap_or(std::ffi::OsStr::new("qubes-config-tui.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_tracing(&cli);
    tui::install_hooks()?;

    let mut settings = qubes_config_settings::load_settings()?;
    if let Some(state) = &cli.state {
        settings.backend.state_file.clone_from(state);
    }
    if let Some(dir) = &cli.policy_dir {
        settings.backend.policy_dir.clone_from(dir);
    }

    let backend = qubes_config_settings::open_backend(&settings)?;
    let locale = qubes_config_settings::load_locale(&settings)?;
    let config = GlobalConfig::new(backend.page_context(locale));

    info!(
        state = %settings.backend.state_file.display(),
        policy_dir = %settings.backend.policy_dir.display(),
        open_at = %cli.open_at,
        "starting qubes-config-tui"
    );

    let options = AppOptions {
        open_at: OpenAt::parse(&cli.open_at),
        palette: Palette::for_theme(settings.ui.theme),
        debounce: settings.debounce(),
    };
    App::new(config, options).run().await
}
