//! CLI configuration: thin wrapper around `qubes_config_settings`.
//!
//! Loads the shared settings and applies the `GlobalOpts` overrides
//! (--state, --policy-dir, --output) before anything touches the backend.

use qubes_config_core::GlobalConfig;
use qubes_config_settings::{Settings, load_settings, settings_to_page_context};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use qubes_config_settings::{config_path, save_settings};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Settings with CLI flag overrides applied.
pub fn resolve_settings(global: &GlobalOpts) -> Result<Settings, CliError> {
    let mut settings = load_settings()?;
    if let Some(state) = &global.state {
        settings.backend.state_file.clone_from(state);
    }
    if let Some(dir) = &global.policy_dir {
        settings.backend.policy_dir.clone_from(dir);
    }
    Ok(settings)
}

/// Output format: flag > settings default.
pub fn output_format(global: &GlobalOpts, settings: &Settings) -> OutputFormat {
    if let Some(format) = global.output {
        return format;
    }
    match settings.defaults.output.as_str() {
        "json" => OutputFormat::Json,
        "json-compact" => OutputFormat::JsonCompact,
        "yaml" => OutputFormat::Yaml,
        "plain" => OutputFormat::Plain,
        _ => OutputFormat::Table,
    }
}

/// Open the backend named in the settings and wrap it in page state.
pub fn open_config(settings: &Settings) -> Result<GlobalConfig, CliError> {
    let ctx = settings_to_page_context(settings)?;
    Ok(GlobalConfig::new(ctx))
}
