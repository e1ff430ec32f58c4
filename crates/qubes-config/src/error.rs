//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` / `ConfigError` variants into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use qubes_config_core::{CoreError, PageSaveError};
use qubes_config_settings::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const BACKEND: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(qubes_config::not_found),
        help("Run: qubes-config {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(
        code(qubes_config::conflict),
        help("Someone else changed the file. Run the command again to work on the fresh copy.")
    )]
    Conflict { message: String },

    // ── Backend ──────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(qubes_config::backend))]
    Backend { message: String },

    #[error("Saving the {page} page failed: {message}")]
    #[diagnostic(
        code(qubes_config::save_failed),
        help("Nothing on this page was written after the failing call; fix the cause and retry.")
    )]
    SaveFailed { page: String, message: String },

    #[error("{failed} qube(s) were not restarted/shutdown")]
    #[diagnostic(code(qubes_config::restart_failed), help("{details}"))]
    RestartFailed { failed: usize, details: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(qubes_config::validation))]
    Validation { field: String, reason: String },

    #[error("This rule cannot be edited with GUI tools.")]
    #[diagnostic(
        code(qubes_config::not_editable),
        help("The stored rule uses options these tools do not understand; edit it with qvm-device.")
    )]
    NotEditable,

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(qubes_config::config),
        help("Check the settings file: qubes-config config path")
    )]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(qubes_config::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    #[diagnostic(code(qubes_config::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Backend { .. } | Self::SaveFailed { .. } | Self::RestartFailed { .. } => {
                exit_code::BACKEND
            }
            Self::Validation { .. } | Self::NotEditable | Self::NonInteractiveRequiresYes { .. } => {
                exit_code::USAGE
            }
            Self::Config(_) | Self::Io(_) | Self::Toml(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DeviceNotFound => CliError::NotFound {
                resource_type: "device".into(),
                identifier: String::new(),
                list_command: "devices list".into(),
            },

            CoreError::QubeNotFound { name } => CliError::NotFound {
                resource_type: "qube".into(),
                identifier: name,
                list_command: "devices list".into(),
            },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                list_command: list_command_for(&entity_type).into(),
                resource_type: entity_type,
                identifier,
            },

            CoreError::UnknownPage { name } => CliError::NotFound {
                resource_type: "page".into(),
                identifier: name,
                list_command: "pages".into(),
            },

            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::NotEditable => CliError::NotEditable,

            err @ CoreError::PolicyConflict { .. } => CliError::Conflict {
                message: err.to_string(),
            },

            CoreError::Remote { message } | CoreError::Internal(message) => {
                CliError::Backend { message }
            }

            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },
        }
    }
}

impl From<PageSaveError> for CliError {
    fn from(err: PageSaveError) -> Self {
        if err.source.is_conflict() {
            return CliError::Conflict {
                message: err.source.to_string(),
            };
        }
        CliError::SaveFailed {
            page: err.page.to_string(),
            message: err.source.to_string(),
        }
    }
}

fn list_command_for(entity_type: &str) -> &'static str {
    match entity_type {
        "row" => "assignments list",
        "policy" => "policy rules",
        _ => "devices list",
    }
}
