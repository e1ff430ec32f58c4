// ── Core error types ──
//
// User-facing errors from qubes-config-core. Consumers never see raw
// admin-layer failures; the `From<qubes_admin::Error>` impl translates
// them into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found")]
    DeviceNotFound,

    #[error("Qube not found: {name}")]
    QubeNotFound { name: String },

    #[error("Entity not found: {entity_type} {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Edit errors ──────────────────────────────────────────────────
    #[error("{message}")]
    Validation { message: String },

    #[error("This rule cannot be edited with GUI tools.")]
    NotEditable,

    #[error("Unknown page: {name}")]
    UnknownPage { name: String },

    // ── Policy store ─────────────────────────────────────────────────
    #[error("Policy file {name} was changed by someone else; reload and try again")]
    PolicyConflict { name: String },

    // ── Remote failures ──────────────────────────────────────────────
    #[error("{message}")]
    Remote { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that a reload and retry may fix.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PolicyConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound
                | Self::QubeNotFound { .. }
                | Self::NotFound { .. }
                | Self::UnknownPage { .. }
        )
    }
}

// ── Conversion from admin-layer errors ───────────────────────────────

impl From<qubes_admin::Error> for CoreError {
    fn from(err: qubes_admin::Error) -> Self {
        use qubes_admin::Error as E;
        match err {
            E::DomainNotFound { name } => CoreError::QubeNotFound { name },
            E::DeviceNotFound { .. } => CoreError::DeviceNotFound,
            E::AssignmentNotFound { frontend, device } => CoreError::NotFound {
                entity_type: "assignment".into(),
                identifier: format!("{device} -> {frontend}"),
            },
            E::PolicyNotFound { name } => CoreError::NotFound {
                entity_type: "policy file".into(),
                identifier: name,
            },
            E::TokenMismatch { name } | E::PolicyExists { name } => {
                CoreError::PolicyConflict { name }
            }
            E::InvalidPolicyName { name } => {
                CoreError::validation(format!("Invalid policy file name: {name:?}"))
            }
            E::Encoding { message } => CoreError::validation(message),
            e @ (E::AlreadyAssigned { .. } | E::Qubesd { .. }) => CoreError::Remote {
                message: e.to_string(),
            },
            e @ (E::Io(_) | E::SnapshotParse(_) | E::SnapshotWrite(_) | E::Json(_)) => {
                CoreError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_token_maps_to_conflict() {
        let err: CoreError = qubes_admin::Error::TokenMismatch {
            name: "50-config-clipboard".into(),
        }
        .into();
        assert!(err.is_conflict());
    }

    #[test]
    fn remote_failure_keeps_daemon_message() {
        let err: CoreError = qubes_admin::Error::Qubesd {
            dest: "work".into(),
            method: "admin.vm.Start".into(),
            message: "out of memory".into(),
        }
        .into();
        assert_eq!(err.to_string(), "work: admin.vm.Start failed: out of memory");
    }
}
