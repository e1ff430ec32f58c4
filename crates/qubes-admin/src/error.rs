use thiserror::Error;

/// Top-level error type for the `qubes-admin` crate.
///
/// Covers every failure mode of the admin surface: lookups, the
/// assignment wire encoding, the policy store's concurrency token and
/// snapshot persistence. `qubes-config-core` maps these into user-facing
/// variants.
#[derive(Debug, Error)]
pub enum Error {
    // ── Lookups ─────────────────────────────────────────────────────
    /// No qube with this name.
    #[error("Qube not found: {name}")]
    DomainNotFound { name: String },

    /// No exposed device at this port.
    #[error("Device not found: {port}")]
    DeviceNotFound { port: String },

    /// The frontend has no assignment matching this device reference.
    #[error("No assignment of {device} to {frontend}")]
    AssignmentNotFound { frontend: String, device: String },

    /// The frontend already carries an assignment for this device reference.
    #[error("{device} is already assigned to {frontend}")]
    AlreadyAssigned { frontend: String, device: String },

    // ── Wire encoding ───────────────────────────────────────────────
    /// Malformed interface code, payload or argument.
    #[error("Invalid encoding: {message}")]
    Encoding { message: String },

    // ── Remote failures ─────────────────────────────────────────────
    /// The admin daemon refused or failed the call.
    #[error("{dest}: {method} failed: {message}")]
    Qubesd {
        dest: String,
        method: String,
        message: String,
    },

    // ── Policy store ────────────────────────────────────────────────
    /// No policy file with this name.
    #[error("Policy file not found: {name}")]
    PolicyNotFound { name: String },

    /// Token `new` was used but the file already exists.
    #[error("Policy file already exists: {name}")]
    PolicyExists { name: String },

    /// The file changed since the token was issued.
    #[error("Policy file {name} was modified since it was read")]
    TokenMismatch { name: String },

    /// Names may not be empty, contain path separators or start with a dot.
    #[error("Invalid policy file name: {name:?}")]
    InvalidPolicyName { name: String },

    // ── Persistence ─────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state file: {0}")]
    SnapshotParse(#[from] toml::de::Error),

    #[error("Failed to serialize state: {0}")]
    SnapshotWrite(#[from] toml::ser::Error),

    #[error("Invalid JSON state: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Returns `true` for the optimistic-concurrency failures of the
    /// policy store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TokenMismatch { .. } | Self::PolicyExists { .. })
    }

    /// Returns `true` for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DomainNotFound { .. }
                | Self::DeviceNotFound { .. }
                | Self::AssignmentNotFound { .. }
                | Self::PolicyNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
