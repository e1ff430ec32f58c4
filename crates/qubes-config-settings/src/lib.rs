//! Shared settings for the Qubes configuration CLI and TUI.
//!
//! TOML settings file + `QUBES_CONFIG_` environment overrides, and the
//! translation of those settings into a ready [`PageContext`]. Both
//! binaries depend on this crate; the CLI layers its global flags on top.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use qubes_admin::{AdminClient, DirPolicyStore, MemoryQubes, PolicyStore};
use qubes_config_core::{Locale, PageContext, RestartSelection, Theme};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("cannot open qube state {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: qubes_admin::Error,
    },

    #[error("cannot load locale: {0}")]
    Locale(#[from] qubes_config_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML settings structs ───────────────────────────────────────────

/// Top-level TOML settings shared by CLI and TUI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub ui: UiSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub updates: UpdateSettings,

    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendSettings {
    /// Qube state snapshot (`.toml` or `.json`); written back on every change.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory holding the policy files.
    #[serde(default = "default_policy_dir")]
    pub policy_dir: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            policy_dir: default_policy_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UiSettings {
    /// Message catalog file; untranslated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<PathBuf>,

    #[serde(default)]
    pub theme: Theme,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatcherSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Which qubes a restart after template updates picks by default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpdateSettings {
    #[serde(default = "default_true")]
    pub restart_service_vms: bool,

    #[serde(default)]
    pub restart_other_vms: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            restart_service_vms: true,
            restart_other_vms: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_state_file() -> PathBuf {
    data_dir().join("state.toml")
}
fn default_policy_dir() -> PathBuf {
    data_dir().join("policy.d")
}

impl Settings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watcher.debounce_ms)
    }

    pub fn restart_selection(&self) -> RestartSelection {
        RestartSelection {
            service_vms: self.updates.restart_service_vms,
            other_vms: self.updates.restart_other_vms,
            excluded: false,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.debounce_ms == 0 {
            return Err(ConfigError::Validation {
                field: "watcher.debounce_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        match self.defaults.output.as_str() {
            "table" | "json" | "json-compact" | "yaml" | "plain" => Ok(()),
            other => Err(ConfigError::Validation {
                field: "defaults.output".into(),
                reason: format!(
                    "expected 'table', 'json', 'json-compact', 'yaml' or 'plain', got '{other}'"
                ),
            }),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "qubes-os", "qubes-config")
}

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default home of the state snapshot and policy directory.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn home_fallback(sub: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(sub);
    p.push("qubes-config");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the canonical file + environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from an explicit file + environment.
///
/// A missing file is not an error; defaults and the environment apply.
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("QUBES_CONFIG_").split("__"));

    let settings: Settings = figment.extract()?;
    settings.validate()?;
    debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Load settings, falling back to defaults on any error.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_default()
}

// ── Saving ──────────────────────────────────────────────────────────

/// Serialize settings to TOML and write them to the canonical path.
pub fn save_settings(settings: &Settings) -> Result<(), ConfigError> {
    save_settings_to(settings, &config_path())
}

pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Backend wiring ──────────────────────────────────────────────────

/// Admin client and policy store opened from the settings.
pub struct Backend {
    pub qubes: Arc<MemoryQubes>,
    pub policies: Arc<dyn PolicyStore>,
}

impl Backend {
    pub fn client(&self) -> Arc<dyn AdminClient> {
        Arc::clone(&self.qubes) as Arc<dyn AdminClient>
    }

    pub fn page_context(&self, locale: Arc<Locale>) -> PageContext {
        PageContext {
            client: self.client(),
            policies: Arc::clone(&self.policies),
            locale,
        }
    }
}

/// Open the state snapshot and policy directory named in the settings.
pub fn open_backend(settings: &Settings) -> Result<Backend, ConfigError> {
    let path = &settings.backend.state_file;
    let qubes = MemoryQubes::open(path).map_err(|source| ConfigError::Backend {
        path: path.clone(),
        source,
    })?;
    Ok(Backend {
        qubes: Arc::new(qubes),
        policies: Arc::new(DirPolicyStore::new(settings.backend.policy_dir.clone())),
    })
}

/// The configured message catalog, or the identity catalog.
pub fn load_locale(settings: &Settings) -> Result<Arc<Locale>, ConfigError> {
    match &settings.ui.locale {
        Some(path) => Ok(Arc::new(Locale::load(path)?)),
        None => Ok(Locale::identity()),
    }
}

/// Build a page context straight from settings.
pub fn settings_to_page_context(settings: &Settings) -> Result<PageContext, ConfigError> {
    let backend = open_backend(settings)?;
    Ok(backend.page_context(load_locale(settings)?))
}
