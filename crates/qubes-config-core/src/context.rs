// ── Injected presentation context ──
//
// Message catalog and colour theme handed to every handler at
// construction instead of living in process globals.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;

/// Message catalog: msgid → translated text. Unknown ids pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    #[serde(default)]
    messages: BTreeMap<String, String>,
}

impl Locale {
    /// Catalog that returns every msgid unchanged.
    pub fn identity() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Load a TOML catalog with a `[messages]` table.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            message: format!("cannot read locale {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| CoreError::Config {
            message: format!("invalid locale {}: {e}", path.display()),
        })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            messages: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn tr<'a>(&'a self, msgid: &'a str) -> &'a str {
        self.messages.get(msgid).map_or(msgid, String::as_str)
    }
}

/// Colour theme; front-ends map it to their own palette.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_msgid_passes_through() {
        let locale = Locale::from_pairs([("Policy rules", "Richtlinien")]);
        assert_eq!(locale.tr("Policy rules"), "Richtlinien");
        assert_eq!(locale.tr("Raw policy text"), "Raw policy text");
    }

    #[test]
    fn catalog_loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pl.toml");
        std::fs::write(&path, "[messages]\n\"Device not found\" = \"Nie znaleziono\"\n").unwrap();

        let locale = Locale::load(&path).unwrap();
        assert_eq!(locale.tr("Device not found"), "Nie znaleziono");
    }

    #[test]
    fn theme_parses_lowercase() {
        assert_eq!("dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert_eq!(Theme::Light.to_string(), "light");
    }
}
