// ── State snapshot file ──
//
// Serializable picture of every qube with its devices, assignments and
// block list. `MemoryQubes` loads one at startup and can write it back.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceAssignment, DeviceInfo, DeviceInterface, Port};
use crate::domain::Domain;
use crate::error::Result;

/// Whole-system state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub domains: Vec<DomainState>,
}

/// One qube plus everything device-related it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainState {
    #[serde(flatten)]
    pub domain: Domain,
    /// Devices this qube exposes as a backend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed: Vec<DeviceInfo>,
    /// Assignments this qube holds as a frontend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned: Vec<DeviceAssignment>,
    /// Ports currently attached to this qube.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached: Vec<Port>,
    /// Denied interface codes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied: Vec<DeviceInterface>,
}

impl From<Domain> for DomainState {
    fn from(domain: Domain) -> Self {
        Self {
            domain,
            exposed: Vec::new(),
            assigned: Vec::new(),
            attached: Vec::new(),
            denied: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Read a snapshot; `.json` files are JSON, everything else TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        if is_json(path) {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(toml::from_str(&text)?)
        }
    }

    /// Write the snapshot next to `path` and rename it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
