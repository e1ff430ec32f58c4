// ── Qube handles ──

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Qube class as reported by `admin.vm.List`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum DomainClass {
    AdminVM,
    #[default]
    AppVM,
    TemplateVM,
    StandaloneVM,
    DispVM,
}

/// A qube and the properties the configuration pages read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub klass: DomainClass,
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Disposables that vanish on shutdown.
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub features: IndexMap<String, String>,
}

impl Domain {
    pub fn new(name: impl Into<String>, klass: DomainClass) -> Self {
        Self {
            name: name.into(),
            klass,
            running: false,
            template: None,
            auto_cleanup: false,
            label: None,
            features: IndexMap::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.klass == DomainClass::AdminVM
    }

    pub fn feature(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }

    /// Features encode booleans as `""` (false) or any other value (true).
    pub fn feature_bool(&self, name: &str, default: bool) -> bool {
        self.feature(name).map_or(default, |v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_features_follow_empty_string_convention() {
        let vm = Domain::new("work", DomainClass::AppVM)
            .with_feature("servicevm", "1")
            .with_feature("restart-after-update", "");

        assert!(vm.feature_bool("servicevm", false));
        assert!(!vm.feature_bool("restart-after-update", true));
        assert!(vm.feature_bool("missing", true));
        assert!(!vm.feature_bool("missing", false));
    }
}
