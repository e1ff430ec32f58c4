// ── Feature choice settings ──
//
// A single qube feature picked from a fixed list of labelled values.
// `None` stands for "feature absent", which lets the system default
// apply. A stored value that is not in the list is kept as an extra
// choice so that saving an untouched page never rewrites it.

use std::sync::Arc;

use qubes_admin::AdminClient;
use serde::Serialize;
use tracing::debug;

use crate::context::Locale;
use crate::error::CoreError;

/// One labelled value of a feature choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureOption {
    pub label: &'static str,
    pub value: Option<&'static str>,
}

const fn opt(label: &'static str, value: Option<&'static str>) -> FeatureOption {
    FeatureOption { label, value }
}

/// Static description of a feature choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDef {
    pub feature: &'static str,
    pub readable_name: &'static str,
    pub options: &'static [FeatureOption],
}

pub const COPY_SHORTCUT: FeatureDef = FeatureDef {
    feature: "gui-default-secure-copy-sequence",
    readable_name: "Global Clipboard copy shortcut",
    options: &[
        opt("default (Ctrl+Shift+C)", None),
        opt("Ctrl+Shift+C", Some("Ctrl-Shift-c")),
        opt("Ctrl+Win+C", Some("Ctrl-Mod4-c")),
        opt("Win+C", Some("Mod4-c")),
    ],
};

pub const PASTE_SHORTCUT: FeatureDef = FeatureDef {
    feature: "gui-default-secure-paste-sequence",
    readable_name: "Global Clipboard paste shortcut",
    options: &[
        opt("default (Ctrl+Shift+V)", None),
        opt("Ctrl+Shift+V", Some("Ctrl-Shift-V")),
        opt("Ctrl+Win+V", Some("Ctrl-Mod4-v")),
        opt("Ctrl+Insert", Some("Ctrl-Ins")),
        opt("Win+V", Some("Mod4-v")),
    ],
};

/// A choice as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub label: String,
    pub value: Option<String>,
}

pub struct FeatureChoiceHandler {
    def: FeatureDef,
    client: Arc<dyn AdminClient>,
    locale: Arc<Locale>,
    vm: String,
    choices: Vec<Choice>,
    initial: Option<String>,
    selected: Option<String>,
}

impl FeatureChoiceHandler {
    pub fn new(
        def: FeatureDef,
        client: Arc<dyn AdminClient>,
        vm: impl Into<String>,
        locale: Arc<Locale>,
    ) -> Result<Self, CoreError> {
        let mut handler = Self {
            def,
            client,
            locale,
            vm: vm.into(),
            choices: Vec::new(),
            initial: None,
            selected: None,
        };
        handler.load()?;
        Ok(handler)
    }

    fn load(&mut self) -> Result<(), CoreError> {
        let current = self.client.feature_get(&self.vm, self.def.feature)?;
        let mut choices: Vec<Choice> = self
            .def
            .options
            .iter()
            .map(|o| Choice {
                label: self.locale.tr(o.label).to_owned(),
                value: o.value.map(str::to_owned),
            })
            .collect();
        if !choices.iter().any(|c| c.value == current) {
            if let Some(value) = &current {
                choices.push(Choice {
                    label: value.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        self.choices = choices;
        self.initial.clone_from(&current);
        self.selected = current;
        Ok(())
    }

    pub fn def(&self) -> &FeatureDef {
        &self.def
    }

    pub fn readable_name(&self) -> &str {
        self.locale.tr(self.def.readable_name)
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_label(&self) -> &str {
        self.choices
            .iter()
            .find(|c| c.value == self.selected)
            .map_or("", |c| c.label.as_str())
    }

    /// Select by stored value; `None` picks the system default.
    pub fn select(&mut self, value: Option<&str>) -> Result<(), CoreError> {
        if !self.choices.iter().any(|c| c.value.as_deref() == value) {
            return Err(CoreError::validation(format!(
                "{} is not a valid choice for {}",
                value.unwrap_or("default"),
                self.def.feature
            )));
        }
        self.selected = value.map(str::to_owned);
        Ok(())
    }

    // ── Page contract ────────────────────────────────────────────────

    /// Back to the value read at load time.
    pub fn reset(&mut self) {
        self.selected.clone_from(&self.initial);
    }

    pub fn save(&mut self) -> Result<(), CoreError> {
        if self.selected == self.initial {
            return Ok(());
        }
        debug!(vm = %self.vm, feature = self.def.feature, value = ?self.selected, "saving feature");
        match &self.selected {
            Some(value) => self.client.feature_set(&self.vm, self.def.feature, value)?,
            None => self.client.feature_delete(&self.vm, self.def.feature)?,
        }
        self.initial.clone_from(&self.selected);
        Ok(())
    }

    pub fn get_unsaved(&self) -> String {
        if self.selected == self.initial {
            String::new()
        } else {
            self.readable_name().to_owned()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use qubes_admin::{Domain, DomainClass, MemoryQubes};
    use qubes_admin::client::method::{FEATURE_REMOVE, FEATURE_SET};

    use super::*;

    fn client(copy: Option<&str>) -> Arc<MemoryQubes> {
        let qubes = Arc::new(MemoryQubes::new());
        let mut dom0 = Domain::new("dom0", DomainClass::AdminVM);
        if let Some(value) = copy {
            dom0 = dom0.with_feature(COPY_SHORTCUT.feature, value);
        }
        qubes.insert_domain(dom0);
        qubes
    }

    #[test]
    fn unknown_stored_value_becomes_a_choice() {
        let qubes = client(Some("Ctrl-Alt-c"));
        let handler = FeatureChoiceHandler::new(COPY_SHORTCUT, qubes, "dom0", Locale::identity()).unwrap();
        assert_eq!(handler.choices().len(), 5);
        assert_eq!(handler.selected(), Some("Ctrl-Alt-c"));
        assert_eq!(handler.selected_label(), "Ctrl-Alt-c");
        assert_eq!(handler.get_unsaved(), "");
    }

    #[test]
    fn default_choice_removes_feature() {
        let qubes = client(Some("Mod4-c"));
        let mut handler =
            FeatureChoiceHandler::new(COPY_SHORTCUT, qubes.clone(), "dom0", Locale::identity()).unwrap();
        handler.select(None).unwrap();
        assert_eq!(handler.get_unsaved(), "Global Clipboard copy shortcut");

        handler.save().unwrap();
        handler.save().unwrap();
        let calls = qubes.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, FEATURE_REMOVE);
        assert_eq!(handler.get_unsaved(), "");
    }

    #[test]
    fn select_and_reset() {
        let qubes = client(None);
        let mut handler =
            FeatureChoiceHandler::new(PASTE_SHORTCUT, qubes.clone(), "dom0", Locale::identity()).unwrap();
        assert!(handler.select(Some("Ctrl-Alt-v")).is_err());
        handler.select(Some("Ctrl-Ins")).unwrap();
        handler.reset();
        assert_eq!(handler.selected(), None);
        assert_eq!(handler.get_unsaved(), "");

        handler.select(Some("Ctrl-Ins")).unwrap();
        handler.save().unwrap();
        let calls = qubes.calls();
        assert_eq!(calls[0].method, FEATURE_SET);
        assert_eq!(calls[0].payload.as_deref(), Some("Ctrl-Ins"));
    }
}
