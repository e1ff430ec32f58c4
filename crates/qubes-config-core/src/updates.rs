// ── "Check for updates" settings ──
//
// dom0's own update check, the default for every other qube (stored as a
// dom0 feature) and the qubes that deviate from that default. Qubes whose
// per-qube value disagrees with the default are the exceptions.

use std::collections::BTreeSet;
use std::sync::Arc;

use qubes_admin::{AdminClient, apply_feature_change};
use serde::Serialize;
use tracing::{debug, info_span};

use crate::context::Locale;
use crate::error::CoreError;

pub const UPDATE_CHECK_FEATURE: &str = "service.qubes-update-check";
pub const DEFAULT_UPDATE_CHECK_FEATURE: &str = "config.default.qubes-update-check";

const ADMIN_VM: &str = "dom0";

/// Values shown on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheckState {
    pub dom0: bool,
    pub default: bool,
    pub exceptions_enabled: bool,
    pub exceptions: BTreeSet<String>,
}

impl UpdateCheckState {
    /// Exceptions that take effect on save.
    fn effective_exceptions(&self) -> BTreeSet<String> {
        if self.exceptions_enabled {
            self.exceptions.clone()
        } else {
            BTreeSet::new()
        }
    }
}

pub struct UpdateCheckHandler {
    client: Arc<dyn AdminClient>,
    locale: Arc<Locale>,
    /// Qubes that may be listed as exceptions.
    candidates: Vec<String>,
    initial: UpdateCheckState,
    current: UpdateCheckState,
}

impl UpdateCheckHandler {
    pub fn new(client: Arc<dyn AdminClient>, locale: Arc<Locale>) -> Result<Self, CoreError> {
        let (candidates, initial) = Self::read(client.as_ref())?;
        Ok(Self {
            client,
            locale,
            candidates,
            current: initial.clone(),
            initial,
        })
    }

    fn read(client: &dyn AdminClient) -> Result<(Vec<String>, UpdateCheckState), CoreError> {
        let dom0 = client.domain(ADMIN_VM)?;
        let default = dom0.feature_bool(DEFAULT_UPDATE_CHECK_FEATURE, true);
        let mut candidates = Vec::new();
        let mut exceptions = BTreeSet::new();
        for vm in client.domains()?.into_iter().filter(|d| !d.is_admin()) {
            if vm.feature_bool(UPDATE_CHECK_FEATURE, true) != default {
                exceptions.insert(vm.name.clone());
            }
            candidates.push(vm.name);
        }
        let state = UpdateCheckState {
            dom0: dom0.feature_bool(UPDATE_CHECK_FEATURE, true),
            default,
            exceptions_enabled: !exceptions.is_empty(),
            exceptions,
        };
        Ok((candidates, state))
    }

    pub fn state(&self) -> &UpdateCheckState {
        &self.current
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn set_dom0(&mut self, value: bool) {
        self.current.dom0 = value;
    }

    /// Flip the default. Exceptions were relative to the old default, so
    /// they are dropped.
    pub fn set_default(&mut self, value: bool) {
        if self.current.default != value {
            self.current.default = value;
            self.current.exceptions.clear();
            self.current.exceptions_enabled = false;
        }
    }

    pub fn set_exceptions_enabled(&mut self, value: bool) {
        self.current.exceptions_enabled = value;
    }

    pub fn add_exception(&mut self, vm: &str) -> Result<(), CoreError> {
        if !self.candidates.iter().any(|c| c == vm) {
            return Err(CoreError::QubeNotFound { name: vm.into() });
        }
        self.current.exceptions_enabled = true;
        self.current.exceptions.insert(vm.to_owned());
        Ok(())
    }

    pub fn remove_exception(&mut self, vm: &str) -> bool {
        self.current.exceptions.remove(vm)
    }

    fn exceptions_changed(&self) -> bool {
        self.current.exceptions_enabled != self.initial.exceptions_enabled
            || self.current.effective_exceptions() != self.initial.effective_exceptions()
    }

    // ── Page contract ────────────────────────────────────────────────

    pub fn reset(&mut self) {
        self.current = self.initial.clone();
    }

    pub fn get_unsaved(&self) -> String {
        let mut unsaved = Vec::new();
        if self.current.dom0 != self.initial.dom0 {
            unsaved.push(self.locale.tr("dom0 \"check for updates\" setting"));
        }
        if self.current.default != self.initial.default {
            unsaved.push(self.locale.tr("Default \"check for updates\" setting"));
        }
        if self.exceptions_changed() {
            unsaved.push(
                self.locale
                    .tr("Qubes selected for unusual 'check for updates' behaviors"),
            );
        }
        unsaved.join("\n")
    }

    pub fn save(&mut self) -> Result<(), CoreError> {
        let _span = info_span!("save", page = "updates").entered();
        let client = self.client.as_ref();

        if self.current.dom0 != self.initial.dom0 {
            apply_feature_change(client, ADMIN_VM, UPDATE_CHECK_FEATURE, Some(self.current.dom0))?;
            self.initial.dom0 = self.current.dom0;
        }

        let changed_default = self.current.default != self.initial.default;
        if changed_default {
            apply_feature_change(
                client,
                ADMIN_VM,
                DEFAULT_UPDATE_CHECK_FEATURE,
                Some(self.current.default),
            )?;
            self.initial.default = self.current.default;
        }

        if changed_default || self.exceptions_changed() {
            let exceptions = self.current.effective_exceptions();
            for vm in client.domains()?.into_iter().filter(|d| !d.is_admin()) {
                let desired = self.current.default != exceptions.contains(&vm.name);
                if vm.feature_bool(UPDATE_CHECK_FEATURE, true) != desired {
                    debug!(vm = %vm.name, desired, "updating check-for-updates feature");
                    // true is the implicit value, so it is stored by removing the feature
                    apply_feature_change(
                        client,
                        &vm.name,
                        UPDATE_CHECK_FEATURE,
                        (!desired).then_some(false),
                    )?;
                }
            }
            self.initial.exceptions_enabled = !exceptions.is_empty();
            self.initial.exceptions = exceptions;
            self.current.exceptions_enabled = self.initial.exceptions_enabled;
            self.current.exceptions.clone_from(&self.initial.exceptions);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use qubes_admin::client::method::{FEATURE_REMOVE, FEATURE_SET};
    use qubes_admin::{Call, Domain, DomainClass, MemoryQubes};

    use super::*;

    fn qubes() -> Arc<MemoryQubes> {
        let qubes = Arc::new(MemoryQubes::new());
        qubes.insert_domain(Domain::new("dom0", DomainClass::AdminVM));
        qubes.insert_domain(Domain::new("work", DomainClass::AppVM));
        qubes.insert_domain(
            Domain::new("vault", DomainClass::AppVM).with_feature(UPDATE_CHECK_FEATURE, ""),
        );
        qubes
    }

    #[test]
    fn loads_exceptions_against_default() {
        let handler = UpdateCheckHandler::new(qubes(), Locale::identity()).unwrap();
        let state = handler.state();
        assert!(state.dom0);
        assert!(state.default);
        assert!(state.exceptions_enabled);
        assert_eq!(state.exceptions, BTreeSet::from(["vault".to_owned()]));
        assert_eq!(handler.candidates(), ["vault", "work"]);
    }

    #[test]
    fn unsaved_lines_and_reset() {
        let qubes = qubes();
        let mut handler = UpdateCheckHandler::new(qubes.clone(), Locale::identity()).unwrap();
        handler.set_dom0(false);
        handler.set_default(false);
        assert_eq!(
            handler.get_unsaved(),
            "dom0 \"check for updates\" setting\n\
             Default \"check for updates\" setting\n\
             Qubes selected for unusual 'check for updates' behaviors"
        );
        handler.reset();
        assert_eq!(handler.get_unsaved(), "");
        assert!(qubes.calls().is_empty());
    }

    #[test]
    fn flipping_default_reconciles_every_qube() {
        let qubes = qubes();
        let mut handler = UpdateCheckHandler::new(qubes.clone(), Locale::identity()).unwrap();
        handler.set_default(false);
        handler.save().unwrap();

        assert_eq!(
            qubes.calls(),
            vec![
                Call::new("dom0", FEATURE_SET)
                    .arg(DEFAULT_UPDATE_CHECK_FEATURE)
                    .payload(""),
                Call::new("work", FEATURE_SET).arg(UPDATE_CHECK_FEATURE).payload(""),
            ]
        );
        assert_eq!(handler.get_unsaved(), "");

        qubes.clear_calls();
        handler.save().unwrap();
        assert!(qubes.calls().is_empty());
    }

    #[test]
    fn dropping_exception_removes_feature() {
        let qubes = qubes();
        let mut handler = UpdateCheckHandler::new(qubes.clone(), Locale::identity()).unwrap();
        assert!(handler.remove_exception("vault"));
        handler.save().unwrap();
        assert_eq!(
            qubes.calls(),
            vec![Call::new("vault", FEATURE_REMOVE).arg(UPDATE_CHECK_FEATURE)]
        );
    }
}
