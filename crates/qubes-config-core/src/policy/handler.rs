// ── Policy page handler ──
//
// Owns one policy file: reads it with its token, splits the rules of the
// page's service into a main list and an exception list, tracks edits and
// writes the whole file back guarded by the token it was read with.

use std::sync::Arc;

use qubes_admin::{AdminClient, Domain, PolicyStore, TOKEN_NEW};
use tracing::{debug, info, warn};

use super::row::{EditDecision, QubeNames, Revert, RuleEdit, RuleRow};
use super::rule::{Action, PolicyFile, Rule, rules_to_text, same_rules, text_to_rules};
use super::wrapper::{ANYVM, DEFAULT, RuleKind, WrappedRule, cmp_rules};
use crate::context::Locale;
use crate::error::CoreError;
use crate::events::{ChangeKind, EventBus, RowChanged, RowList};

/// How rules are split between the two lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyLayout {
    /// `@anyvm → @anyvm` rules in the main list, everything else an exception.
    Standard,
    /// Main rules name the qubes holding keys; exceptions may only target them.
    KeyQubes,
    /// Exceptions only; no default toggle.
    ExceptionsOnly,
}

/// Static description of one policy-backed section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyPageDef {
    pub key: &'static str,
    pub service: &'static str,
    pub file_name: &'static str,
    pub default_policy: &'static str,
    pub main_kind: RuleKind,
    pub exception_kind: RuleKind,
    pub include_adminvm: bool,
    pub layout: PolicyLayout,
    /// Source, target and action of a freshly added exception.
    pub new_rule: (&'static str, &'static str, &'static str),
    pub unsaved_label: &'static str,
}

pub const CLIPBOARD_POLICY: PolicyPageDef = PolicyPageDef {
    key: "clipboard",
    service: "qubes.ClipboardPaste",
    file_name: "50-config-clipboard",
    default_policy: "qubes.ClipboardPaste * @adminvm @anyvm ask\n\
                     qubes.ClipboardPaste * @anyvm @anyvm ask\n",
    main_kind: RuleKind::SimpleAskIsAllow,
    exception_kind: RuleKind::SimpleAskIsAllow,
    include_adminvm: true,
    layout: PolicyLayout::Standard,
    new_rule: (ANYVM, ANYVM, "deny"),
    unsaved_label: "Policy rules",
};

pub const FILECOPY_POLICY: PolicyPageDef = PolicyPageDef {
    key: "filecopy",
    service: "qubes.Filecopy",
    file_name: "50-config-filecopy",
    default_policy: "qubes.Filecopy * @anyvm @adminvm deny\n\
                     qubes.Filecopy * @anyvm @anyvm ask\n",
    main_kind: RuleKind::Simple,
    exception_kind: RuleKind::Simple,
    include_adminvm: false,
    layout: PolicyLayout::Standard,
    new_rule: (ANYVM, ANYVM, "deny"),
    unsaved_label: "Policy rules",
};

pub const OPENINVM_POLICY: PolicyPageDef = PolicyPageDef {
    key: "openinvm",
    service: "qubes.OpenInVM",
    file_name: "50-config-openinvm",
    default_policy: "",
    main_kind: RuleKind::DispVm,
    exception_kind: RuleKind::DispVm,
    include_adminvm: false,
    layout: PolicyLayout::ExceptionsOnly,
    new_rule: (ANYVM, "@dispvm", "allow target=@dispvm"),
    unsaved_label: "Exceptions for disposable templates ",
};

pub const OPENURL_POLICY: PolicyPageDef = PolicyPageDef {
    key: "openurl",
    service: "qubes.OpenURL",
    file_name: "50-config-openurl",
    ..OPENINVM_POLICY
};

pub const SPLITGPG_POLICY: PolicyPageDef = PolicyPageDef {
    key: "splitgpg",
    service: "qubes.Gpg",
    file_name: "50-config-splitgpg",
    default_policy: "",
    main_kind: RuleKind::SimpleNoAllow,
    exception_kind: RuleKind::Targeted,
    include_adminvm: false,
    layout: PolicyLayout::KeyQubes,
    new_rule: ("", "", "deny"),
    unsaved_label: "Policy rules",
};

pub const POLICY_PAGES: &[PolicyPageDef] = &[
    CLIPBOARD_POLICY,
    FILECOPY_POLICY,
    OPENINVM_POLICY,
    OPENURL_POLICY,
    SPLITGPG_POLICY,
];

pub fn policy_def(key: &str) -> Option<&'static PolicyPageDef> {
    POLICY_PAGES.iter().find(|d| d.key == key)
}

// ── PolicyHandler ───────────────────────────────────────────────────

pub struct PolicyHandler {
    def: PolicyPageDef,
    store: Arc<dyn PolicyStore>,
    locale: Arc<Locale>,
    qubes: Vec<Domain>,
    file: PolicyFile,
    token: String,
    main: Vec<RuleRow>,
    exceptions: Vec<RuleRow>,
    errors: Vec<Rule>,
    use_default: bool,
    initial_rules: Vec<Rule>,
    /// Rules as last read or written, unparseable ones included.
    loaded_rules: Vec<Rule>,
    bus: EventBus<RowChanged>,
}

impl PolicyHandler {
    /// Read the policy file and build the rule lists.
    pub fn new(
        def: PolicyPageDef,
        store: Arc<dyn PolicyStore>,
        client: &dyn AdminClient,
        locale: Arc<Locale>,
    ) -> Result<Self, CoreError> {
        let mut handler = Self {
            def,
            store,
            locale,
            qubes: client.domains()?,
            file: PolicyFile::default(),
            token: TOKEN_NEW.to_owned(),
            main: Vec::new(),
            exceptions: Vec::new(),
            errors: Vec::new(),
            use_default: false,
            initial_rules: Vec::new(),
            loaded_rules: Vec::new(),
            bus: EventBus::new(),
        };
        handler.initialize()?;
        Ok(handler)
    }

    fn default_rules(&self) -> Vec<Rule> {
        text_to_rules(self.def.default_policy).unwrap_or_default()
    }

    fn initialize(&mut self) -> Result<(), CoreError> {
        let (rules, token) = match self.store.policy_get(self.def.file_name) {
            Ok((text, token)) => {
                self.file = PolicyFile::parse(&text, self.def.service);
                (std::mem::take(&mut self.file.rules), token)
            }
            Err(e) if e.is_not_found() => {
                self.file = PolicyFile::default();
                (self.default_rules(), TOKEN_NEW.to_owned())
            }
            Err(e) => return Err(e.into()),
        };
        debug!(file = self.def.file_name, rules = rules.len(), "policy loaded");
        self.token = token;
        self.loaded_rules.clone_from(&rules);
        self.populate(rules);
        self.initial_rules = self.current_rules();
        Ok(())
    }

    fn populate(&mut self, rules: Vec<Rule>) {
        self.main.clear();
        self.exceptions.clear();
        self.errors.clear();
        self.use_default = self.def.layout != PolicyLayout::ExceptionsOnly
            && same_rules(&rules, &self.default_rules());

        match self.def.layout {
            PolicyLayout::Standard | PolicyLayout::ExceptionsOnly => self.populate_standard(rules),
            PolicyLayout::KeyQubes => self.populate_key_qubes(rules),
        }
        self.sort_exceptions();
    }

    fn populate_standard(&mut self, rules: Vec<Rule>) {
        for rule in rules {
            let include_adminvm = self.def.include_adminvm;
            if self.def.layout == PolicyLayout::Standard {
                if let Ok(wrapped) = self.def.main_kind.wrap(rule.clone()) {
                    if wrapped.is_fundamental() {
                        self.main.push(RuleRow::new(wrapped, false, false));
                        continue;
                    }
                }
            }
            match self.def.exception_kind.wrap(rule.clone()) {
                Ok(wrapped) => {
                    let fixed = include_adminvm
                        && wrapped.source() == "@adminvm"
                        && wrapped.raw().target == ANYVM;
                    self.exceptions.push(RuleRow::new(wrapped, !fixed, !fixed));
                }
                Err(_) => self.errors.push(rule),
            }
        }

        if self.def.layout == PolicyLayout::Standard && self.main.is_empty() {
            let deny_all = Rule::new(self.def.service, ANYVM, ANYVM, Action::Deny);
            if let Ok(wrapped) = self.def.main_kind.wrap(deny_all) {
                self.main.push(RuleRow::new(wrapped, false, false));
            }
        }
    }

    fn populate_key_qubes(&mut self, rules: Vec<Rule>) {
        let mut rest = Vec::new();
        for rule in &rules {
            if rule.source != ANYVM {
                rest.push(rule);
                continue;
            }
            match self.def.main_kind.wrap(rule.clone()) {
                Ok(wrapped) if !rule.target.starts_with('@') => {
                    self.main.push(RuleRow::new(wrapped, true, false));
                }
                _ => self.errors.push(rule.clone()),
            }
        }

        let key_qubes = self.key_qubes();
        for rule in rest {
            if rule.target != DEFAULT && has_partial_duplicate(rule, &rules) {
                continue;
            }
            match self.def.exception_kind.wrap(rule.clone()) {
                Ok(wrapped) if key_qubes.contains(&wrapped.target()) => {
                    self.exceptions.push(RuleRow::new(wrapped, true, true));
                }
                _ => self.errors.push(rule.clone()),
            }
        }
    }

    fn sort_exceptions(&mut self) {
        self.exceptions.sort_by(|a, b| cmp_rules(a.rule(), b.rule()));
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn def(&self) -> &PolicyPageDef {
        &self.def
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn rows(&self, list: RowList) -> &[RuleRow] {
        match list {
            RowList::PolicyMain => &self.main,
            _ => &self.exceptions,
        }
    }

    /// Rules kept aside because this page cannot display them.
    pub fn errors(&self) -> &[Rule] {
        &self.errors
    }

    pub fn use_default(&self) -> bool {
        self.use_default
    }

    pub fn event_bus(&mut self) -> &mut EventBus<RowChanged> {
        &mut self.bus
    }

    /// Qubes named by the main list of a key-qube page.
    pub fn key_qubes(&self) -> Vec<String> {
        self.main.iter().map(|r| r.rule().target()).collect()
    }

    /// Rules that would be written, in file order.
    pub fn current_rules(&self) -> Vec<Rule> {
        if self.use_default {
            return self.default_rules();
        }
        let mut rules: Vec<Rule> = Vec::new();
        for row in self.exceptions.iter().filter(|r| !r.is_new()) {
            let rule = row.rule().raw().clone();
            push_unique(&mut rules, rule.clone());
            if self.def.layout == PolicyLayout::KeyQubes && rule.target == DEFAULT {
                let target = rule.param("default_target").or_else(|| rule.param("target"));
                if let Some(target) = target {
                    let plain = Rule::new(&rule.service, &rule.source, target, rule.action);
                    push_unique(&mut rules, plain);
                }
            }
        }
        rules.extend(
            self.main
                .iter()
                .filter(|r| !r.is_new())
                .map(|r| r.rule().raw().clone()),
        );
        rules
    }

    pub fn raw_text(&self) -> String {
        rules_to_text(&self.current_rules())
    }

    // ── Editing ──────────────────────────────────────────────────────

    /// Switch between the default policy and custom rules.
    pub fn set_use_default(&mut self, value: bool) {
        if value != self.use_default {
            self.use_default = value;
            if !value && self.main.is_empty() && self.exceptions.is_empty() {
                let rules = self.default_rules();
                self.populate(rules);
                self.use_default = false;
            }
        }
    }

    fn names(&self) -> QubeNames<'_> {
        QubeNames {
            qubes: &self.qubes,
            include_adminvm: self.def.include_adminvm,
        }
    }

    fn list_mut(&mut self, list: RowList) -> &mut Vec<RuleRow> {
        match list {
            RowList::PolicyMain => &mut self.main,
            _ => &mut self.exceptions,
        }
    }

    fn row_mut(&mut self, list: RowList, index: usize) -> Result<&mut RuleRow, CoreError> {
        self.list_mut(list)
            .get_mut(index)
            .ok_or_else(|| row_not_found(index))
    }

    /// Append a new exception in edit mode and return its index.
    pub fn add_rule(&mut self) -> Result<usize, CoreError> {
        let (source, target, action) = self.def.new_rule;
        let text = if self.def.layout == PolicyLayout::KeyQubes {
            let qube = self
                .key_qubes()
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::validation("Add a qube with keys first"))?;
            format!("{} * {qube} {qube} {action}", self.def.service)
        } else {
            format!("{} * {source} {target} {action}", self.def.service)
        };
        let rule: Rule = text.parse()?;
        let wrapped = self.def.exception_kind.wrap(rule)?;
        self.use_default = false;
        self.exceptions.push(RuleRow::new_row(wrapped));
        Ok(self.exceptions.len() - 1)
    }

    /// Add a main rule naming a qube that holds keys.
    pub fn add_key_qube(&mut self, name: &str) -> Result<String, CoreError> {
        if self.def.layout != PolicyLayout::KeyQubes {
            return Err(CoreError::validation("This page has no key qubes"));
        }
        if !self.qubes.iter().any(|d| d.name == name && !d.is_admin()) {
            return Err(CoreError::validation(format!(
                "Invalid object was selected. {name} is not a valid Qubes qube."
            )));
        }
        if self.key_qubes().iter().any(|q| q == name) {
            return Err(CoreError::validation(format!("{name} already holds keys")));
        }
        let rule = Rule::new(self.def.service, ANYVM, name, Action::Ask);
        let wrapped = self.def.main_kind.wrap(rule)?;
        let row = RuleRow::new(wrapped, true, false);
        let text = row.to_string();
        self.use_default = false;
        self.main.push(row);
        self.bus
            .emit(&RowChanged::new(RowList::PolicyMain, ChangeKind::Added, &text));
        Ok(text)
    }

    pub fn start_edit(&mut self, list: RowList, index: usize) -> Result<(), CoreError> {
        self.row_mut(list, index)?.start_edit();
        Ok(())
    }

    pub fn set_edit(&mut self, list: RowList, index: usize, edit: RuleEdit) -> Result<(), CoreError> {
        self.row_mut(list, index)?.set_edit(edit)
    }

    /// Validate and commit a row's edit. On error the row stays in edit mode.
    pub fn accept_edit(&mut self, list: RowList, index: usize) -> Result<String, CoreError> {
        let names = self.names();
        let row = self.rows(list).get(index).ok_or_else(|| row_not_found(index))?;
        row.validate(self.main.iter().chain(&self.exceptions), names)
            .map_err(|e| CoreError::validation(self.locale.tr(&e.to_string()).to_owned()))?;
        if self.def.layout == PolicyLayout::KeyQubes && list == RowList::PolicyExceptions {
            if let Some(edit) = row.edit() {
                if !self.key_qubes().contains(&edit.target) {
                    return Err(CoreError::validation(format!(
                        "{} is not a qube with keys.",
                        edit.target
                    )));
                }
            }
        }

        let was_new = row.is_new();
        let row = self.row_mut(list, index)?;
        row.apply()?;
        let text = row.to_string();
        self.use_default = false;
        if list == RowList::PolicyExceptions {
            self.sort_exceptions();
        }
        let kind = if was_new { ChangeKind::Added } else { ChangeKind::Edited };
        self.bus.emit(&RowChanged::new(list, kind, &text));
        Ok(text)
    }

    /// Drop a row's edit; a row that was never accepted disappears.
    pub fn cancel_edit(&mut self, list: RowList, index: usize) -> Result<(), CoreError> {
        let row = self.row_mut(list, index)?;
        let text = row.to_string();
        if row.revert() == Revert::Delete {
            self.list_mut(list).remove(index);
        }
        self.bus
            .emit(&RowChanged::new(list, ChangeKind::Reverted, text));
        Ok(())
    }

    pub fn remove_rule(&mut self, list: RowList, index: usize) -> Result<String, CoreError> {
        let row = self.rows(list).get(index).ok_or_else(|| row_not_found(index))?;
        if !row.deletable() {
            return Err(CoreError::validation("This rule cannot be removed"));
        }
        let removed = self.list_mut(list).remove(index);
        let text = removed.to_string();
        self.use_default = false;
        if self.def.layout == PolicyLayout::KeyQubes && list == RowList::PolicyMain {
            let key_qubes = self.key_qubes();
            self.exceptions
                .retain(|r| key_qubes.contains(&r.rule().target()));
        }
        self.bus
            .emit(&RowChanged::new(list, ChangeKind::Removed, &text));
        Ok(text)
    }

    /// Close every row that is being edited. Changed rows go through
    /// `decide`; a save that fails validation reverts the row.
    pub fn close_all_edits(&mut self, mut decide: impl FnMut(&RuleRow) -> EditDecision) {
        for list in [RowList::PolicyExceptions, RowList::PolicyMain] {
            while let Some(index) = self.rows(list).iter().position(RuleRow::is_editing) {
                let row = &self.rows(list)[index];
                let saved = row.is_changed()
                    && decide(row) == EditDecision::Save
                    && self.accept_edit(list, index).is_ok();
                if !saved {
                    if let Err(e) = self.cancel_edit(list, index) {
                        warn!(error = %e, %list, index, "could not revert edited row");
                        break;
                    }
                }
            }
        }
    }

    /// Replace the rules with the given policy text.
    pub fn apply_raw(&mut self, text: &str) -> Result<(), CoreError> {
        let rules = text_to_rules(text).map_err(|e| {
            CoreError::validation(format!("The following rules could not be parsed:\n{e}\n"))
        })?;
        let rules: Vec<Rule> = rules
            .into_iter()
            .filter(|r| r.service == self.def.service)
            .collect();
        self.populate(rules);
        if self.errors.is_empty() {
            Ok(())
        } else {
            let listed = rules_to_text(&self.errors);
            Err(CoreError::validation(format!(
                "The following rules could not be parsed:\n{listed}"
            )))
        }
    }

    // ── Page contract ────────────────────────────────────────────────

    pub fn reset(&mut self) {
        let rules = self.loaded_rules.clone();
        self.populate(rules);
    }

    pub fn save(&mut self) -> Result<(), CoreError> {
        let rules = self.current_rules();
        let mut to_write = rules.clone();
        if !self.use_default {
            to_write.extend(self.errors.iter().cloned());
        }
        let text = self.file.render(&to_write);
        info!(file = self.def.file_name, rules = rules.len(), "saving policy");
        self.store
            .policy_replace(self.def.file_name, &text, &self.token)?;
        let (_, token) = self.store.policy_get(self.def.file_name)?;
        self.token = token;
        self.initial_rules = rules;
        self.loaded_rules = to_write;
        Ok(())
    }

    pub fn get_unsaved(&mut self, decide: impl FnMut(&RuleRow) -> EditDecision) -> String {
        self.close_all_edits(decide);
        if same_rules(&self.initial_rules, &self.current_rules()) {
            String::new()
        } else {
            self.locale.tr(self.def.unsaved_label).to_owned()
        }
    }

    /// Wrap a rule with this page's exception kind.
    pub fn wrap_exception(&self, rule: Rule) -> Result<WrappedRule, CoreError> {
        self.def.exception_kind.wrap(rule)
    }
}

fn push_unique(rules: &mut Vec<Rule>, rule: Rule) {
    let text = rule.to_string();
    if !rules.iter().any(|r| r.to_string() == text) {
        rules.push(rule);
    }
}

/// A plain-target rule shadowed by a `@default` rule of the same source
/// that redirects to that target.
fn has_partial_duplicate(rule: &Rule, rules: &[Rule]) -> bool {
    rules.iter().any(|other| {
        other.source == rule.source
            && other.target == DEFAULT
            && (other.param("target") == Some(rule.target.as_str())
                || other.param("default_target") == Some(rule.target.as_str()))
    })
}

fn row_not_found(index: usize) -> CoreError {
    CoreError::NotFound {
        entity_type: "row".into(),
        identifier: index.to_string(),
    }
}
