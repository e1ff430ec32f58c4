// ── Policy rule rows ──
//
// Display/edit state machine for one row of a policy page. While editing,
// the row holds the values being typed next to the stored rule; accepting
// validates them against the sibling rows and only then rewrites the rule.

use std::fmt;

use qubes_admin::Domain;
use serde::Serialize;

use super::rule::Action;
use super::wrapper::{ADMINVM, ANYVM, DISPVM, RuleKind, WrappedRule};
use crate::error::CoreError;

/// Keywords a source may use.
const SOURCE_KEYWORDS: &[&str] = &[ANYVM, "@type:AppVM", "@type:TemplateVM", "@type:DispVM"];

/// Keywords a target may use.
const TARGET_KEYWORDS: &[&str] = &[
    ANYVM,
    DISPVM,
    "@type:AppVM",
    "@type:TemplateVM",
    "@type:DispVM",
];

/// Values being edited, as displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleEdit {
    pub source: String,
    pub target: String,
    pub action: Action,
}

/// What a caller decided for a row with pending edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditDecision {
    Save,
    Discard,
}

/// Result of cancelling an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revert {
    /// The row was never accepted and must be dropped.
    Delete,
    /// The row went back to its stored values.
    Restored,
}

/// Names a row may refer to.
#[derive(Debug, Clone, Copy)]
pub struct QubeNames<'a> {
    pub qubes: &'a [Domain],
    pub include_adminvm: bool,
}

impl QubeNames<'_> {
    fn check(&self, token: &str, keywords: &[&str]) -> Result<(), CoreError> {
        let known = if token.starts_with('@') {
            keywords.contains(&token) || (self.include_adminvm && token == ADMINVM)
        } else {
            self.qubes
                .iter()
                .any(|d| d.name == token && (self.include_adminvm || !d.is_admin()))
        };
        if known {
            Ok(())
        } else {
            Err(CoreError::validation(format!("{token} is not a valid qube name.")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRow {
    rule: WrappedRule,
    editing: Option<RuleEdit>,
    is_new: bool,
    deletable: bool,
    vm_editable: bool,
}

impl RuleRow {
    pub fn new(rule: WrappedRule, deletable: bool, vm_editable: bool) -> Self {
        Self {
            rule,
            editing: None,
            is_new: false,
            deletable,
            vm_editable,
        }
    }

    /// A row created by "add rule": new and already in edit mode.
    pub fn new_row(rule: WrappedRule) -> Self {
        let mut row = Self::new(rule, true, true);
        row.is_new = true;
        row.start_edit();
        row
    }

    pub fn rule(&self) -> &WrappedRule {
        &self.rule
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn deletable(&self) -> bool {
        self.deletable
    }

    pub fn vm_editable(&self) -> bool {
        self.vm_editable
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn edit(&self) -> Option<&RuleEdit> {
        self.editing.as_ref()
    }

    fn current(&self) -> RuleEdit {
        RuleEdit {
            source: self.rule.source().to_owned(),
            target: self.rule.target(),
            action: self.rule.action(),
        }
    }

    pub fn start_edit(&mut self) {
        if self.editing.is_none() {
            self.editing = Some(self.current());
        }
    }

    /// Replace the values being edited. Source and target stay put on
    /// rows whose qubes are fixed.
    pub fn set_edit(&mut self, mut edit: RuleEdit) -> Result<(), CoreError> {
        let current = self.current();
        if !self.vm_editable {
            edit.source = current.source;
            edit.target = current.target;
        }
        match &mut self.editing {
            Some(slot) => {
                *slot = edit;
                Ok(())
            }
            None => Err(CoreError::validation("Row is not being edited")),
        }
    }

    /// Whether the edit in progress differs from the stored rule.
    pub fn is_changed(&self) -> bool {
        self.editing
            .as_ref()
            .is_some_and(|edit| self.is_new || *edit != self.current())
    }

    pub fn revert(&mut self) -> Revert {
        self.editing = None;
        if self.is_new {
            Revert::Delete
        } else {
            Revert::Restored
        }
    }

    /// Check the pending edit. `siblings` are the other rows of the page.
    pub fn validate<'a>(
        &self,
        siblings: impl IntoIterator<Item = &'a RuleRow>,
        names: QubeNames<'_>,
    ) -> Result<(), CoreError> {
        let Some(edit) = &self.editing else {
            return Ok(());
        };
        let kind = self.rule.kind();

        if let Some(error) = kind.rule_errors(&edit.source, &edit.target, &edit.action.to_string()) {
            return Err(CoreError::validation(format!("This rule is not valid: {error}")));
        }

        names.check(&edit.source, SOURCE_KEYWORDS)?;
        let free_target = !matches!(kind, RuleKind::TargetedAdminVm)
            && !(kind == RuleKind::DispVm && edit.action == Action::Deny);
        if free_target {
            names.check(&edit.target, TARGET_KEYWORDS)?;
        }

        for other in siblings {
            if std::ptr::eq(other, self) {
                continue;
            }
            if other
                .rule
                .is_conflicting(&edit.source, &edit.target, edit.action)
            {
                return Err(CoreError::validation(format!(
                    "This rule conflicts with the following existing rule:\n{other}\n"
                )));
            }
        }
        Ok(())
    }

    /// Write the pending edit into the rule and leave edit mode.
    ///
    /// Callers validate first; on error the row stays in edit mode.
    pub fn apply(&mut self) -> Result<(), CoreError> {
        let Some(edit) = self.editing.clone() else {
            return Ok(());
        };
        let old_target = self.rule.target();
        let mut rule = self.rule.clone();
        rule.set_action(edit.action)?;
        rule.set_source(edit.source);
        if edit.target != old_target {
            rule.set_target(&edit.target)?;
        }
        self.rule = rule;
        self.editing = None;
        self.is_new = false;
        Ok(())
    }
}

impl fmt::Display for RuleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.rule.kind();
        write!(
            f,
            "From: {} to: {} Action: {}",
            self.rule.source(),
            self.rule.target(),
            kind.action_label(self.rule.action())
        )
    }
}
