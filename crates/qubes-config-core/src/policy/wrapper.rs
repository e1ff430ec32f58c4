// ── Rule wrappers ──
//
// A page shows a rule as (source, action, target) where the displayed
// target may live in an action parameter rather than in the target
// column. `RuleKind` decides which rules a page can show and how the
// three displayed values map onto the stored rule.

use std::cmp::Ordering;

use serde::Serialize;
use strum::Display;

use super::rule::{Action, Rule};
use crate::error::CoreError;

pub const ANYVM: &str = "@anyvm";
pub const ADMINVM: &str = "@adminvm";
pub const DISPVM: &str = "@dispvm";
pub const DEFAULT: &str = "@default";

const DISPVM_PREFIX: &str = "@dispvm:";
const PARAM_TARGET: &str = "target";
const PARAM_DEFAULT_TARGET: &str = "default_target";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleKind {
    /// Plain ask/allow/deny without parameters.
    Simple,
    /// Ask and deny only; ask is presented as "always".
    SimpleAskIsAllow,
    /// Ask and deny only.
    SimpleNoAllow,
    /// Allow and ask may redirect to a single qube via `@default`.
    Targeted,
    /// Target pinned to the admin qube.
    TargetedAdminVm,
    /// Target is `@dispvm`; the disposable template lives in a parameter.
    DispVm,
}

impl RuleKind {
    /// Actions this kind offers, with their display labels.
    pub fn action_choices(self) -> &'static [(Action, &'static str)] {
        match self {
            Self::Simple | Self::DispVm => &[
                (Action::Ask, "ask"),
                (Action::Allow, "always"),
                (Action::Deny, "never"),
            ],
            Self::SimpleAskIsAllow => &[(Action::Ask, "always"), (Action::Deny, "never")],
            Self::SimpleNoAllow => &[(Action::Ask, "can"), (Action::Deny, "can not")],
            Self::Targeted => &[
                (Action::Ask, "ask"),
                (Action::Allow, "automatically"),
                (Action::Deny, "never"),
            ],
            Self::TargetedAdminVm => &[
                (Action::Ask, "enable"),
                (Action::Allow, "allow"),
                (Action::Deny, "disable"),
            ],
        }
    }

    pub fn action_label(self, action: Action) -> &'static str {
        self.action_choices()
            .iter()
            .find(|(a, _)| *a == action)
            .map_or("", |(_, label)| label)
    }

    /// Why a rule with these displayed values would be invalid.
    ///
    /// `action` is the full action text, parameters included.
    pub fn rule_errors(self, source: &str, target: &str, action: &str) -> Option<String> {
        match self {
            Self::SimpleAskIsAllow | Self::SimpleNoAllow => {
                (!matches!(action, "ask" | "deny")).then(|| format!("Unrecognized action: {action}"))
            }
            Self::Targeted => {
                let single_source = !source.starts_with('@');
                let keyword_target = target.starts_with('@') && target != DISPVM;
                (single_source && keyword_target && matches!(action, "ask" | "allow")).then(|| {
                    "This type of action supports only single-qube destination qubes for \
                     single-qube source qubes."
                        .to_owned()
                })
            }
            Self::Simple | Self::TargetedAdminVm | Self::DispVm => None,
        }
    }

    /// Wrap a stored rule, or explain why this kind cannot show it.
    pub fn wrap(self, rule: Rule) -> Result<WrappedRule, CoreError> {
        let invalid = |m: String| Err(CoreError::validation(m));
        let action_text = rule.action_text();
        match self {
            Self::Simple | Self::SimpleAskIsAllow | Self::SimpleNoAllow => {
                let allowed: &[&str] = if self == Self::Simple {
                    &["ask", "deny", "allow"]
                } else {
                    &["ask", "deny"]
                };
                if !allowed.contains(&action_text.as_str()) || rule.argument.is_some() {
                    return invalid(format!("Unrecognized action: {action_text}"));
                }
            }
            Self::TargetedAdminVm => {
                if rule.argument.is_some() {
                    return invalid("Rule cannot have an argument".into());
                }
                if rule.target != ADMINVM {
                    return invalid("Target must be @adminvm".into());
                }
                if rule.action == Action::Ask && rule.param(PARAM_DEFAULT_TARGET) != Some(ADMINVM) {
                    return invalid("If action is ask, default_target must be @adminvm".into());
                }
                if rule.action == Action::Allow && rule.param(PARAM_TARGET).is_some() {
                    return invalid("If action is allow, no parameters are allowed".into());
                }
            }
            Self::Targeted => {
                if rule.argument.is_some() {
                    return invalid("Rule cannot have an argument".into());
                }
                if let Some(error) = self.rule_errors(&rule.source, &rule.target, &action_text) {
                    return invalid(error);
                }
            }
            Self::DispVm => {
                if rule.argument.is_some() {
                    return invalid("Rule cannot have an argument".into());
                }
                if rule.target != DISPVM {
                    return invalid("Target must be @dispvm".into());
                }
                let is_dispvm = |v: Option<&str>| v.is_some_and(|v| v.starts_with(DISPVM));
                if rule.action == Action::Ask && !is_dispvm(rule.param(PARAM_DEFAULT_TARGET)) {
                    return invalid("default_target must include @dispvm".into());
                }
                if rule.action == Action::Allow && !is_dispvm(rule.param(PARAM_TARGET)) {
                    return invalid("target must include @dispvm".into());
                }
            }
        }
        Ok(WrappedRule { kind: self, rule })
    }
}

// ── WrappedRule ─────────────────────────────────────────────────────

/// A stored rule viewed through a [`RuleKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedRule {
    kind: RuleKind,
    rule: Rule,
}

impl WrappedRule {
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn raw(&self) -> &Rule {
        &self.rule
    }

    pub fn into_raw(self) -> Rule {
        self.rule
    }

    pub fn source(&self) -> &str {
        &self.rule.source
    }

    pub fn action(&self) -> Action {
        self.rule.action
    }

    /// Target as the user sees it.
    pub fn target(&self) -> String {
        let rule = &self.rule;
        match self.kind {
            RuleKind::TargetedAdminVm => ADMINVM.to_owned(),
            RuleKind::Targeted if rule.target == DEFAULT => {
                let param = match rule.action {
                    Action::Ask => rule.param(PARAM_DEFAULT_TARGET),
                    Action::Allow => rule.param(PARAM_TARGET),
                    Action::Deny => return rule.target.clone(),
                };
                param.unwrap_or_default().to_owned()
            }
            RuleKind::DispVm => {
                let param = match rule.action {
                    Action::Ask => rule.param(PARAM_DEFAULT_TARGET),
                    Action::Allow => rule.param(PARAM_TARGET),
                    Action::Deny => None,
                };
                let target = param.unwrap_or_default();
                target.strip_prefix(DISPVM_PREFIX).unwrap_or(target).to_owned()
            }
            _ => rule.target.clone(),
        }
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.rule.source = source.into();
    }

    pub fn set_target(&mut self, target: &str) -> Result<(), CoreError> {
        let rule = &mut self.rule;
        match self.kind {
            RuleKind::TargetedAdminVm => {
                return Err(CoreError::validation("Cannot set target on this type of rule."));
            }
            RuleKind::Targeted => {
                if target.starts_with('@') {
                    rule.target = target.to_owned();
                    rule.set_param(PARAM_TARGET, None);
                    rule.set_param(PARAM_DEFAULT_TARGET, None);
                } else {
                    match rule.action {
                        Action::Ask => {
                            rule.target = DEFAULT.to_owned();
                            rule.set_param(PARAM_DEFAULT_TARGET, Some(target.to_owned()));
                        }
                        Action::Allow => {
                            rule.target = DEFAULT.to_owned();
                            rule.set_param(PARAM_TARGET, Some(target.to_owned()));
                        }
                        Action::Deny => rule.target = target.to_owned(),
                    }
                }
            }
            RuleKind::DispVm => {
                let value = if target.starts_with(DISPVM) {
                    target.to_owned()
                } else {
                    format!("{DISPVM_PREFIX}{target}")
                };
                match rule.action {
                    Action::Ask => rule.set_param(PARAM_DEFAULT_TARGET, Some(value)),
                    Action::Allow => rule.set_param(PARAM_TARGET, Some(value)),
                    Action::Deny => {}
                }
            }
            RuleKind::Simple | RuleKind::SimpleAskIsAllow | RuleKind::SimpleNoAllow => {
                rule.target = target.to_owned();
            }
        }
        Ok(())
    }

    pub fn set_action(&mut self, action: Action) -> Result<(), CoreError> {
        if !self.kind.action_choices().iter().any(|(a, _)| *a == action) {
            return Err(CoreError::validation(format!("Unrecognized action: {action}")));
        }
        match self.kind {
            RuleKind::Targeted => {
                let old_target = self.target();
                self.rule.set_action(action);
                self.set_target(&old_target)?;
            }
            RuleKind::TargetedAdminVm => {
                self.rule.set_action(action);
                if action == Action::Ask {
                    self.rule.set_param(PARAM_DEFAULT_TARGET, Some(ADMINVM.to_owned()));
                }
            }
            RuleKind::DispVm => {
                let old_target = if self.rule.action == Action::Deny {
                    DISPVM.to_owned()
                } else {
                    self.target()
                };
                self.rule.set_action(action);
                if action != Action::Deny {
                    self.set_target(&old_target)?;
                }
            }
            RuleKind::Simple | RuleKind::SimpleAskIsAllow | RuleKind::SimpleNoAllow => {
                self.rule.set_action(action);
            }
        }
        Ok(())
    }

    /// Whether the rule belongs in the main list rather than the exceptions.
    pub fn is_fundamental(&self) -> bool {
        match self.kind {
            RuleKind::DispVm => false,
            RuleKind::Targeted => {
                self.source() == ANYVM && (self.target() == ANYVM || self.rule.target == DISPVM)
            }
            _ => self.source() == ANYVM && self.target() == ANYVM,
        }
    }

    /// Whether a rule with these displayed values would clash with this one.
    pub fn is_conflicting(&self, source: &str, target: &str, _action: Action) -> bool {
        let same = self.source() == source && self.target() == target;
        match self.kind {
            RuleKind::DispVm => self.source() == source,
            RuleKind::Targeted => same || (self.action() == Action::Allow && self.source() == source),
            _ => same,
        }
    }
}

// ── Ordering ────────────────────────────────────────────────────────

/// Token order for exception lists: plain names, then other keywords,
/// then `@anyvm` last.
pub fn cmp_token(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a == ANYVM {
        return Ordering::Greater;
    }
    if b == ANYVM {
        return Ordering::Less;
    }
    match (a.starts_with('@'), b.starts_with('@')) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.cmp(b),
    }
}

/// Exception row order: by source, then by target.
pub fn cmp_rules(a: &WrappedRule, b: &WrappedRule) -> Ordering {
    cmp_token(a.source(), b.source()).then_with(|| cmp_token(&a.target(), &b.target()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rule(text: &str) -> Rule {
        text.parse().unwrap()
    }

    #[test]
    fn simple_rejects_params_and_arguments() {
        assert!(RuleKind::Simple.wrap(rule("s * a b allow")).is_ok());
        let err = RuleKind::Simple.wrap(rule("s * a b allow target=c")).unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized action: allow target=c");
        assert!(RuleKind::Simple.wrap(rule("s +arg a b allow")).is_err());
        assert!(RuleKind::SimpleNoAllow.wrap(rule("s * a b allow")).is_err());
    }

    #[test]
    fn targeted_shows_default_target() {
        let wrapped = RuleKind::Targeted
            .wrap(rule("qubes.Gpg * work @default allow target=vault"))
            .unwrap();
        assert_eq!(wrapped.target(), "vault");

        let ask = RuleKind::Targeted
            .wrap(rule("qubes.Gpg * work @default ask default_target=vault"))
            .unwrap();
        assert_eq!(ask.target(), "vault");
    }

    #[test]
    fn targeted_setters_rewrite_default_form() {
        let mut wrapped = RuleKind::Targeted.wrap(rule("qubes.Gpg * work vault deny")).unwrap();
        wrapped.set_action(Action::Allow).unwrap();
        assert_eq!(wrapped.raw().target, DEFAULT);
        assert_eq!(wrapped.raw().param("target"), Some("vault"));

        wrapped.set_target("@anyvm").unwrap();
        assert_eq!(wrapped.raw().target, "@anyvm");
        assert!(wrapped.raw().params.is_empty());
    }

    #[test]
    fn targeted_single_source_needs_single_target() {
        let err = RuleKind::Targeted.rule_errors("work", "@anyvm", "allow").unwrap();
        assert!(err.starts_with("This type of action supports only single-qube"));
        assert!(RuleKind::Targeted.rule_errors("work", "@dispvm", "allow").is_none());
        assert!(RuleKind::Targeted.rule_errors("work", "@anyvm", "deny").is_none());
        assert!(RuleKind::Targeted.rule_errors("@anyvm", "@anyvm", "ask").is_none());
    }

    #[test]
    fn targeted_allow_conflicts_on_source() {
        let wrapped = RuleKind::Targeted
            .wrap(rule("qubes.Gpg * work @default allow target=vault"))
            .unwrap();
        assert!(wrapped.is_conflicting("work", "other", Action::Deny));
        assert!(!wrapped.is_conflicting("personal", "vault", Action::Deny));
    }

    #[test]
    fn adminvm_ask_gets_default_target() {
        let mut wrapped = RuleKind::TargetedAdminVm
            .wrap(rule("s * work @adminvm deny"))
            .unwrap();
        wrapped.set_action(Action::Ask).unwrap();
        assert_eq!(wrapped.raw().action_text(), "ask default_target=@adminvm");
        assert!(wrapped.set_target("work").is_err());
        assert!(RuleKind::TargetedAdminVm.wrap(rule("s * work other deny")).is_err());
    }

    #[test]
    fn dispvm_targets_are_prefixed() {
        let mut wrapped = RuleKind::DispVm
            .wrap(rule("qubes.OpenInVM * work @dispvm allow target=@dispvm:dvm-web"))
            .unwrap();
        assert_eq!(wrapped.target(), "dvm-web");
        wrapped.set_action(Action::Deny).unwrap();
        assert_eq!(wrapped.target(), "");
        wrapped.set_action(Action::Ask).unwrap();
        assert_eq!(wrapped.raw().param("default_target"), Some("@dispvm"));
        assert!(!wrapped.is_fundamental());
    }

    #[test]
    fn fundamental_rules() {
        let main = RuleKind::Simple.wrap(rule("s * @anyvm @anyvm ask")).unwrap();
        assert!(main.is_fundamental());
        let dispvm = RuleKind::Targeted.wrap(rule("s * @anyvm @dispvm ask")).unwrap();
        assert!(dispvm.is_fundamental());
        let exception = RuleKind::Simple.wrap(rule("s * work @anyvm ask")).unwrap();
        assert!(!exception.is_fundamental());
    }

    #[test]
    fn token_order() {
        let mut tokens = vec!["@anyvm", "@type:AppVM", "work", "personal", "@adminvm"];
        tokens.sort_by(|a, b| cmp_token(a, b));
        assert_eq!(tokens, vec!["personal", "work", "@adminvm", "@type:AppVM", "@anyvm"]);
    }
}
