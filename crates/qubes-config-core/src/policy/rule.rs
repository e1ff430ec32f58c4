// ── Policy rule lines ──
//
// Just enough of the policy format to edit the simple
// `service argument source target action [key=value ...]` lines these
// pages own. Comments, other services and anything that does not parse
// are carried through verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::CoreError;

/// Argument token meaning "any argument".
pub const ANY_ARGUMENT: &str = "*";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Allow,
    Ask,
    Deny,
}

/// One policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub service: String,
    /// `None` for the `*` argument.
    pub argument: Option<String>,
    pub source: String,
    pub target: String,
    pub action: Action,
    /// Action parameters such as `target=` or `default_target=`, in order.
    pub params: Vec<(String, String)>,
}

impl Rule {
    pub fn new(
        service: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        action: Action,
    ) -> Self {
        Self {
            service: service.into(),
            argument: None,
            source: source.into(),
            target: target.into(),
            action,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(key, Some(value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set or (with `None`) remove an action parameter.
    pub fn set_param(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match value {
            Some(value) => match self.params.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => self.params.push((key, value)),
            },
            None => self.params.retain(|(k, _)| *k != key),
        }
    }

    /// Replace the action; parameters belong to the old action and go away.
    pub fn set_action(&mut self, action: Action) {
        self.action = action;
        self.params.clear();
    }

    /// Action with its parameters, e.g. `allow target=work`.
    pub fn action_text(&self) -> String {
        let mut text = self.action.to_string();
        for (k, v) in &self.params {
            text.push(' ');
            text.push_str(k);
            text.push('=');
            text.push_str(v);
        }
        text
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.service,
            self.argument.as_deref().unwrap_or(ANY_ARGUMENT),
            self.source,
            self.target,
            self.action_text()
        )
    }
}

impl FromStr for Rule {
    type Err = CoreError;

    fn from_str(line: &str) -> Result<Self, CoreError> {
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| {
            fields
                .next()
                .ok_or_else(|| CoreError::validation(format!("missing {what} in rule: {line}")))
        };
        let service = next("service")?.to_owned();
        let argument = next("argument")?;
        let source = next("source")?.to_owned();
        let target = next("target")?.to_owned();
        let action_word = next("action")?;
        let action = Action::from_str(action_word)
            .map_err(|_| CoreError::validation(format!("unknown action {action_word:?}")))?;

        let mut params = Vec::new();
        for param in fields {
            let (k, v) = param
                .split_once('=')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| CoreError::validation(format!("invalid action parameter {param:?}")))?;
            params.push((k.to_owned(), v.to_owned()));
        }

        Ok(Self {
            service,
            argument: (argument != ANY_ARGUMENT).then(|| argument.to_owned()),
            source,
            target,
            action,
            params,
        })
    }
}

/// Parse policy text into rules, failing on the first bad line.
pub fn text_to_rules(text: &str) -> Result<Vec<Rule>, CoreError> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(Rule::from_str)
        .collect()
}

pub fn rules_to_text(rules: &[Rule]) -> String {
    rules.iter().map(|r| format!("{r}\n")).collect()
}

/// Ordered comparison by rendered text.
pub fn same_rules(a: &[Rule], b: &[Rule]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_string() == y.to_string())
}

// ── Policy files ────────────────────────────────────────────────────

/// A policy file split into the rules of one service and everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyFile {
    /// Lines that are not rules of the edited service, verbatim.
    pub preserved: Vec<String>,
    pub rules: Vec<Rule>,
}

impl PolicyFile {
    pub fn parse(text: &str, service: &str) -> Self {
        let mut file = Self::default();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('#') {
                if let Ok(rule) = Rule::from_str(trimmed) {
                    if rule.service == service {
                        file.rules.push(rule);
                        continue;
                    }
                }
            }
            file.preserved.push(line.to_owned());
        }
        file
    }

    /// Preserved lines first, then the given rules.
    pub fn render(&self, rules: &[Rule]) -> String {
        let mut text: String = self.preserved.iter().map(|l| format!("{l}\n")).collect();
        text.push_str(&rules_to_text(rules));
        text
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_rule_with_params() {
        let rule: Rule = "qubes.Gpg * work @default allow target=vault".parse().unwrap();
        assert_eq!(rule.service, "qubes.Gpg");
        assert_eq!(rule.argument, None);
        assert_eq!(rule.action, Action::Allow);
        assert_eq!(rule.param("target"), Some("vault"));
        assert_eq!(rule.action_text(), "allow target=vault");
        assert_eq!(rule.to_string(), "qubes.Gpg\t*\twork\t@default\tallow target=vault");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("qubes.Gpg * work".parse::<Rule>().is_err());
        assert!("qubes.Gpg * work vault maybe".parse::<Rule>().is_err());
        assert!("qubes.Gpg * work vault allow target".parse::<Rule>().is_err());
    }

    #[test]
    fn set_action_drops_params() {
        let mut rule = Rule::new("s", "a", "@default", Action::Ask).with_param("default_target", "b");
        rule.set_action(Action::Deny);
        assert!(rule.params.is_empty());
    }

    #[test]
    fn file_keeps_foreign_lines() {
        let text = "# managed by hand\n\
                    qubes.Filecopy * work personal allow\n\
                    qubes.Other * @anyvm @anyvm deny\n\
                    this is not a rule\n\
                    \n\
                    qubes.Filecopy * @anyvm @anyvm ask\n";
        let file = PolicyFile::parse(text, "qubes.Filecopy");
        assert_eq!(file.rules.len(), 2);
        assert_eq!(
            file.preserved,
            vec![
                "# managed by hand",
                "qubes.Other * @anyvm @anyvm deny",
                "this is not a rule"
            ]
        );
        let rendered = file.render(&file.rules[1..]);
        assert_eq!(
            rendered,
            "# managed by hand\nqubes.Other * @anyvm @anyvm deny\nthis is not a rule\n\
             qubes.Filecopy\t*\t@anyvm\t@anyvm\task\n"
        );
    }

    #[test]
    fn rule_lists_compare_by_text() {
        let a = text_to_rules("s * @anyvm @anyvm deny").unwrap();
        let b = text_to_rules("s   *  @anyvm\t@anyvm deny\n# comment").unwrap();
        assert!(same_rules(&a, &b));
        assert!(!same_rules(&a, &[]));
    }
}
