// Policy pages: rule lines, per-page rule wrappers, the row edit state
// machine and the handler that owns one policy file.

pub mod handler;
pub mod row;
pub mod rule;
pub mod wrapper;

pub use handler::{
    CLIPBOARD_POLICY, FILECOPY_POLICY, OPENINVM_POLICY, OPENURL_POLICY, POLICY_PAGES,
    PolicyHandler, PolicyLayout, PolicyPageDef, SPLITGPG_POLICY, policy_def,
};
pub use row::{EditDecision, QubeNames, Revert, RuleEdit, RuleRow};
pub use rule::{Action, PolicyFile, Rule, rules_to_text, same_rules, text_to_rules};
pub use wrapper::{RuleKind, WrappedRule, cmp_rules, cmp_token};
