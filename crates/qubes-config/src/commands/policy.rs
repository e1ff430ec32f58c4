//! Policy page command handlers.

use qubes_config_core::policy::{Action, PolicyPageDef, policy_def};
use qubes_config_core::{GlobalConfig, PageId, PolicyHandler, RowList, RuleEdit, RuleRow};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ActionArg, PolicyArg, PolicyArgs, PolicyCommand};
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

// ── Policy lookup ───────────────────────────────────────────────────

fn key(arg: PolicyArg) -> &'static str {
    match arg {
        PolicyArg::Clipboard => "clipboard",
        PolicyArg::Filecopy => "filecopy",
        PolicyArg::Openinvm => "openinvm",
        PolicyArg::Openurl => "openurl",
        PolicyArg::Splitgpg => "splitgpg",
    }
}

/// Page that shows this policy.
fn page_for(arg: PolicyArg) -> PageId {
    match arg {
        PolicyArg::Clipboard => PageId::Clipboard,
        PolicyArg::Filecopy | PolicyArg::Openinvm => PageId::File,
        PolicyArg::Openurl => PageId::Url,
        PolicyArg::Splitgpg => PageId::Splitgpg,
    }
}

fn definition(arg: PolicyArg) -> Result<&'static PolicyPageDef, CliError> {
    policy_def(key(arg)).ok_or_else(|| CliError::NotFound {
        resource_type: "policy".into(),
        identifier: key(arg).into(),
        list_command: "pages".into(),
    })
}

fn handler(config: &mut GlobalConfig, arg: PolicyArg) -> Result<&mut PolicyHandler, CliError> {
    let def = definition(arg)?;
    config
        .page(page_for(arg))?
        .policy_mut(def.file_name)
        .ok_or_else(|| CliError::Backend {
            message: format!("page {} does not carry the {} policy", page_for(arg), def.key),
        })
}

fn action(arg: ActionArg) -> Action {
    match arg {
        ActionArg::Allow => Action::Allow,
        ActionArg::Ask => Action::Ask,
        ActionArg::Deny => Action::Deny,
    }
}

// ── Views ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RuleView {
    list: &'static str,
    index: usize,
    source: String,
    target: String,
    action: String,
    label: &'static str,
    deletable: bool,
}

impl RuleView {
    fn new(list: RowList, index: usize, row: &RuleRow) -> Self {
        let rule = row.rule();
        Self {
            list: if list == RowList::PolicyMain { "main" } else { "exception" },
            index,
            source: rule.source().to_owned(),
            target: rule.target(),
            action: rule.action().to_string(),
            label: rule.kind().action_label(rule.action()),
            deletable: row.deletable(),
        }
    }
}

#[derive(Tabled)]
struct RuleTableRow {
    #[tabled(rename = "List")]
    list: String,
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "From")]
    source: String,
    #[tabled(rename = "To")]
    target: String,
    #[tabled(rename = "Action")]
    label: String,
    #[tabled(rename = "Removable")]
    deletable: String,
}

fn rule_views(handler: &PolicyHandler) -> Vec<RuleView> {
    [RowList::PolicyMain, RowList::PolicyExceptions]
        .into_iter()
        .flat_map(|list| {
            handler
                .rows(list)
                .iter()
                .enumerate()
                .filter(|(_, row)| !row.is_new())
                .map(move |(i, row)| RuleView::new(list, i, row))
        })
        .collect()
}

fn save(config: &mut GlobalConfig, arg: PolicyArg) -> Result<(), CliError> {
    config.save_page(page_for(arg))?;
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(config: &mut GlobalConfig, args: PolicyArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    let quiet = ctx.global.quiet;
    match args.command {
        PolicyCommand::Show { policy } => {
            let handler = handler(config, policy)?;
            for rule in handler.errors() {
                eprintln!("warning: rule not shown on the page: {rule}");
            }
            output::print_output(handler.raw_text().trim_end(), quiet);
            Ok(())
        }

        PolicyCommand::Rules { policy } => {
            let handler = handler(config, policy)?;
            if handler.use_default() {
                eprintln!("note: {} uses the default policy", handler.def().key);
            }
            let views = rule_views(handler);
            let color = ctx.color;
            let out = output::render_list(
                ctx.format,
                &views,
                |v| RuleTableRow {
                    list: v.list.to_owned(),
                    index: v.index,
                    source: v.source.clone(),
                    target: v.target.clone(),
                    label: v.label.to_owned(),
                    deletable: output::flag(v.deletable, color),
                },
                |v| format!("{}:{}", v.list, v.index),
            );
            output::print_output(&out, quiet);
            Ok(())
        }

        PolicyCommand::SetDefault { policy, enabled } => {
            handler(config, policy)?.set_use_default(enabled);
            save(config, policy)?;
            let state = if enabled { "default policy" } else { "custom rules" };
            output::print_output(&format!("{} now uses {state}", key(policy)), quiet);
            Ok(())
        }

        PolicyCommand::AddRule {
            policy,
            source,
            target,
            action: act,
        } => {
            let handler = handler(config, policy)?;
            let list = RowList::PolicyExceptions;
            let index = handler.add_rule()?;
            let edit = RuleEdit {
                source,
                target,
                action: action(act),
            };
            let accepted = handler
                .set_edit(list, index, edit)
                .and_then(|()| handler.accept_edit(list, index));
            let text = match accepted {
                Ok(text) => text,
                Err(err) => {
                    handler.cancel_edit(list, index)?;
                    return Err(err.into());
                }
            };
            save(config, policy)?;
            output::print_output(&format!("Added: {text}"), quiet);
            Ok(())
        }

        PolicyCommand::AddKeyQube { policy, qube } => {
            let text = handler(config, policy)?.add_key_qube(&qube)?;
            save(config, policy)?;
            output::print_output(&format!("Added: {text}"), quiet);
            Ok(())
        }

        PolicyCommand::RemoveRule { policy, index, main } => {
            let list = if main {
                RowList::PolicyMain
            } else {
                RowList::PolicyExceptions
            };
            let handler = handler(config, policy)?;
            let row = handler
                .rows(list)
                .get(index)
                .ok_or_else(|| util::row_not_found(index, "policy rules"))?;
            if !util::confirm(&format!("Remove rule: {row}?"), ctx.global.yes)? {
                return Ok(());
            }
            let text = handler.remove_rule(list, index)?;
            save(config, policy)?;
            output::print_output(&format!("Removed: {text}"), quiet);
            Ok(())
        }
    }
}
