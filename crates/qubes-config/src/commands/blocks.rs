//! Device block list command handlers.

use std::str::FromStr;

use qubes_admin::DeviceInterface;
use qubes_config_core::{BlockPolicy, CategoryId, GlobalConfig, PageId};
use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use crate::cli::{BlocksArgs, BlocksCommand};
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

// ── Views ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BlockView {
    index: usize,
    vm: Option<String>,
    categories: Vec<CategoryId>,
    other_interfaces: Vec<String>,
    description: String,
}

impl BlockView {
    fn new(index: usize, policy: &BlockPolicy) -> Self {
        Self {
            index,
            vm: policy.vm().map(str::to_owned),
            categories: policy.categories().to_vec(),
            other_interfaces: policy
                .other_interfaces()
                .iter()
                .map(DeviceInterface::as_str)
                .map(str::to_owned)
                .collect(),
            description: output::strip_markup(&policy.description()),
        }
    }
}

#[derive(Tabled)]
struct BlockRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Qube")]
    vm: String,
    #[tabled(rename = "Blocked")]
    description: String,
}

#[derive(Serialize)]
struct CategoryView {
    id: CategoryId,
    name: &'static str,
    description: Option<&'static str>,
    depth: usize,
}

#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn parse_category(name: &str) -> Result<CategoryId, CliError> {
    CategoryId::from_str(name).map_err(|_| CliError::Validation {
        field: "category".into(),
        reason: format!("unknown category '{name}'; see 'blocks categories'"),
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(config: &mut GlobalConfig, args: BlocksArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    match args.command {
        BlocksCommand::List => {
            let handler = util::devices_handler(config)?;
            let views: Vec<BlockView> = handler
                .blocks()
                .rows()
                .iter()
                .enumerate()
                .map(|(i, p)| BlockView::new(i, p))
                .collect();
            let out = output::render_list(
                ctx.format,
                &views,
                |v| BlockRow {
                    index: v.index,
                    vm: v.vm.clone().unwrap_or_default(),
                    description: v.description.clone(),
                },
                |v| v.index.to_string(),
            );
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }

        BlocksCommand::Categories => {
            let views: Vec<CategoryView> = CategoryId::iter()
                .map(|id| CategoryView {
                    id,
                    name: id.name(),
                    description: id.description(),
                    depth: id.depth(),
                })
                .collect();
            let out = output::render_list(
                ctx.format,
                &views,
                |v| CategoryRow {
                    id: v.id.to_string(),
                    name: format!("{}{}", "  ".repeat(v.depth), v.name),
                    description: v.description.unwrap_or_default().to_owned(),
                },
                |v| v.id.to_string(),
            );
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }

        BlocksCommand::Add { vm, categories } => {
            let handler = util::devices_handler(config)?;
            let mut draft = handler.new_block();
            draft.vm = Some(vm);
            for name in &categories {
                draft.selection.set(parse_category(name)?, true);
            }
            let text = handler.add_block(&draft)?;
            config.save_page(PageId::Devices)?;
            output::print_output(&format!("Added: {}", output::strip_markup(&text)), ctx.global.quiet);
            Ok(())
        }

        BlocksCommand::Remove { index } => {
            let handler = util::devices_handler(config)?;
            let policy = handler
                .blocks()
                .rows()
                .get(index)
                .ok_or_else(|| util::row_not_found(index, "blocks list"))?;
            let prompt = format!(
                "Stop blocking devices for {}?",
                policy.vm().unwrap_or("this qube")
            );
            if !util::confirm(&prompt, ctx.global.yes)? {
                return Ok(());
            }
            let text = handler.remove_block(index)?;
            config.save_page(PageId::Devices)?;
            output::print_output(&format!("Removed: {}", output::strip_markup(&text)), ctx.global.quiet);
            Ok(())
        }
    }
}
