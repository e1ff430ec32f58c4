//! Page listing and `--open-at` resolution.

use qubes_config_core::{OpenAt, PageId};
use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use crate::cli::PagesArgs;
use crate::error::CliError;
use crate::output;

use super::Ctx;

#[derive(Serialize)]
struct PageView {
    page: PageId,
    locations: &'static [&'static str],
}

#[derive(Tabled)]
struct PageRow {
    #[tabled(rename = "Page")]
    page: String,
    #[tabled(rename = "Locations")]
    locations: String,
}

pub fn handle(args: &PagesArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    if let Some(target) = &args.open_at {
        let open_at = OpenAt::parse(target);
        // An unresolved target still opens the window, so it is not an error
        if let Some(warning) = &open_at.warning {
            eprintln!("warning: {warning}");
        }
        let out = output::render_single(
            ctx.format,
            &open_at,
            |o| match o.location {
                Some(location) => format!("{}#{location}", o.page),
                None => o.page.to_string(),
            },
            |o| o.page.to_string(),
        );
        output::print_output(&out, ctx.global.quiet);
        return Ok(());
    }

    let views: Vec<PageView> = PageId::iter()
        .map(|page| PageView {
            page,
            locations: page.locations(),
        })
        .collect();
    let out = output::render_list(
        ctx.format,
        &views,
        |v| PageRow {
            page: v.page.to_string(),
            locations: v.locations.join(", "),
        },
        |v| v.page.to_string(),
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}
