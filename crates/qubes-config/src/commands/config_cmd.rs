//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::{Ctx, util};

pub fn handle(args: &ConfigArgs, ctx: &Ctx<'_>) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), ctx.global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let text = toml::to_string_pretty(ctx.settings)?;
            output::print_output(text.trim_end(), ctx.global.quiet);
            Ok(())
        }

        ConfigCommand::Init => {
            let path = config::config_path();
            if path.exists() {
                let prompt = format!("Overwrite {}?", path.display());
                if !util::confirm(&prompt, ctx.global.yes)? {
                    return Ok(());
                }
            }
            config::save_settings(ctx.settings)?;
            output::print_output(&format!("Wrote {}", path.display()), ctx.global.quiet);
            Ok(())
        }
    }
}
