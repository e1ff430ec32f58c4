//! Command dispatch: bridges CLI args -> page handlers -> output formatting.

pub mod assignments;
pub mod blocks;
pub mod config_cmd;
pub mod devices;
pub mod pages;
pub mod policy;
pub mod restart;
pub mod updates;
pub mod util;

use qubes_config_settings::Settings;

use crate::cli::{Command, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;

/// Per-invocation state every handler reads.
pub struct Ctx<'a> {
    pub global: &'a GlobalOpts,
    pub settings: &'a Settings,
    pub format: OutputFormat,
    pub color: bool,
}

/// Dispatch a command to the appropriate handler.
pub fn dispatch(cmd: Command, ctx: &Ctx<'_>) -> Result<(), CliError> {
    match cmd {
        // These never open the backend
        Command::Pages(args) => pages::handle(&args, ctx),
        Command::Config(args) => config_cmd::handle(&args, ctx),

        Command::Devices(args) => devices::handle(&mut config::open_config(ctx.settings)?, args, ctx),
        Command::Assignments(args) => {
            assignments::handle(&mut config::open_config(ctx.settings)?, args, ctx)
        }
        Command::Blocks(args) => blocks::handle(&mut config::open_config(ctx.settings)?, args, ctx),
        Command::Policy(args) => policy::handle(&mut config::open_config(ctx.settings)?, args, ctx),
        Command::Updates(args) => updates::handle(&mut config::open_config(ctx.settings)?, args, ctx),
        Command::Restart(args) => restart::handle(&config::open_config(ctx.settings)?, &args, ctx),

        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
