//! Clap derive structures for the `qubes-config` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// qubes-config -- scriptable Qubes desktop configuration
#[derive(Debug, Parser)]
#[command(
    name = "qubes-config",
    version,
    about = "Configure Qubes devices, policies and updates from the command line",
    long_about = "Edit the settings behind the Qubes global configuration window:\n\
        device attachments and block lists, clipboard / file / URL policies,\n\
        update checks and restarts after template updates.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Output format (defaults to the configured one)
    #[arg(long, short = 'o', env = "QUBES_CONFIG_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Qube state file (overrides settings)
    #[arg(long, env = "QUBES_CONFIG_STATE", global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Policy directory (overrides settings)
    #[arg(long, env = "QUBES_CONFIG_POLICY_DIR", global = true, value_name = "DIR")]
    pub policy_dir: Option<PathBuf>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Shared value enums ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceClassArg {
    Block,
    Mic,
    Pci,
    Usb,
}

/// Which attachment list a rule lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttachmentListArg {
    /// Auto-attach and ask-to-attach rules
    Auto,
    /// Devices a qube cannot start without
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    AutoAttach,
    AskToAttach,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Allow,
    Ask,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Clipboard,
    Filecopy,
    Openinvm,
    Openurl,
    Splitgpg,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect devices exposed by backend qubes
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Manage device attachment rules
    #[command(alias = "as")]
    Assignments(AssignmentsArgs),

    /// Manage per-qube device block lists
    Blocks(BlocksArgs),

    /// Inspect and edit qrexec policies
    #[command(alias = "pol")]
    Policy(PolicyArgs),

    /// Update-related settings
    Updates(UpdatesArgs),

    /// Restart qubes after template updates
    Restart(RestartArgs),

    /// List configuration pages or resolve an --open-at target
    Pages(PagesArgs),

    /// Manage CLI settings
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List exposed devices
    #[command(alias = "ls")]
    List {
        /// Only this device class
        #[arg(long, short = 'c')]
        class: Option<DeviceClassArg>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ASSIGNMENTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct AssignmentsArgs {
    #[command(subcommand)]
    pub command: AssignmentsCommand,
}

#[derive(Debug, Subcommand)]
pub enum AssignmentsCommand {
    /// List attachment rules
    #[command(alias = "ls")]
    List {
        /// Rule list to show
        #[arg(long, short = 'l', default_value = "auto")]
        list: AttachmentListArg,
    },

    /// Add a rule for an exposed device
    Add {
        /// Device port as BACKEND:PORT (see `devices list`)
        #[arg(long, short = 'd', value_name = "BACKEND:PORT")]
        device: String,

        /// Device class, when the port exists in several classes
        #[arg(long, short = 'c')]
        class: Option<DeviceClassArg>,

        /// Qube the device attaches to (repeatable)
        #[arg(long = "frontend", short = 'f', value_name = "QUBE", required = true)]
        frontends: Vec<String>,

        /// Attachment mode
        #[arg(long, short = 'm', default_value = "auto-attach")]
        mode: ModeArg,

        /// Match the device wherever it is plugged in
        #[arg(long)]
        any_port: bool,

        /// Match any device plugged into this port
        #[arg(long)]
        any_device: bool,

        /// Attach block devices read-only
        #[arg(long)]
        read_only: bool,

        /// PCI permissive mode
        #[arg(long)]
        permissive: bool,

        /// Skip the strict PCI reset
        #[arg(long)]
        no_strict_reset: bool,
    },

    /// Remove a rule
    #[command(alias = "rm")]
    Remove {
        /// Row index (see `assignments list`)
        index: usize,

        #[arg(long, short = 'l', default_value = "auto")]
        list: AttachmentListArg,
    },

    /// Change a rule's attachment mode within its list
    SetMode {
        /// Row index (see `assignments list`)
        index: usize,

        mode: ModeArg,

        #[arg(long, short = 'l', default_value = "auto")]
        list: AttachmentListArg,
    },

    /// Replace the qubes a rule attaches to
    SetFrontends {
        /// Row index (see `assignments list`)
        index: usize,

        /// New frontend qubes
        #[arg(required = true, value_name = "QUBE")]
        frontends: Vec<String>,

        #[arg(long, short = 'l', default_value = "auto")]
        list: AttachmentListArg,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  BLOCKS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct BlocksArgs {
    #[command(subcommand)]
    pub command: BlocksCommand,
}

#[derive(Debug, Subcommand)]
pub enum BlocksCommand {
    /// List qubes with blocked device categories
    #[command(alias = "ls")]
    List,

    /// List the device categories a block can name
    Categories,

    /// Block device categories for a qube
    Add {
        /// Qube to protect
        #[arg(long)]
        vm: String,

        /// Category id (repeatable, see `blocks categories`)
        #[arg(long = "category", short = 'c', required = true, value_name = "CATEGORY")]
        categories: Vec<String>,
    },

    /// Remove a block rule
    #[command(alias = "rm")]
    Remove {
        /// Row index (see `blocks list`)
        index: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  POLICY
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Print the policy text that is in effect
    Show { policy: PolicyArg },

    /// List the rules as the settings page shows them
    Rules { policy: PolicyArg },

    /// Switch between the default policy and custom rules
    SetDefault {
        policy: PolicyArg,

        /// `true` to use the default policy
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Add an exception rule
    AddRule {
        policy: PolicyArg,

        /// Source qube or keyword
        #[arg(long, short = 's')]
        source: String,

        /// Target qube or keyword
        #[arg(long, short = 't')]
        target: String,

        #[arg(long, short = 'a')]
        action: ActionArg,
    },

    /// Name a qube that holds keys (split GPG)
    AddKeyQube { policy: PolicyArg, qube: String },

    /// Remove a rule
    #[command(alias = "rm")]
    RemoveRule {
        policy: PolicyArg,

        /// Row index (see `policy rules`)
        index: usize,

        /// Remove from the main list instead of the exceptions
        #[arg(long)]
        main: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  UPDATES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct UpdatesArgs {
    #[command(subcommand)]
    pub command: UpdatesCommand,
}

#[derive(Debug, Subcommand)]
pub enum UpdatesCommand {
    /// "Check for updates" settings
    Check(UpdateCheckArgs),
}

#[derive(Debug, Args)]
pub struct UpdateCheckArgs {
    #[command(subcommand)]
    pub command: UpdateCheckCommand,
}

#[derive(Debug, Subcommand)]
pub enum UpdateCheckCommand {
    /// Show dom0, default and per-qube exceptions
    Show,

    /// Change the settings
    Set {
        /// Check for dom0 updates
        #[arg(long, action = clap::ArgAction::Set, value_name = "BOOL")]
        dom0: Option<bool>,

        /// Check for updates in qubes by default
        #[arg(long, action = clap::ArgAction::Set, value_name = "BOOL")]
        default: Option<bool>,

        /// Qube that behaves opposite to the default (repeatable)
        #[arg(long = "exception", value_name = "QUBE")]
        add: Vec<String>,

        /// Qube that should follow the default again (repeatable)
        #[arg(long = "no-exception", value_name = "QUBE")]
        remove: Vec<String>,

        /// Drop every exception
        #[arg(long, conflicts_with = "add")]
        clear_exceptions: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RESTART
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct RestartArgs {
    /// Updated template (repeatable)
    #[arg(long = "template", short = 't', required = true, value_name = "TEMPLATE")]
    pub templates: Vec<String>,

    /// Restart service qubes (overrides settings)
    #[arg(long, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub service: Option<bool>,

    /// Shut down other qubes (overrides settings)
    #[arg(long, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub other: Option<bool>,

    /// Include qubes that opted out of restarts
    #[arg(long)]
    pub excluded: bool,

    /// Show the plan without restarting anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  PAGES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct PagesArgs {
    /// Resolve a `page[#location]` deep link
    #[arg(long, value_name = "PAGE[#LOCATION]")]
    pub open_at: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings file path
    Path,

    /// Show the effective settings
    Show,

    /// Write a settings file with the current values
    Init,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
