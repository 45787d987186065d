//! Clap derive structures for the `shapeplan` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// shapeplan -- compile network and circuit documents into queue programs
#[derive(Debug, Parser)]
#[command(
    name = "shapeplan",
    version,
    about = "Compile ISP traffic-shaping queue programs",
    long_about = "Turns a network hierarchy and a subscriber circuit table into an\n\
        HTB class tree, leaf qdiscs, and IP classification sharded across CPU\n\
        queues, and decides per run between a full rebuild and a patch.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SHAPEPLAN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Network document (overrides paths.network)
    #[arg(long, short = 'n', global = true)]
    pub network: Option<PathBuf>,

    /// Circuit table (overrides paths.circuits)
    #[arg(long, short = 'c', global = true)]
    pub circuits: Option<PathBuf>,

    /// State directory (overrides paths.state_dir)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Queue count to use instead of probing NIC and CPUs (halved on a stick)
    #[arg(long, short = 'Q', global = true)]
    pub queues: Option<u32>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SHAPEPLAN_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate the input documents
    #[command(alias = "check")]
    Validate,

    /// Run the full pipeline and print the plan (no state is written)
    Compile(CompileArgs),

    /// Decide, build, apply through the file bus, and persist state
    Reload(ReloadArgs),

    /// Turn an integration graph into the network document and circuit table
    Import(ImportArgs),

    /// Show the persisted shard assignment of unparented circuits
    Shards,

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Print the queue program instead of the class plan
    #[arg(long)]
    pub batch: bool,
}

#[derive(Debug, Args)]
pub struct ReloadArgs {
    /// Directory the file bus writes into (overrides paths.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Boot identifier (defaults to the kernel's boot id)
    #[arg(long, env = "SHAPEPLAN_BOOT_ID")]
    pub boot_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Graph document: {"nodes": [...]}
    pub graph: PathBuf,

    /// Write the network document here (defaults to paths.network)
    #[arg(long)]
    pub network_out: Option<PathBuf>,

    /// Write the circuit table here (defaults to paths.circuits)
    #[arg(long)]
    pub circuits_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
