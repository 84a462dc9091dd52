//! Clap derive structures for the `ecosync` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ecosync_core::{EntityType, OpType, Role};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ecosync -- offline-first sync engine for the EcoScore backend
#[derive(Debug, Parser)]
#[command(
    name = "ecosync",
    version,
    about = "Run and inspect the ecosync offline-first sync engine",
    long_about = "Keeps a local, durable mirror of a user's EcoScore data and\n\
        replays writes made while offline once connectivity returns.",
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
    /// Backend profile to use
    #[arg(long, short = 'p', env = "ECOSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend API URL (overrides profile)
    #[arg(long, env = "ECOSYNC_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Live feed WebSocket URL (overrides profile)
    #[arg(long, env = "ECOSYNC_FEED_URL", global = true)]
    pub feed_url: Option<String>,

    /// Bearer token
    #[arg(long, env = "ECOSYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Durable storage directory (overrides profile)
    #[arg(long, env = "ECOSYNC_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ECOSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Treat the network as unreachable (no submissions, no fetches)
    #[arg(long, global = true)]
    pub offline: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "ECOSYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "ECOSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

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

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session and stream store changes until Ctrl-C
    Run(RunArgs),

    /// Inspect and manage the offline mutation queue
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Replay queued writes against the backend
    Drain(DrainArgs),

    /// Look up one entity through memory, cache, then network
    Resolve(ResolveArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Id of the logged-in user
    #[arg(long, short = 'u', env = "ECOSYNC_USER")]
    pub user: String,

    /// Role of the logged-in user
    #[arg(long, short = 'r', default_value = "farmer", value_parser = parse_role)]
    pub role: Role,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    match raw.trim().to_lowercase().as_str() {
        "farmer" => Ok(Role::Farmer),
        "admin" => Ok(Role::Admin),
        "institution" => Ok(Role::Institution),
        other => Err(format!("unknown role '{other}' (farmer, admin, institution)")),
    }
}

// ── Queue ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// List queued writes in drain order
    #[command(alias = "ls")]
    List {
        /// Only show records in this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },

    /// List writes that failed permanently ("sync issues")
    Issues,

    /// Queue a write
    Enqueue(EnqueueArgs),

    /// Re-queue a failed write with a fresh retry budget
    Retry {
        /// Mutation id
        id: String,
    },

    /// Drop a queued write
    #[command(alias = "rm")]
    Discard {
        /// Mutation id
        id: String,
    },

    /// Show record counts by status
    Counts,

    /// Show the audit trail of queue activity
    Log {
        /// Only the newest N entries
        #[arg(long, short = 'n', default_value_t = 50)]
        limit: usize,

        /// Delete every entry instead of showing them
        #[arg(long, conflicts_with = "limit")]
        clear: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Pending,
    InFlight,
    Failed,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Kind of write (disaster-report, mission-proof, ticket-create, community-post, log)
    pub op: OpType,

    /// JSON body
    #[arg(long, short = 'd', conflicts_with = "from_file")]
    pub data: Option<String>,

    /// Read the JSON body from a file
    #[arg(long, short = 'F')]
    pub from_file: Option<PathBuf>,

    /// Attach a file (proof photo, post image, report photo)
    #[arg(long, short = 'a')]
    pub attach: Option<PathBuf>,

    /// Override the op type's default priority (1 is most urgent)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=9))]
    pub priority: Option<u8>,

    /// Submit right away when online; queue only on failure
    #[arg(long)]
    pub direct: bool,
}

// ── Drain ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DrainArgs {
    /// Submit only the head record
    #[arg(long)]
    pub once: bool,
}

// ── Resolve ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Entity type (mission, user-profile, learning-progress, community-post, farmer, activity)
    pub entity_type: EntityType,

    /// Entity id
    pub id: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display current resolved configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Add or replace a profile
    Add {
        /// Profile name
        name: String,

        /// Backend API URL
        #[arg(long)]
        api_url: String,

        /// Live feed URL (derived from the API URL when omitted)
        #[arg(long)]
        feed_url: Option<String>,
    },

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a token (read from stdin) in the system keyring
    SetToken {
        /// Profile to store the token for
        #[arg(long)]
        profile: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
