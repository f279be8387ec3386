//! LLMC CLI - local-first RAG for source repositories
//!
//! # Usage
//!
//! ```bash
//! # Index the current repository
//! llmc init
//!
//! # Keep it fresh in the background
//! llmc daemon
//!
//! # Ask questions
//! llmc search "where is the retry logic"
//! llmc where-used db.query
//! llmc lineage auth.login --direction downstream --depth 3
//!
//! # Inspect
//! llmc status --json
//! llmc health
//! llmc explain "who calls process_order()"
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// LLMC - retrieval-augmented code intelligence for one repository
#[derive(Parser, Debug)]
#[command(name = "llmc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Repository to operate on (defaults to the current directory)
    #[arg(long, short = 'r', global = true, env = "LLMC_REPO")]
    repo: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

impl GlobalOptions {
    pub fn repo_root(&self) -> Result<PathBuf> {
        Ok(match &self.repo {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the index store and run the first full sync
    Init(commands::init::InitArgs),

    /// Detect changes and update the index
    Sync(commands::sync::SyncArgs),

    /// Run one enrichment cycle over pending spans
    Enrich(commands::enrich::EnrichArgs),

    /// Run one embedding cycle over pending (span, profile) pairs
    Embed(commands::embed::EmbedArgs),

    /// Hybrid search over the index
    Search(commands::search::SearchArgs),

    /// Find spans whose symbols call the given symbol
    WhereUsed(commands::where_used::WhereUsedArgs),

    /// Walk the call/dependency graph around a symbol
    Lineage(commands::lineage::LineageArgs),

    /// Show index status and counts
    Status(commands::status::StatusArgs),

    /// Health snapshot with issues and pending hotspots
    Health(commands::health::HealthArgs),

    /// Explain how a query would be routed
    Explain(commands::explain::ExplainArgs),

    /// Run the background daemon for this repository
    Daemon(commands::daemon::DaemonArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.global.quiet {
        "error"
    } else if cli.global.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("llmc={default_level}"))),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.global).await,
        Commands::Sync(args) => commands::sync::execute(args, cli.global).await,
        Commands::Enrich(args) => commands::enrich::execute(args, cli.global).await,
        Commands::Embed(args) => commands::embed::execute(args, cli.global).await,
        Commands::Search(args) => commands::search::execute(args, cli.global).await,
        Commands::WhereUsed(args) => commands::where_used::execute(args, cli.global).await,
        Commands::Lineage(args) => commands::lineage::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Health(args) => commands::health::execute(args, cli.global).await,
        Commands::Explain(args) => commands::explain::execute(args, cli.global).await,
        Commands::Daemon(args) => commands::daemon::execute(args, cli.global).await,
    }
}
