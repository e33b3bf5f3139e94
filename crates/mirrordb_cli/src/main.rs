//! mirrordb CLI
//!
//! Command-line tools for a local cache directory.
//!
//! # Layout
//!
//! A cache root holds `metadata.json` (every account's metadata) and a
//! `stores/` directory with one store per account.
//!
//! # Commands
//!
//! - `inspect` - Display an account's metadata and store contents
//! - `verify` - Read every record and report unreadable ones
//! - `reset` - Delete an account's store and metadata
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mirrordb command-line cache tools.
#[derive(Parser)]
#[command(name = "mirrordb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache root
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Account whose cache to operate on
    #[arg(global = true, short, long)]
    account: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display an account's metadata and store contents
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read every record and report unreadable ones
    Verify,

    /// Delete an account's store and metadata
    Reset {
        /// Show what would be removed without removing it
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("mirrordb CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Store schema v{}", mirrordb_engine::DEFAULT_SCHEMA_VERSION);
        return Ok(());
    }

    let root = cli.root.ok_or("Cache root required (--root)")?;
    let account = cli.account.ok_or("Account required (--account)")?;
    let target = commands::Target::open(&root, &account)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Inspect { format } => runtime.block_on(commands::inspect::run(&target, &format))?,
        Commands::Verify => runtime.block_on(commands::verify::run(&target))?,
        Commands::Reset { dry_run } => runtime.block_on(commands::reset::run(&target, dry_run))?,
        Commands::Version => {}
    }

    Ok(())
}
