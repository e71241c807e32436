//! AllowSync CLI
//!
//! Keeps an allowlist snapshot in sync with its sources.
//!
//! # Commands
//!
//! - `run` - Bootstrap, then refresh on a timer until interrupted
//! - `once` - Load and merge the sources once and print the result

mod commands;
mod sources;

use clap::{Parser, Subcommand};
use sources::SourceArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Allowlist snapshot refresher.
#[derive(Parser)]
#[command(name = "allowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the cache, then refresh it on a timer until Ctrl-C
    Run {
        #[command(flatten)]
        sources: SourceArgs,

        /// Refresh interval in seconds (values below 10 are raised to 10)
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Shared directory used for the refresh lock and the mirror
        #[arg(long)]
        store: Option<PathBuf>,

        /// Skip cycles when the lock store fails instead of running unprotected
        #[arg(long)]
        require_lock: bool,

        /// Lock lifetime in seconds
        #[arg(long, default_value = "30")]
        lock_ttl: u64,

        /// Mirror lifetime in seconds
        #[arg(long, default_value = "86400")]
        mirror_ttl: u64,

        /// Seconds to wait for an in-flight cycle at shutdown
        #[arg(long, default_value = "5")]
        grace: u64,
    },

    /// Load and merge the sources once, then print the record count and hash
    Once {
        #[command(flatten)]
        sources: SourceArgs,

        /// Print the merged identities as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            sources,
            interval,
            store,
            require_lock,
            lock_ttl,
            mirror_ttl,
            grace,
        } => {
            let options = commands::run::RunOptions {
                interval,
                store,
                require_lock,
                lock_ttl,
                mirror_ttl,
                grace,
            };
            commands::run::run(&sources, &options)?;
        }
        Commands::Once { sources, json } => {
            let report = commands::once::run(&sources)?;
            commands::once::print(&report, json)?;
        }
        Commands::Version => {
            println!("AllowSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
