//! SegStore CLI
//!
//! Command-line tools for SegStore array stores.
//!
//! # Commands
//!
//! - `inspect` - Display store metadata and segment statistics
//! - `verify` - Read every stored value and report failures
//! - `compact` - Compact sparse segments to reclaim space
//! - `get` / `put` / `delete` - Read or change a single position

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SegStore command-line store tools.
#[derive(Parser)]
#[command(name = "segstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store metadata and statistics
    Inspect {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read every stored value and report failures
    Verify,

    /// Compact sparse segments to reclaim space
    Compact {
        /// Live ratio below which a segment is compacted
        #[arg(long)]
        factor: Option<f64>,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Print the value stored at a position
    Get {
        /// Position to read
        position: u64,

        /// Print the value as hex instead of text
        #[arg(long)]
        hex: bool,
    },

    /// Store a value at a position
    Put {
        /// Position to write
        position: u64,

        /// Value to store
        value: String,

        /// Grow a dynamic store to cover the position
        #[arg(short, long)]
        expand: bool,
    },

    /// Remove the value at a position
    Delete {
        /// Position to clear
        position: u64,
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
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, segments, format.parse()?)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { factor, dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, factor, dry_run)?;
        }
        Commands::Get { position, hex } => {
            let path = cli.path.ok_or("Store path required for get")?;
            commands::value::get(&path, position, hex)?;
        }
        Commands::Put {
            position,
            value,
            expand,
        } => {
            let path = cli.path.ok_or("Store path required for put")?;
            commands::value::put(&path, position, value.as_bytes(), expand)?;
        }
        Commands::Delete { position } => {
            let path = cli.path.ok_or("Store path required for delete")?;
            commands::value::delete(&path, position)?;
        }
        Commands::Version => {
            println!("SegStore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
