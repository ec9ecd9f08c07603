//! # vom CLI Module
//!
//! ## Available Commands
//!
//! - `demo` - Construct, evict and reanimate virtual objects
//! - `dump` - Print durable records
//! - `status` - Count durable records by kind
//! - `gc` - Run the deletion gate on one object

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vom_core::VomError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// vom - virtual object manager
///
/// Long-lived objects whose state is paged between a small LRU cache and a
/// durable store.
#[derive(Parser, Debug)]
#[command(name = "vom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb vat store
    #[arg(short = 'D', long, global = true, default_value = "vom.redb")]
    pub database: PathBuf,

    /// Manager configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured cache size
    #[arg(long, global = true)]
    pub cache_size: Option<usize>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Construct labelled objects, cycle them through the cache and
    /// reanimate one
    Demo {
        /// Number of objects to construct
        #[arg(short = 'n', long, default_value = "8")]
        count: usize,
    },

    /// Print durable records
    Dump {
        /// Only records whose key starts with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Count durable records
    Status,

    /// Delete an object's records if nothing can reach it
    Gc {
        /// Virtual object id, e.g. o+1/3
        vobj_id: String,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), VomError> {
    let config = load_config(cli.config.as_deref(), cli.cache_size)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Demo { count }) => {
            cmd_demo(&cli.database, config, count, json_mode, cli.verbose)
        }
        Some(Commands::Dump { prefix }) => cmd_dump(&cli.database, prefix.as_deref(), json_mode),
        Some(Commands::Status) | None => cmd_status(&cli.database, json_mode),
        Some(Commands::Gc { vobj_id }) => cmd_gc(&cli.database, config, &vobj_id, json_mode),
    }
}
