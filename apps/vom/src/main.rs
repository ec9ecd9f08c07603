//! # vom - Virtual Object Manager CLI
//!
//! Runs a virtual object manager over a redb vat store and inspects what it
//! persisted.
//!
//! ## Usage
//!
//! ```bash
//! # Construct, evict and reanimate a handful of objects
//! vom demo --count 10
//!
//! # Inspect the durable records
//! vom status
//! vom dump --prefix vom.ws
//!
//! # Run the deletion gate on one object
//! vom gc o+1/3
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // VOM_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("VOM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vom=info,vom_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        println!("vom {} - virtual object manager", env!("CARGO_PKG_VERSION"));
        println!();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
