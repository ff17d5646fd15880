//! # tripod
//!
//! Command-line access to a redb-backed tripod repository.
//!
//! ## Usage
//!
//! ```bash
//! tripod -D people.redb import -i people.jsonl
//! tripod -D people.redb --roles roles.toml describe ex:Alice
//! tripod -D people.redb designate ex:Alice ex:Employee
//! tripod -D people.redb rename ex:Alice ex:Alicia
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // TRIPOD_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TRIPOD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tripod=info,tripod_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = tripod::cli::Cli::parse();
    let mut stdout = std::io::stdout().lock();

    if let Err(e) = tripod::cli::execute(cli, &mut stdout) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
