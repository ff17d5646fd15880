//! # tripod CLI Module
//!
//! ## Available Commands
//!
//! - `status` - Show repository status
//! - `import` - Import statements from a JSON lines file
//! - `export` - Export every statement as JSON lines
//! - `namespace` - List or register namespace prefixes
//! - `types` - Show the asserted types of a resource
//! - `describe` - Show an entity: types, roles and properties
//! - `designate` - Add roles or types to an entity
//! - `rename` - Rename a resource everywhere it occurs
//! - `remove` - Delete every statement mentioning a resource

mod commands;
mod roles;

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tripod_core::{EngineError, StoreError};

pub use commands::*;
pub use roles::{RoleFile, RoleSpec};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid input at line {line}: {reason}")]
    Input { line: usize, reason: String },
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Engine(e.into())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// tripod - object-graph mapping over a triple store
#[derive(Parser, Debug)]
#[command(name = "tripod")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true, default_value = "tripod.redb")]
    pub database: PathBuf,

    /// Engine configuration (TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Role definitions (TOML)
    #[arg(short = 'r', long = "roles", id = "roles_file", value_name = "ROLES", global = true)]
    pub roles: Option<PathBuf>,

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
    /// Show repository status
    Status,

    /// Import statements from a JSON lines file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Export every statement as JSON lines
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List namespace prefixes, or register one
    Namespace {
        /// Prefix to register
        prefix: Option<String>,

        /// Namespace IRI for the prefix
        iri: Option<String>,
    },

    /// Show the asserted types of a resource
    Types {
        /// Resource name (`prefix:local`, `<iri>`, `_:label` or an IRI)
        name: String,
    },

    /// Show an entity's types, roles and properties
    Describe {
        /// Resource name
        name: String,
    },

    /// Add roles (or type IRIs) to an entity
    Designate {
        /// Resource name
        name: String,

        /// Role names or type names
        #[arg(required = true)]
        roles: Vec<String>,

        /// Retract instead of add
        #[arg(long)]
        retract: bool,
    },

    /// Rename a resource in every statement
    Rename {
        /// Current name
        from: String,

        /// New name
        to: String,
    },

    /// Delete every statement mentioning a resource
    Remove {
        /// Resource name
        name: String,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments, writing results to `out`.
pub fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let context = Context::open(&cli.database, cli.config.as_deref(), cli.roles.as_deref())?;
    let json_mode = cli.json_mode;
    if cli.verbose {
        tracing::info!(database = %cli.database.display(), "repository opened");
    }

    match cli.command {
        Some(Commands::Status) | None => cmd_status(&context, json_mode, out),
        Some(Commands::Import { input }) => cmd_import(&context, json_mode, &input, out),
        Some(Commands::Export { output }) => cmd_export(&context, json_mode, &output, out),
        Some(Commands::Namespace { prefix, iri }) => {
            cmd_namespace(&context, json_mode, prefix.as_deref(), iri.as_deref(), out)
        }
        Some(Commands::Types { name }) => cmd_types(&context, json_mode, &name, out),
        Some(Commands::Describe { name }) => cmd_describe(&context, json_mode, &name, out),
        Some(Commands::Designate {
            name,
            roles,
            retract,
        }) => cmd_designate(&context, json_mode, &name, &roles, retract, out),
        Some(Commands::Rename { from, to }) => cmd_rename(&context, json_mode, &from, &to, out),
        Some(Commands::Remove { name }) => cmd_remove(&context, json_mode, &name, out),
    }
}
