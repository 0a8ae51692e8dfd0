//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dirgate: compiled and cached ACL decisions
#[derive(Parser, Debug)]
#[command(name = "dirgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "DIRGATE_CONFIG")]
    pub config: Option<String>,

    /// Log filter, overriding the configured level
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and validate a definitions bundle without touching the store
    Validate {
        /// Bundle file (.json or .toml)
        bundle: PathBuf,
    },

    /// Reconcile the store with a definitions bundle
    Sync {
        /// Bundle file (.json or .toml)
        bundle: PathBuf,
    },

    /// Decide one request
    Check {
        /// Principal as `type:id` (a bare id is a user)
        #[arg(short, long)]
        principal: String,

        /// Group or role the principal belongs to; repeatable
        #[arg(short, long = "member")]
        members: Vec<String>,

        /// Permission key
        #[arg(short = 'P', long)]
        permission: String,

        /// Resource attribute as `key=value`; repeatable
        #[arg(short, long = "attr")]
        attrs: Vec<String>,
    },

    /// Print a principal's compiled ACL as JSON
    Show {
        /// Principal as `type:id`
        principal: String,

        /// Group or role the principal belongs to; repeatable
        #[arg(short, long = "member")]
        members: Vec<String>,
    },

    /// Configuration management
    Config {
        /// Config action
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved config file path
    Path,

    /// Print a value by dotted key, e.g. `cache.ttl_secs`
    Get {
        /// Dotted key
        key: String,
    },

    /// Write a default config file
    Init {
        /// Where to write it (defaults to the resolved path)
        #[arg(short, long)]
        file: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
