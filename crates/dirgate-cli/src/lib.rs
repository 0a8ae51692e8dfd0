//! # dirgate-cli
//!
//! Command-line front end for dirgate:
//! - `validate` and `sync` for definitions bundles
//! - `check` and `show` for ad-hoc decisions against the configured store
//! - `config` for locating, creating, and reading the config file

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod config_handlers;
pub mod error;

pub use config::DirgateConfig;
pub use error::{Error, Result};
