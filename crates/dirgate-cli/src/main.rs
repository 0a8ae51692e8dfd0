//! dirgate CLI
//!
//! Validates and syncs definitions bundles and answers ad-hoc ACL checks.

#![warn(clippy::all)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use dirgate_cli::DirgateConfig;
use dirgate_cli::cli::{Cli, Command};
use dirgate_cli::{commands, config_handlers};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::Config { action } = cli.command {
        config_handlers::handle_config_command(cli.config.as_deref(), action)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = DirgateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Command::Validate { bundle } => {
            let validated = commands::cmd_validate(&bundle)
                .with_context(|| format!("validating {}", bundle.display()))?;
            println!(
                "{}: {} permissions, {} attribute groups, {} policies, {} assignments",
                bundle.display(),
                validated.permissions.len(),
                validated.attribute_groups.len(),
                validated.policies.len(),
                validated.assignments.len()
            );
        }
        Command::Sync { bundle } => {
            let report = commands::cmd_sync(&config, &bundle)
                .await
                .with_context(|| format!("syncing {}", bundle.display()))?;
            tracing::info!(revision = report.revision, changed = report.changed(), "sync finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check {
            principal,
            members,
            permission,
            attrs,
        } => {
            let decision =
                commands::cmd_check(&config, &principal, &members, &permission, &attrs).await?;
            match &decision.matched_scope {
                Some(scope) => println!("{} (scope {scope})", decision.effect),
                None => println!("{}", decision.effect),
            }
            if !decision.is_allowed() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Show { principal, members } => {
            let acl = commands::cmd_show(&config, &principal, &members).await?;
            println!("{}", serde_json::to_string_pretty(&acl)?);
        }
        Command::Config { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}
