//! Command executor for dispatching CLI commands
//!
//! This module provides the main entry point for executing CLI commands
//! after parsing and configuration loading.

use tracing::debug;

use super::handlers::{CheckCommandHandler, EntryCommandHandler};
use super::parser::{Cli, Commands};
use crate::config::settings::Settings;
use crate::context::KvContext;
use crate::error::{KvError, KvResult};

/// Execute a CLI command with the given settings
///
/// Opens a [`KvContext`], runs the command, prints its output to stdout and
/// flushes every alias before returning.
///
/// # Errors
/// Returns errors from argument validation, store construction or the
/// command itself. `check` fails when any alias is unreachable.
pub async fn execute_command(cli: &Cli, settings: Settings) -> KvResult<()> {
    cli.validate().map_err(KvError::invalid)?;

    let context = KvContext::connect(&settings).await?;
    debug!(context = ?context, "Executing command");

    let result = run(cli, &settings, &context).await;
    let closed = context.close().await;
    let output = result?;
    closed?;

    for line in output {
        println!("{}", line);
    }
    Ok(())
}

async fn run(cli: &Cli, settings: &Settings, context: &KvContext) -> KvResult<Vec<String>> {
    let line = match &cli.command {
        None | Some(Commands::Check) => {
            let report = CheckCommandHandler::new(settings, context).execute().await?;
            if !report.is_ok() {
                for line in &report.lines {
                    println!("{}", line);
                }
                return Err(KvError::unavailable(format!(
                    "{} alias(es) unreachable",
                    report.failures
                )));
            }
            return Ok(report.lines);
        }
        Some(Commands::Get { key, target }) => {
            EntryCommandHandler::new(context, target)?.get(key).await?
        }
        Some(Commands::Set {
            key,
            value,
            ttl,
            raw,
            target,
        }) => {
            EntryCommandHandler::new(context, target)?
                .set(key, value, *ttl, *raw)
                .await?
        }
        Some(Commands::Delete { key, target }) => {
            EntryCommandHandler::new(context, target)?.delete(key).await?
        }
        Some(Commands::Touch { key, ttl, target }) => {
            EntryCommandHandler::new(context, target)?
                .touch(key, *ttl)
                .await?
        }
        Some(Commands::Clear { target }) => {
            EntryCommandHandler::new(context, target)?.clear().await?
        }
    };
    Ok(vec![line])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parser::Cli;
    use crate::error::ErrorKind;
    use clap::Parser;

    #[tokio::test]
    async fn test_execute_check() {
        let cli = Cli::try_parse_from(["kvcache", "check"]).unwrap();
        assert!(execute_command(&cli, Settings::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_default_is_check() {
        let cli = Cli::try_parse_from(["kvcache"]).unwrap();
        assert!(execute_command(&cli, Settings::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_set_on_memory_alias() {
        let cli = Cli::try_parse_from(["kvcache", "set", "k", "[1, 2]", "--ttl", "5"]).unwrap();
        assert!(execute_command(&cli, Settings::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_json() {
        let cli = Cli::try_parse_from(["kvcache", "set", "k", "{nope"]).unwrap();
        let err = execute_command(&cli, Settings::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_execute_unknown_alias() {
        let cli = Cli::try_parse_from(["kvcache", "get", "k", "--alias", "ghost"]).unwrap();
        let err = execute_command(&cli, Settings::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
