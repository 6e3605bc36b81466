//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Inspect and edit kvcache aliases from the command line
#[derive(Parser, Debug)]
#[command(name = "kvcache")]
#[command(about = "Inspect and edit kvcache aliases from the command line")]
#[command(long_about = "
kvcache opens the cache aliases declared in its configuration and runs one
operation against them. Memory aliases live only for the duration of the
command, so the editing commands are mostly useful with disk and redis aliases.

EXAMPLES:
    # Validate configuration and connect to every alias
    kvcache check

    # Store a JSON document for five minutes
    kvcache set profile:42 '{\"name\": \"ada\"}' --ttl 300 --alias sessions

    # Store a plain string without JSON parsing
    kvcache set greeting hello --raw

    # Read a value written with version 2
    kvcache get profile:42 --version 2

    # Use a custom configuration file in production mode
    kvcache --config /etc/kvcache/kvcache.toml --env production check

    # Remove every key in an alias's collection
    kvcache clear --alias files

For more information about configuration options, see config/default.toml.
")]
#[command(version = crate::clap_long_version())]
pub struct Cli {
    /// Subcommand to execute (defaults to `check`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this single TOML file instead of the layered configuration
    /// directory. The file must exist and be readable.
    ///
    /// Example: --config /etc/kvcache/kvcache.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{environment}.toml` layer is loaded. Overrides
    /// KVCACHE_APP_ENV.
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    ///
    /// Raises the log level to debug. Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Lowers the log level to error. Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level override
    ///
    /// Takes precedence over both the configuration file and --verbose/--quiet.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,
}

/// Alias and key version an entry command works on
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct TargetArgs {
    /// Cache alias from the [caches] configuration table
    #[arg(short, long, default_value = "default", value_parser = super::validation::validate_alias)]
    pub alias: String,

    /// Key version; defaults to the alias's configured version
    #[arg(long = "version", value_name = "VERSION")]
    pub key_version: Option<u32>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and connect to every alias (default)
    ///
    /// Loads and validates the configuration, opens every alias and issues
    /// one read against each store. Exits non-zero if any alias is unreachable.
    Check,

    /// Print the value stored under a key as JSON
    Get {
        #[arg(value_parser = super::validation::validate_key)]
        key: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Store a value under a key
    ///
    /// VALUE is parsed as JSON unless --raw is given, in which case it is
    /// stored as a plain string.
    ///
    /// Examples:
    ///   kvcache set counter 1
    ///   kvcache set user '{"id": 1}' --ttl 60
    ///   kvcache set note "not json" --raw
    Set {
        #[arg(value_parser = super::validation::validate_key)]
        key: String,

        value: String,

        /// Expire after this many seconds instead of the alias default
        #[arg(long, value_name = "SECONDS", value_parser = super::validation::validate_ttl)]
        ttl: Option<u64>,

        /// Store VALUE as a string without JSON parsing
        #[arg(long)]
        raw: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Delete a key
    Delete {
        #[arg(value_parser = super::validation::validate_key)]
        key: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Reset the expiry of an existing key
    Touch {
        #[arg(value_parser = super::validation::validate_key)]
        key: String,

        /// New lifetime in seconds; the alias default when omitted
        #[arg(long, value_name = "SECONDS", value_parser = super::validation::validate_ttl)]
        ttl: Option<u64>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Remove every key in the alias's collection
    ///
    /// Clears all versions. Keys written by other collections sharing the
    /// same store are left alone.
    Clear {
        #[command(flatten)]
        target: TargetArgs,
    },
}

impl Commands {
    /// Target of an entry command; `None` for `check`.
    pub fn target(&self) -> Option<&TargetArgs> {
        match self {
            Commands::Check => None,
            Commands::Get { target, .. }
            | Commands::Set { target, .. }
            | Commands::Delete { target, .. }
            | Commands::Touch { target, .. }
            | Commands::Clear { target } => Some(target),
        }
    }
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

/// Log level options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn", alias = "warning")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl Cli {
    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        if let Some(Commands::Set {
            value, raw: false, ..
        }) = &self.command
            && serde_json::from_str::<serde_json::Value>(value).is_err()
        {
            return Err(format!(
                "VALUE is not valid JSON: '{}'. Quote strings as JSON or pass --raw",
                value
            ));
        }

        Ok(())
    }

    /// Target of the command; `None` for `check`, explicit or implied.
    pub fn target(&self) -> Option<&TargetArgs> {
        self.command.as_ref().and_then(Commands::target)
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "debug".to_string(),
            LogLevel::Trace => "trace".to_string(),
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
