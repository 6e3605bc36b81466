//! Configuration merger for CLI arguments and config files
//!
//! This module handles merging CLI argument overrides with file-based configuration,
//! implementing the configuration precedence logic.

use super::parser::Cli;
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, settings::Settings};

/// Applies CLI overrides on top of file-based configuration
///
/// Precedence, highest first: `--log-level`, `--verbose`/`--quiet`, then
/// whatever the loader produced.
pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the base configuration the way the CLI asks for it
    ///
    /// `--config` switches the loader to single-file mode and `--env`
    /// replaces `KVCACHE_APP_ENV`.
    ///
    /// # Errors
    /// Returns ConfigError if configuration loading or validation fails
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new()?;
        if let Some(path) = &cli.config {
            loader = loader.with_config_file(path);
        }
        if let Some(env) = cli.env {
            loader = loader.with_environment(env.into());
        }

        Ok(Self::new(loader.load()?))
    }

    /// Merge CLI arguments with the base configuration and validate the result
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        if cli.verbose {
            config.logger.level = "debug".to_string();
        } else if cli.quiet {
            config.logger.level = "error".to_string();
        }

        if let Some(level) = cli.log_level {
            config.logger.level = level.into();
        }

        config.validate()?;

        Ok(config)
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parser::Cli;
    use clap::Parser;

    #[test]
    fn test_configuration_merger_new() {
        let base_config = Settings::default();
        let merger = ConfigurationMerger::new(base_config.clone());
        assert_eq!(merger.config(), &base_config);
    }

    #[test]
    fn test_merge_verbose_flag() {
        let merger = ConfigurationMerger::new(Settings::default());
        let cli = Cli::try_parse_from(["kvcache", "--verbose"]).unwrap();
        assert_eq!(merger.merge_cli_args(&cli).unwrap().logger.level, "debug");
    }

    #[test]
    fn test_merge_quiet_flag() {
        let merger = ConfigurationMerger::new(Settings::default());
        let cli = Cli::try_parse_from(["kvcache", "--quiet"]).unwrap();
        assert_eq!(merger.merge_cli_args(&cli).unwrap().logger.level, "error");
    }

    #[test]
    fn test_log_level_overrides_global_flags() {
        let merger = ConfigurationMerger::new(Settings::default());
        let cli =
            Cli::try_parse_from(["kvcache", "--verbose", "get", "k", "--log-level", "warn"])
                .unwrap();
        assert_eq!(merger.merge_cli_args(&cli).unwrap().logger.level, "warn");
    }

    #[test]
    fn test_merge_revalidates() {
        let mut base = Settings::default();
        base.sessions.enabled = true;
        base.sessions.alias = "missing".to_string();
        let merger = ConfigurationMerger::new(base);
        let cli = Cli::try_parse_from(["kvcache"]).unwrap();
        assert!(matches!(
            merger.merge_cli_args(&cli),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_from_cli_with_config_file() {
        let _lock = crate::config::loader::tests::TEST_MUTEX.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kvcache.toml");
        std::fs::write(
            &path,
            "[caches.local]\nbackend = \"memory\"\ncollection = \"cli\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from(["kvcache", "--config", path.to_str().unwrap()]).unwrap();
        let merger = ConfigurationMerger::from_cli(&cli).unwrap();
        assert_eq!(merger.config().caches["local"].collection, "cli");
    }
}
