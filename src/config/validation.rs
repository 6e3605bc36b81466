//! Configuration validation logic
//!
//! Checks run right after loading so a bad value is reported with its
//! settings path before any store is opened.

use crate::config::error::ConfigError;
use crate::config::settings::{
    BackendKind, CacheSettings, FileSettings, LoggerSettings, SecuritySettings, SessionEngine,
    SessionSettings, Settings, WrapperSettings,
};

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

const MAX_COMPRESSION_LEVEL: u32 = 9;

fn has_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl SecuritySettings {
    /// Whether an encryption wrapper without its own key can find a secret.
    pub fn has_encryption_secret(&self) -> bool {
        has_value(self.encryption_key.as_deref()) || has_value(self.secret_key.as_deref())
    }
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// # Validation Rules
    /// - The default level (first directive without `target=`) must be one of
    ///   trace, debug, info, warn, error
    /// - If file logging is enabled, path must not be empty
    /// - Log format must be one of: full, compact, json
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self
            .level
            .split(',')
            .find(|d| !d.contains('='))
            .unwrap_or("info")
            .trim()
            .to_lowercase();
        if !VALID_LOG_LEVELS.contains(&base.as_str()) {
            return Err(ConfigError::validation(
                "logger.level",
                format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        self.file.validate()
    }
}

impl CacheSettings {
    /// # Validation Rules
    /// - `collection` must not be empty
    /// - `default_ttl` and `max_size`, when set, must be positive
    /// - disk aliases need a `directory`
    /// - redis aliases need a host and a non-zero port
    /// - compression levels are 0 to 9; encryption needs a resolvable secret
    pub fn validate(&self, alias: &str, security: &SecuritySettings) -> Result<(), ConfigError> {
        let field = |name: &str| format!("caches.{}.{}", alias, name);

        if self.collection.trim().is_empty() {
            return Err(ConfigError::validation(
                field("collection"),
                "Collection must not be empty.",
            ));
        }
        if self.default_ttl == Some(0) {
            return Err(ConfigError::validation(
                field("default_ttl"),
                "Default TTL must be greater than 0 seconds. Leave it unset for no expiry.",
            ));
        }
        if self.max_size == Some(0) {
            return Err(ConfigError::validation(
                field("max_size"),
                "Maximum size must be greater than 0.",
            ));
        }

        match self.backend {
            BackendKind::Memory => {}
            BackendKind::Disk => {
                if self
                    .directory
                    .as_ref()
                    .is_none_or(|d| d.as_os_str().is_empty())
                {
                    return Err(ConfigError::validation(
                        field("directory"),
                        "Disk backend requires a directory.",
                    ));
                }
            }
            BackendKind::Redis => {
                if self.host.trim().is_empty() {
                    return Err(ConfigError::validation(
                        field("host"),
                        "Redis backend requires a host.",
                    ));
                }
                if self.port == 0 {
                    return Err(ConfigError::validation(
                        field("port"),
                        "Port must be between 1 and 65535.",
                    ));
                }
            }
        }

        for (i, wrapper) in self.wrappers.iter().enumerate() {
            match wrapper {
                WrapperSettings::Compression { level } if *level > MAX_COMPRESSION_LEVEL => {
                    return Err(ConfigError::validation(
                        format!("caches.{}.wrappers[{}].level", alias, i),
                        format!(
                            "Compression level must be between 0 and {}, got {}.",
                            MAX_COMPRESSION_LEVEL, level
                        ),
                    ));
                }
                WrapperSettings::Encryption { key }
                    if !has_value(key.as_deref()) && !security.has_encryption_secret() =>
                {
                    return Err(ConfigError::validation(
                        format!("caches.{}.wrappers[{}].key", alias, i),
                        "Encryption needs a key: set it here, security.encryption_key or security.secret_key.",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl SessionSettings {
    /// Only checked when sessions are enabled.
    pub fn validate(&self, settings: &Settings) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if !settings.caches.contains_key(&self.alias) {
            return Err(ConfigError::validation(
                "sessions.alias",
                format!(
                    "Session store requires cache alias '{}' to exist under [caches].",
                    self.alias
                ),
            ));
        }
        if self.max_age == 0 {
            return Err(ConfigError::validation(
                "sessions.max_age",
                "Session max age must be greater than 0 seconds.",
            ));
        }
        if self.engine == SessionEngine::Encrypted
            && !has_value(self.encryption_key.as_deref())
            && !settings.security.has_encryption_secret()
        {
            return Err(ConfigError::validation(
                "sessions.encryption_key",
                "Encrypted sessions need sessions.encryption_key, security.encryption_key or security.secret_key.",
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Validate every section and return the first error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logger.validate()?;
        for (alias, cache) in &self.caches {
            cache.validate(alias, &self.security)?;
        }
        self.sessions.validate(self)?;
        Ok(())
    }
}
