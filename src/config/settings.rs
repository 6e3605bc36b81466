//! Configuration settings structures for kvcache
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};
use crate::session::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_AGE, ExpiryPolicy, SessionConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/kvcache.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_collection() -> String {
    "django_cache".to_string()
}

fn default_version() -> u32 {
    1
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_compression_level() -> u32 {
    6
}

fn default_session_alias() -> String {
    "django_kv_sessions".to_string()
}

fn default_session_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_session_max_age() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}

fn default_caches() -> BTreeMap<String, CacheSettings> {
    BTreeMap::from([
        ("default".to_string(), CacheSettings::memory()),
        (default_session_alias(), CacheSettings::memory()),
    ])
}

// ============================================================================
// Logger Settings
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

/// `[logger]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime `LoggerConfig`.
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let format = self
            .file
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;
        let file = FileConfig::new(
            self.file.enabled,
            PathBuf::from(self.file.path),
            self.file.append,
            format,
        )
        .map_err(|e| ConfigError::validation("logger.file", e.to_string()))?;

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger", format!("{:#}", e)))
    }
}

// ============================================================================
// Cache Settings
// ============================================================================

/// Storage backend behind a cache alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Disk,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Disk => "disk",
            BackendKind::Redis => "redis",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "disk" => Ok(BackendKind::Disk),
            "redis" => Ok(BackendKind::Redis),
            _ => Err(ConfigError::validation(
                "backend",
                format!(
                    "Unknown backend '{}'. Valid backends are: memory, disk, redis",
                    s
                ),
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which front ends an alias can be opened as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    Blocking,
    Async,
    #[default]
    Both,
}

impl ConcurrencyMode {
    pub fn allows_blocking(&self) -> bool {
        matches!(self, ConcurrencyMode::Blocking | ConcurrencyMode::Both)
    }

    pub fn allows_async(&self) -> bool {
        matches!(self, ConcurrencyMode::Async | ConcurrencyMode::Both)
    }
}

/// One entry of an alias's `wrappers` list, applied in list order on write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WrapperSettings {
    Encryption {
        #[serde(default)]
        key: Option<String>,
    },
    Compression {
        #[serde(default = "default_compression_level")]
        level: u32,
    },
}

/// `[caches.<alias>]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub backend: BackendKind,

    #[serde(default)]
    pub mode: ConcurrencyMode,

    /// Namespace of every key written through this alias
    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Seconds; unset means entries written with the default expiry never expire
    #[serde(default)]
    pub default_ttl: Option<u64>,

    #[serde(default)]
    pub wrappers: Vec<WrapperSettings>,

    // redis
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub db: u32,

    #[serde(default)]
    pub password: Option<String>,

    // disk and memory
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Entry bound; memory defaults to 10000, disk is unbounded when unset
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Backend-specific options, validated by the store constructor
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl CacheSettings {
    pub fn memory() -> Self {
        Self::new(BackendKind::Memory)
    }

    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            mode: ConcurrencyMode::default(),
            collection: default_collection(),
            version: default_version(),
            default_ttl: None,
            wrappers: Vec::new(),
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: None,
            directory: None,
            max_size: None,
            options: serde_json::Map::new(),
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl.map(Duration::from_secs)
    }
}

// ============================================================================
// Session, Security and Observability Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEngine {
    #[default]
    Cache,
    /// Same as `cache`, with an encryption link appended to the alias chain
    Encrypted,
}

/// `[sessions]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub engine: SessionEngine,

    /// Cache alias holding session records
    #[serde(default = "default_session_alias")]
    pub alias: String,

    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,

    /// Seconds
    #[serde(default = "default_session_max_age")]
    pub max_age: u64,

    #[serde(default)]
    pub expiry: ExpiryPolicy,

    /// Overrides `security.encryption_key` for the encrypted engine
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: SessionEngine::default(),
            alias: default_session_alias(),
            key_prefix: default_session_prefix(),
            max_age: default_session_max_age(),
            expiry: ExpiryPolicy::default(),
            encryption_key: None,
        }
    }
}

impl SessionSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            key_prefix: self.key_prefix.clone(),
            max_age: Duration::from_secs(self.max_age),
            expiry: self.expiry,
        }
    }
}

/// `[security]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Fallback secret for encryption when no dedicated key is set
    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// `[observability]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub instrument_cache: bool,

    #[serde(default = "default_true")]
    pub instrument_sessions: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            instrument_cache: default_true(),
            instrument_sessions: default_true(),
            metrics_enabled: default_true(),
        }
    }
}

// ============================================================================
// Root Settings
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default = "default_caches")]
    pub caches: BTreeMap<String, CacheSettings>,

    #[serde(default)]
    pub sessions: SessionSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logger: LoggerSettings::default(),
            security: SecuritySettings::default(),
            caches: default_caches(),
            sessions: SessionSettings::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl Settings {
    pub fn cache(&self, alias: &str) -> Result<&CacheSettings, ConfigError> {
        self.caches.get(alias).ok_or_else(|| {
            ConfigError::validation(
                "caches",
                format!("No cache alias '{}' is configured", alias),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Settings {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.caches.contains_key("default"));
        assert!(settings.caches.contains_key("django_kv_sessions"));
        assert!(!settings.observability.enabled);
        assert!(settings.observability.metrics_enabled);
        assert_eq!(settings.sessions.max_age, 1_209_600);
    }

    #[test]
    fn test_cache_table() {
        let settings = parse(
            r#"
[caches.main]
backend = "redis"
collection = "app"
version = 3
default_ttl = 300
host = "cache.internal"
mode = "async"
wrappers = [{ type = "compression", level = 9 }, { type = "encryption" }]

[caches.main.options]
pool_size = 16
"#,
        );
        let main = settings.cache("main").unwrap();
        assert_eq!(main.backend, BackendKind::Redis);
        assert_eq!(main.collection, "app");
        assert_eq!(main.version, 3);
        assert_eq!(main.default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(main.port, 6379);
        assert_eq!(main.mode, ConcurrencyMode::Async);
        assert_eq!(
            main.wrappers,
            vec![
                WrapperSettings::Compression { level: 9 },
                WrapperSettings::Encryption { key: None },
            ]
        );
        assert_eq!(main.options["pool_size"], serde_json::json!(16));
        assert!(settings.cache("missing").is_err());
    }

    #[test]
    fn test_unknown_backend_fails_to_parse() {
        let result: Result<Settings, _> = config::Config::builder()
            .add_source(config::File::from_str(
                "[caches.x]\nbackend = \"memcached\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
        assert!("memcached".parse::<BackendKind>().is_err());
        assert_eq!("Redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
    }

    #[test]
    fn test_logger_settings_conversion() {
        let mut logger = LoggerSettings::default();
        assert!(logger.clone().into_logger_config().is_ok());
        logger.file.format = "yaml".to_string();
        assert!(matches!(
            logger.into_logger_config(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_session_config() {
        let sessions = SessionSettings {
            max_age: 60,
            expiry: ExpiryPolicy::Fixed,
            ..SessionSettings::default()
        };
        let config = sessions.session_config();
        assert_eq!(config.max_age, Duration::from_secs(60));
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.expiry, ExpiryPolicy::Fixed);
    }
}
