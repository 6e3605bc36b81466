//! Check command handler
//!
//! Validates the loaded configuration and reads one key from every alias with one read.

use crate::config::settings::Settings;
use crate::context::KvContext;
use crate::error::{KvError, KvResult};

/// Key read by the check. Never written.
const CHECK_KEY: &str = "kvcache:check";

/// Result of a check run: one line per alias and how many failed.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub lines: Vec<String>,
    pub failures: usize,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.failures == 0
    }
}

/// Handler for the check command
pub struct CheckCommandHandler<'a> {
    config: &'a Settings,
    context: &'a KvContext,
}

impl<'a> CheckCommandHandler<'a> {
    pub fn new(config: &'a Settings, context: &'a KvContext) -> Self {
        Self { config, context }
    }

    pub async fn execute(&self) -> KvResult<CheckReport> {
        let mut report = CheckReport::default();
        report.lines.push("✓ Configuration is valid".to_string());

        for alias in self.context.aliases() {
            let backend = self.context.backend(alias)?;
            match self.ping(alias).await {
                Ok(()) => report
                    .lines
                    .push(format!("✓ {} ({}): reachable", alias, backend)),
                Err(e) => {
                    report.failures += 1;
                    report
                        .lines
                        .push(format!("✗ {} ({}): {}", alias, backend, e));
                }
            }
        }

        if self.config.sessions.enabled {
            report.lines.push(format!(
                "✓ Sessions: {:?} engine on alias '{}'",
                self.config.sessions.engine, self.config.sessions.alias
            ));
        }

        Ok(report)
    }

    async fn ping(&self, alias: &str) -> KvResult<()> {
        if let Ok(cache) = self.context.async_cache(alias) {
            cache.has_key(CHECK_KEY).await?;
            return Ok(());
        }

        let cache = self.context.cache(alias)?;
        tokio::task::spawn_blocking(move || cache.has_key(CHECK_KEY).map(|_| ()))
            .await
            .map_err(|e| KvError::Operation(format!("check task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{BackendKind, CacheSettings, ConcurrencyMode};

    #[tokio::test]
    async fn test_check_memory_aliases() {
        let mut settings = Settings::default();
        let mut blocking_only = CacheSettings::new(BackendKind::Memory);
        blocking_only.mode = ConcurrencyMode::Blocking;
        settings.caches.insert("legacy".to_string(), blocking_only);
        let context = KvContext::connect(&settings).await.unwrap();

        let report = CheckCommandHandler::new(&settings, &context)
            .execute()
            .await
            .unwrap();
        assert!(report.is_ok());
        // header plus one line per alias
        assert_eq!(report.lines.len(), 4);
        assert!(report.lines.iter().any(|l| l.contains("legacy (memory): reachable")));
    }

    #[tokio::test]
    async fn test_check_reports_unreachable_redis() {
        let mut settings = Settings::default();
        let mut redis = CacheSettings::new(BackendKind::Redis);
        // Reserved port, nothing listens there.
        redis.port = 1;
        redis
            .options
            .insert("connection_timeout".to_string(), serde_json::json!(1));
        settings.caches.insert("remote".to_string(), redis);
        let context = KvContext::connect(&settings).await.unwrap();

        let report = CheckCommandHandler::new(&settings, &context)
            .execute()
            .await
            .unwrap();
        assert_eq!(report.failures, 1);
        assert!(report.lines.iter().any(|l| l.starts_with("✗ remote (redis)")));
    }
}
