//! Entry command handler
//!
//! Runs `get`, `set`, `delete`, `touch` and `clear` against one alias through
//! its async cache.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{AsyncCache, CacheKey, Expiry};
use crate::cli::parser::TargetArgs;
use crate::context::KvContext;
use crate::error::{KvError, KvResult};

/// Handler for the entry commands. Each method returns the text to print.
pub struct EntryCommandHandler {
    cache: Arc<AsyncCache>,
    version: Option<u32>,
}

fn expiry(ttl: Option<u64>) -> Expiry {
    ttl.map(Expiry::seconds).unwrap_or_default()
}

impl EntryCommandHandler {
    pub fn new(context: &KvContext, target: &TargetArgs) -> KvResult<Self> {
        Ok(Self {
            cache: context.async_cache(&target.alias)?,
            version: target.key_version,
        })
    }

    fn key<'k>(&self, key: &'k str) -> CacheKey<'k> {
        match self.version {
            Some(version) => CacheKey::versioned(key, version),
            None => CacheKey::new(key),
        }
    }

    pub async fn get(&self, key: &str) -> KvResult<String> {
        match self.cache.get::<Value>(self.key(key)).await? {
            Some(value) => serde_json::to_string_pretty(&value)
                .map_err(|e| KvError::Operation(format!("cannot render value: {}", e))),
            None => Ok("(miss)".to_string()),
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<u64>, raw: bool) -> KvResult<String> {
        let value = if raw {
            Value::String(value.to_string())
        } else {
            serde_json::from_str(value)
                .map_err(|e| KvError::invalid(format!("VALUE is not valid JSON: {}", e)))?
        };
        self.cache.set(self.key(key), &value, expiry(ttl)).await?;
        Ok("OK".to_string())
    }

    pub async fn delete(&self, key: &str) -> KvResult<String> {
        let deleted = self.cache.delete(self.key(key)).await?;
        Ok(if deleted { "deleted" } else { "not found" }.to_string())
    }

    pub async fn touch(&self, key: &str, ttl: Option<u64>) -> KvResult<String> {
        let touched = self.cache.touch(self.key(key), expiry(ttl)).await?;
        Ok(if touched { "touched" } else { "not found" }.to_string())
    }

    pub async fn clear(&self) -> KvResult<String> {
        let removed = self.cache.clear().await?;
        Ok(format!("removed {} key(s) from '{}'", removed, self.cache.namespace()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{BackendKind, CacheSettings, Settings};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    async fn context(dir: &TempDir) -> KvContext {
        let mut settings = Settings::default();
        let mut disk = CacheSettings::new(BackendKind::Disk);
        disk.directory = Some(dir.path().to_path_buf());
        disk.collection = "cli".to_string();
        settings.caches.insert("files".to_string(), disk);
        KvContext::connect(&settings).await.unwrap()
    }

    fn target(alias: &str, version: Option<u32>) -> TargetArgs {
        TargetArgs {
            alias: alias.to_string(),
            key_version: version,
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir).await;
        let handler = EntryCommandHandler::new(&context, &target("files", None)).unwrap();

        assert_eq!(handler.get("user").await.unwrap(), "(miss)");
        handler
            .set("user", r#"{"id": 7}"#, Some(60), false)
            .await
            .unwrap();
        assert!(handler.get("user").await.unwrap().contains("\"id\": 7"));
        assert_eq!(handler.touch("user", None).await.unwrap(), "touched");
        assert_eq!(handler.delete("user").await.unwrap(), "deleted");
        assert_eq!(handler.delete("user").await.unwrap(), "not found");
    }

    #[tokio::test]
    async fn test_versions_and_raw_values() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir).await;
        let v2 = EntryCommandHandler::new(&context, &target("files", Some(2))).unwrap();
        let v1 = EntryCommandHandler::new(&context, &target("files", None)).unwrap();

        v2.set("note", "plain words", None, true).await.unwrap();
        assert_eq!(v2.get("note").await.unwrap(), "\"plain words\"");
        assert_eq!(v1.get("note").await.unwrap(), "(miss)");

        assert!(v1.set("bad", "{oops", None, false).await.is_err());
        assert_eq!(v1.clear().await.unwrap(), "removed 1 key(s) from 'cli'");
    }

    #[tokio::test]
    async fn test_unknown_alias() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir).await;
        let err = EntryCommandHandler::new(&context, &target("nope", None))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
