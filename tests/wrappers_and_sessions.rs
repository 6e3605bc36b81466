mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{NAMESPACE, plain, shared_memory_drivers};
use kvcache::codec::key;
use kvcache::session::{
    AsyncSessionStore, ExpiryPolicy, Session, SessionConfig, SessionState, SessionStore,
};
use kvcache::store::{BlockingStore, MemoryStore};
use kvcache::wrappers::{CompressionWrapper, EncryptionWrapper};
use kvcache::config::ConfigLoader;
use kvcache::instrument::Operation;
use kvcache::{CacheBuilder, ErrorKind, Expiry, KvContext};
use serde_json::json;
use tempfile::TempDir;

const SECRET: &str = "integration-secret";

fn wrapped() -> CacheBuilder {
    plain()
        .wrapper(Arc::new(CompressionWrapper::new(6).unwrap()))
        .wrapper(Arc::new(EncryptionWrapper::from_secret(SECRET).unwrap()))
}

#[tokio::test]
async fn wrapped_values_round_trip_and_stay_opaque() {
    let (store, drivers) = shared_memory_drivers(wrapped);
    let physical = key::encode(NAMESPACE, "secret", 1);

    for driver in &drivers {
        driver
            .set("secret", &json!({"token": "abc"}), Expiry::Default)
            .await
            .unwrap();
        assert_eq!(
            driver.get("secret").await.unwrap(),
            Some(json!({"token": "abc"})),
            "{}",
            driver.family()
        );

        let raw = store.get(&physical).unwrap().unwrap();
        assert!(!raw.windows(3).any(|w| w == b"abc"));
    }
}

#[tokio::test]
async fn tampered_payload_is_a_wrapper_error() {
    let (store, drivers) = shared_memory_drivers(wrapped);
    let physical = key::encode(NAMESPACE, "t", 1);

    for driver in &drivers {
        driver.set("t", &json!("payload"), Expiry::Default).await.unwrap();
        let mut raw = store.get(&physical).unwrap().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        store.put(&physical, raw, None).unwrap();

        let err = driver.get("t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wrapper, "{}", driver.family());
    }
}

#[tokio::test]
async fn foreign_payload_reads_as_miss() {
    let (store, drivers) = shared_memory_drivers(plain);
    let physical = key::encode(NAMESPACE, "foreign", 1);
    store.put(&physical, vec![0xFF, 0x00], None).unwrap();

    for driver in &drivers {
        assert_eq!(driver.get("foreign").await.unwrap(), None);
    }
}

#[tokio::test]
async fn wrong_key_cannot_read() {
    let store = Arc::new(MemoryStore::new(100).unwrap());
    let writer = plain()
        .wrapper(Arc::new(EncryptionWrapper::from_secret("one").unwrap()))
        .build(Box::new(Arc::clone(&store)))
        .unwrap();
    let reader = plain()
        .wrapper(Arc::new(EncryptionWrapper::from_secret("two").unwrap()))
        .build(Box::new(Arc::clone(&store)))
        .unwrap();

    writer.set("k", "v", Expiry::Default).unwrap();
    assert_eq!(
        reader.get::<String>("k").unwrap_err().kind(),
        ErrorKind::Wrapper
    );
}

fn session_config(max_age: Duration, expiry: ExpiryPolicy) -> SessionConfig {
    SessionConfig {
        max_age,
        expiry,
        ..SessionConfig::default()
    }
}

#[test]
fn blocking_session_lifecycle() {
    let cache = Arc::new(
        plain()
            .build(Box::new(MemoryStore::new(100).unwrap()))
            .unwrap(),
    );
    let store = SessionStore::new(cache, SessionConfig::default()).unwrap();

    let mut session = store.load("doesnotexist").unwrap();
    assert_eq!(session.state(), SessionState::Absent);
    assert!(session.key().is_none());

    session.insert("user_id", &42).unwrap();
    store.save(&mut session).unwrap();
    let key = session.key().unwrap().to_string();
    assert_eq!(key.len(), 32);
    assert!(store.exists(&key).unwrap());

    let loaded = store.load(&key).unwrap();
    assert_eq!(loaded.state(), SessionState::Loaded);
    assert_eq!(loaded.get::<i64>("user_id"), Some(42));

    let mut cycled = loaded;
    store.cycle_key(&mut cycled).unwrap();
    let new_key = cycled.key().unwrap().to_string();
    assert_ne!(new_key, key);
    assert!(!store.exists(&key).unwrap());
    assert_eq!(store.load(&new_key).unwrap().get::<i64>("user_id"), Some(42));

    store.flush(&mut cycled).unwrap();
    assert!(cycled.is_empty());
    assert!(!store.exists(&new_key).unwrap());
}

#[tokio::test]
async fn encrypted_async_sessions_hide_data_and_expire() {
    let memory = Arc::new(MemoryStore::new(100).unwrap());
    let cache = Arc::new(
        plain()
            .wrapper(Arc::new(EncryptionWrapper::from_secret(SECRET).unwrap()))
            .build_async(Box::new(Arc::clone(&memory)))
            .unwrap(),
    );
    let config = session_config(Duration::from_secs(1), ExpiryPolicy::Sliding);
    let prefix = config.key_prefix.clone();
    let store = AsyncSessionStore::new(cache, config).unwrap();

    let mut session = Session::new();
    session.insert("token", "abc").unwrap();
    store.save(&mut session).await.unwrap();
    let session_key = session.key().unwrap().to_string();

    let physical = key::encode(NAMESPACE, &format!("{}{}", prefix, session_key), 1);
    let raw = memory.get(&physical).unwrap().unwrap();
    assert!(!raw.windows(3).any(|w| w == b"abc"));

    let loaded = store.load(&session_key).await.unwrap();
    assert_eq!(loaded.get::<String>("token").as_deref(), Some("abc"));

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let expired = store.load(&session_key).await.unwrap();
    assert_eq!(expired.state(), SessionState::Absent);
    assert!(expired.is_empty());
}

#[tokio::test]
async fn session_keys_are_never_chosen_by_clients() {
    let cache = Arc::new(
        plain()
            .build_async(Box::new(MemoryStore::new(100).unwrap()))
            .unwrap(),
    );
    let store = AsyncSessionStore::new(cache, SessionConfig::default()).unwrap();

    let mut session = store.load("attackerchosenkey1234").await.unwrap();
    session.insert("role", "admin").unwrap();
    store.save(&mut session).await.unwrap();
    assert_ne!(session.key(), Some("attackerchosenkey1234"));
}

fn app_toml(data_dir: &std::path::Path) -> String {
    format!(
        r#"
[security]
secret_key = "integration-secret"

[caches.default]
backend = "memory"
collection = "app"
wrappers = [{{ type = "compression" }}]

[caches.sessions]
backend = "disk"
collection = "sess"
directory = '{}'

[sessions]
enabled = true
engine = "encrypted"
alias = "sessions"

[observability]
enabled = true
"#,
        data_dir.display()
    )
}

#[tokio::test]
async fn configured_context_serves_caches_and_sessions() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.toml");
    std::fs::write(&file, app_toml(&dir.path().join("data"))).unwrap();

    let settings = ConfigLoader::new()
        .unwrap()
        .with_config_file(file.clone())
        .load()
        .unwrap();
    let context = KvContext::connect(&settings).await.unwrap();

    let cache = context.async_cache("default").unwrap();
    cache.set("greeting", "hello", Expiry::Default).await.unwrap();
    assert_eq!(
        cache.get::<String>("greeting").await.unwrap().as_deref(),
        Some("hello")
    );

    let sessions = context.async_session_store().unwrap();
    let mut session = Session::new();
    session.insert("token", "abc").unwrap();
    sessions.save(&mut session).await.unwrap();
    let key = session.key().unwrap().to_string();

    let blocking = context.session_store().unwrap();
    let loaded = tokio::task::spawn_blocking(move || blocking.load(&key).unwrap())
        .await
        .unwrap();
    assert_eq!(loaded.get::<String>("token").as_deref(), Some("abc"));

    let metrics = context.metrics().unwrap();
    assert_eq!(metrics.totals(Operation::SessionSave).requests, 1);
    assert_eq!(metrics.totals(Operation::SessionLoad).hits, 1);

    context.close().await.unwrap();
}
