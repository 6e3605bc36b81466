//! Redis stores: a pooled async store on bb8 and a single-connection blocking
//! store. Both send the same commands, built once in [`command`].

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use redis::aio::MultiplexedConnection;
use redis::{Client, Connection, RedisError, RedisResult};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::codec::key;
use crate::error::{KvError, KvResult};
use crate::store::traits::{
    AddAtomicity, AsyncStore, BatchOutcome, BlockingStore, Concurrency, StoreCapabilities,
    check_ttl,
};

type RedisPool = Pool<Client>;

const SCAN_COUNT: usize = 500;

fn default_pool_size() -> u32 {
    4
}

fn default_connection_timeout() -> u64 {
    5
}

/// Backend-specific options accepted under an alias's `options` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisOptions {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Seconds to wait for a connection before giving up.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub options: RedisOptions,
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>, options: RedisOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }

    /// Build a `redis://` URL from its parts. The password is percent-encoded.
    pub fn url_for(host: &str, port: u16, db: u32, password: Option<&str>) -> String {
        match password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                percent_encode(password),
                host,
                port,
                db
            ),
            _ => format!("redis://{}:{}/{}", host, port, db),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.options.connection_timeout.max(1))
    }

    fn client(&self) -> KvResult<Client> {
        Client::open(self.url.as_str())
            .map_err(|e| KvError::configuration(format!("invalid redis url: {}", e)))
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Escape glob metacharacters so a namespace prefix matches literally.
fn glob_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn redis_error(e: RedisError) -> KvError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
    {
        KvError::unavailable(format!("redis: {}", e))
    } else {
        KvError::Operation(format!("redis: {}", e))
    }
}

mod command {
    use std::time::Duration;

    use redis::{Cmd, Pipeline};

    use super::{SCAN_COUNT, scan_pattern};

    #[derive(Clone, Copy)]
    pub(super) enum Condition {
        Always,
        IfAbsent,
        IfPresentKeepTtl,
    }

    /// Whole milliseconds, rounded up. A positive TTL never becomes 0.
    pub(super) fn millis(ttl: Duration) -> u64 {
        let whole = ttl.as_millis() as u64;
        if ttl.subsec_nanos() % 1_000_000 == 0 {
            whole
        } else {
            whole.saturating_add(1)
        }
    }

    pub(super) fn set(key: &str, value: &[u8], ttl: Option<Duration>, condition: Condition) -> Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        match condition {
            Condition::Always => {}
            Condition::IfAbsent => {
                cmd.arg("NX");
            }
            Condition::IfPresentKeepTtl => {
                cmd.arg("XX").arg("KEEPTTL");
            }
        }
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd
    }

    pub(super) fn mget(keys: &[String]) -> Cmd {
        let mut cmd = redis::cmd("MGET");
        cmd.arg(keys);
        cmd
    }

    /// Replies `(exists, _)`; the second reply is the expiry change.
    pub(super) fn touch(key: &str, ttl: Option<Duration>) -> Pipeline {
        let mut pipe = redis::pipe();
        pipe.cmd("EXISTS").arg(key);
        match ttl {
            Some(ttl) => pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)),
            None => pipe.cmd("PERSIST").arg(key),
        };
        pipe
    }

    pub(super) fn set_many(entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Pipeline {
        let mut pipe = redis::pipe();
        pipe.ignore_errors();
        for (key, value) in entries {
            pipe.add_command(set(key, value, ttl, Condition::Always));
        }
        pipe
    }

    pub(super) fn del_each(keys: &[String]) -> Pipeline {
        let mut pipe = redis::pipe();
        pipe.ignore_errors();
        for key in keys {
            pipe.cmd("DEL").arg(key);
        }
        pipe
    }

    pub(super) fn scan(cursor: u64, namespace: &str) -> Cmd {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(scan_pattern(namespace))
            .arg("COUNT")
            .arg(SCAN_COUNT);
        cmd
    }

    pub(super) fn del(keys: &[String]) -> Cmd {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        cmd
    }
}

use command::Condition;

fn collect_many<T>(
    keys: impl IntoIterator<Item = String>,
    replies: Vec<RedisResult<T>>,
) -> KvResult<BatchOutcome<T>> {
    let mut outcome = BatchOutcome::with_capacity(replies.len());
    for (key, reply) in keys.into_iter().zip(replies) {
        outcome.record(key, reply.map_err(redis_error))?;
    }
    Ok(outcome)
}

fn capabilities() -> StoreCapabilities {
    StoreCapabilities {
        concurrency: Concurrency::Shared,
        add: AddAtomicity::CompareAndSwap,
    }
}

/// Pooled async redis store.
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    /// Build the pool. Connections are opened lazily, so an unreachable
    /// server surfaces as `StoreUnavailable` on first use.
    pub async fn connect(config: &RedisStoreConfig) -> KvResult<Self> {
        let client = config.client()?;
        let pool = Pool::builder()
            .max_size(config.options.pool_size.max(1))
            .connection_timeout(config.timeout())
            .build(client)
            .await
            .map_err(|e| KvError::unavailable(e.to_string()))?;
        debug!(pool_size = config.options.pool_size, "Redis pool ready");
        Ok(Self { pool })
    }

    async fn get_conn(&self) -> KvResult<PooledConnection<'_, Client>> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::unavailable(format!("redis pool: {}", e)))
    }
}

#[async_trait]
impl AsyncStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    fn capabilities(&self) -> StoreCapabilities {
        capabilities()
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        redis::cmd("GET")
            .arg(key)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        check_ttl(ttl)?;
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        command::set(key, &value, ttl, Condition::Always)
            .query_async::<()>(conn_ref)
            .await
            .map_err(redis_error)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        check_ttl(ttl)?;
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let reply: Option<String> = command::set(key, &value, ttl, Condition::IfAbsent)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        Ok(reply.is_some())
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let reply: Option<String> = command::set(key, &value, None, Condition::IfPresentKeepTtl)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        Ok(found > 0)
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let (found, _): (i64, i64) = command::touch(key, ttl)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        Ok(found > 0)
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let values: Vec<Option<Vec<u8>>> = command::mget(keys)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        collect_many(keys.iter().cloned(), values.into_iter().map(Ok).collect())
    }

    async fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        check_ttl(ttl)?;
        if entries.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let replies: Vec<RedisResult<redis::Value>> = command::set_many(&entries, ttl)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        let replies = replies.into_iter().map(|r| r.map(|_| ())).collect();
        collect_many(entries.into_iter().map(|(k, _)| k), replies)
    }

    async fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        if keys.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let replies: Vec<RedisResult<i64>> = command::del_each(keys)
            .query_async(conn_ref)
            .await
            .map_err(redis_error)?;
        let replies = replies.into_iter().map(|r| r.map(|n| n > 0)).collect();
        collect_many(keys.iter().cloned(), replies)
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64> {
        let mut conn = self.get_conn().await?;
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let (next, keys): (u64, Vec<String>) = command::scan(cursor, namespace)
                .query_async(conn_ref)
                .await
                .map_err(redis_error)?;
            if !keys.is_empty() {
                let conn_ref: &mut MultiplexedConnection = &mut conn;
                let n: u64 = command::del(&keys)
                    .query_async(conn_ref)
                    .await
                    .map_err(redis_error)?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

/// Blocking redis store holding one lazily opened connection. The connection
/// is dropped after a transport failure and reopened on the next call.
pub struct BlockingRedisStore {
    client: Client,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl BlockingRedisStore {
    pub fn connect(config: &RedisStoreConfig) -> KvResult<Self> {
        Ok(Self {
            client: config.client()?,
            timeout: config.timeout(),
            conn: Mutex::new(None),
        })
    }

    fn open(&self) -> KvResult<Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(redis_error)?;
        conn.set_read_timeout(Some(self.timeout))
            .map_err(redis_error)?;
        conn.set_write_timeout(Some(self.timeout))
            .map_err(redis_error)?;
        Ok(conn)
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> KvResult<T> {
        let mut slot = self.lock()?;
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(KvError::unavailable("redis connection not established"));
        };
        match f(conn).map_err(redis_error) {
            Err(e) if e.aborts_batch() => {
                warn!(error = %e, "Dropping redis connection");
                *slot = None;
                Err(e)
            }
            other => other,
        }
    }
}

impl BlockingStore for BlockingRedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    fn capabilities(&self) -> StoreCapabilities {
        capabilities()
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.with_conn(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        check_ttl(ttl)?;
        self.with_conn(|conn| command::set(key, &value, ttl, Condition::Always).query(conn))
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let reply: Option<String> = self.with_conn(|conn| {
            command::set(key, &value, ttl, Condition::IfAbsent).query(conn)
        })?;
        Ok(reply.is_some())
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let reply: Option<String> = self.with_conn(|conn| {
            command::set(key, &value, None, Condition::IfPresentKeepTtl).query(conn)
        })?;
        Ok(reply.is_some())
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let removed: i64 = self.with_conn(|conn| redis::cmd("DEL").arg(key).query(conn))?;
        Ok(removed > 0)
    }

    fn exists(&self, key: &str) -> KvResult<bool> {
        let found: i64 = self.with_conn(|conn| redis::cmd("EXISTS").arg(key).query(conn))?;
        Ok(found > 0)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let (found, _): (i64, i64) = self.with_conn(|conn| command::touch(key, ttl).query(conn))?;
        Ok(found > 0)
    }

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let values: Vec<Option<Vec<u8>>> = self.with_conn(|conn| command::mget(keys).query(conn))?;
        collect_many(keys.iter().cloned(), values.into_iter().map(Ok).collect())
    }

    fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        check_ttl(ttl)?;
        if entries.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let replies: Vec<RedisResult<redis::Value>> =
            self.with_conn(|conn| command::set_many(&entries, ttl).query(conn))?;
        let replies = replies.into_iter().map(|r| r.map(|_| ())).collect();
        collect_many(entries.into_iter().map(|(k, _)| k), replies)
    }

    fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        if keys.is_empty() {
            return Ok(BatchOutcome::with_capacity(0));
        }
        let replies: Vec<RedisResult<i64>> =
            self.with_conn(|conn| command::del_each(keys).query(conn))?;
        let replies = replies.into_iter().map(|r| r.map(|n| n > 0)).collect();
        collect_many(keys.iter().cloned(), replies)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) =
                self.with_conn(|conn| command::scan(cursor, namespace).query(conn))?;
            if !keys.is_empty() {
                let n: u64 = self.with_conn(|conn| command::del(&keys).query(conn))?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

/// Physical prefix a namespace's keys share, with glob characters escaped.
pub fn scan_pattern(namespace: &str) -> String {
    format!("{}*", glob_escape(&key::namespace_prefix(namespace)))
}
