//! Redis bucket store for `tokengate` (companion crate).
//!
//! Bring your own `redis::aio::MultiplexedConnection`, or let [`RedisConfig::connect`] open
//! one. Every admission check is a single Lua script run on the server, so the
//! load-refill-consume-store step is atomic for all gateway instances sharing the database.
//! Records use the same `"<tokens>:<last_refill_ms>"` form as the in-process stores and
//! expire after the bucket TTL.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokengate::store::{BucketParams, BucketStore, ConsumeOutcome};
use tokengate::StoreError;

/// Refill arithmetic mirrors `tokengate::refill`; keep the two in step.
///
/// KEYS[1] bucket key
/// ARGV capacity, refill rate (tokens/s), now (unix ms), ttl (ms)
/// Returns {tokens_after, next_refill_ms, consumed, state_reset}.
pub const CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local tokens = capacity
local last = now
local reset = 0

local raw = redis.pcall('GET', key)
if type(raw) == 'table' and raw.err then
  redis.call('DEL', key)
  reset = 1
elseif raw then
  local t, l = string.match(raw, '^%s*(%d+)%s*:%s*(%d+)%s*$')
  if t then
    tokens = tonumber(t)
    last = tonumber(l)
  else
    reset = 1
  end
end

local elapsed = now - last
if elapsed < 0 then
  elapsed = 0
end
local add = math.floor(rate * elapsed / 1000)
tokens = math.min(capacity, tokens + add)
if add > 0 then
  local spent = math.floor(add * 1000 / rate)
  if spent > elapsed then
    spent = elapsed
  end
  last = last + spent
end

local consumed = 0
if tokens >= 1 then
  tokens = tokens - 1
  consumed = 1
end

redis.call('SET', key, string.format('%d:%d', tokens, last), 'PX', ttl)

local period = math.max(1, math.ceil(1000 / rate))
-- largest integer a Lua number holds exactly; replies must fit a signed 64-bit integer
local next_refill = math.min(last + period, 9007199254740991)
return {tokens, next_refill, consumed, reset}
"#;

/// Connection settings for [`RedisConfig::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Per-command deadline enforced by the client.
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(3),
        }
    }
}

impl RedisConfig {
    /// Connection URL for these settings.
    pub fn url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Open a multiplexed connection, ping it, and wrap it in a store.
    ///
    /// # Errors
    /// [`StoreError::Unavailable`] if the URL is invalid, the server cannot be reached
    /// within `connect_timeout`, or the ping fails.
    pub async fn connect(&self) -> Result<RedisBucketStore, StoreError> {
        let client = redis::Client::open(self.url()).map_err(StoreError::unavailable)?;
        let mut conn = client
            .get_multiplexed_async_connection_with_timeouts(
                self.response_timeout,
                self.connect_timeout,
            )
            .await
            .map_err(|e| {
                tracing::warn!(target: "tokengate::redis", host = %self.host, port = self.port, error = %e, "failed to connect to redis");
                StoreError::unavailable(e)
            })?;

        let _pong: String =
            redis::cmd("PING").query_async(&mut conn).await.map_err(StoreError::unavailable)?;
        tracing::info!(target: "tokengate::redis", host = %self.host, port = self.port, db = self.db, "connected to redis");
        Ok(RedisBucketStore::new(conn))
    }
}

/// [`BucketStore`] backed by a Redis server-side script.
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: MultiplexedConnection,
    script: Arc<redis::Script>,
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("conn", &"<redis::aio::MultiplexedConnection>")
            .field("script", &self.script.get_hash())
            .finish()
    }
}

impl RedisBucketStore {
    /// Wrap an existing connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn, script: Arc::new(redis::Script::new(CONSUME_SCRIPT)) }
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn atomic_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let reply: (i64, i64, i64, i64) = self
            .script
            .key(key)
            .arg(params.capacity)
            .arg(params.refill_rate)
            .arg(now_ms)
            .arg(params.ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::warn!(target: "tokengate::redis", key, error = %e, "bucket script failed");
                StoreError::unavailable(e)
            })?;
        let outcome = outcome_from_reply(reply)?;
        if outcome.state_reset {
            tracing::warn!(target: "tokengate::redis", key, "resetting corrupt bucket");
        }
        Ok(outcome)
    }
}

/// Interpret the script's `{tokens, next_refill, consumed, reset}` reply.
pub fn outcome_from_reply(reply: (i64, i64, i64, i64)) -> Result<ConsumeOutcome, StoreError> {
    let (tokens, next, consumed, reset) = reply;
    let tokens_after = u64::try_from(tokens)
        .map_err(|_| StoreError::unavailable(format!("script returned negative tokens {tokens}")))?;
    let next_refill_ms = u64::try_from(next)
        .map_err(|_| StoreError::unavailable(format!("script returned negative refill time {next}")))?;
    Ok(ConsumeOutcome { tokens_after, next_refill_ms, consumed: consumed == 1, state_reset: reset == 1 })
}
