//! Redis-backed connector.
//!
//! Layout under the configured key prefix:
//!
//! - `{prefix}:queues` set of declared queue names
//! - `{prefix}:queue:{name}` list of message ids ready for delivery
//! - `{prefix}:queue:{name}:inflight` sorted set of delivered message ids,
//!   scored by the epoch millisecond they turn visible again
//! - `{prefix}:queue:{name}:bodies` hash of encoded payloads
//! - `{prefix}:queue:{name}:meta` hash of enqueue times (epoch ms)
//! - `{prefix}:queue:{name}:receives` hash of receive counts
//! - `{prefix}:queue:{name}:started` hash of first delivery times (epoch ms)
//!
//! Receipt handles are `{message_id}:{receive_count}` so a handle from an
//! earlier delivery no longer matches once the message was received again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::config::env_parse;
use crate::connector::memory::DEFAULT_VISIBILITY_TIMEOUT;
use crate::connector::Connector;
use crate::{BrokerId, Metadata, Payload, QueueError, QueueResult};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_KEY_PREFIX: &str = "sqjobs";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Longest single long poll, about a day
const MAX_WAIT_TIME: Duration = Duration::from_secs(86_400);

/// Connection and layout settings of [`RedisConnector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    /// Time a delivered message stays hidden unless retried or deleted
    pub visibility_timeout: Duration,
    /// Pause between receive attempts while long polling
    pub poll_interval: Duration,
    /// Queues declared by [`RedisConnector::declare_queues`]
    pub queues: Vec<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queues: Vec::new(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `SQJOBS_REDIS_URL`, `SQJOBS_REDIS_KEY_PREFIX`,
    /// `SQJOBS_VISIBILITY_TIMEOUT_SECS`, `SQJOBS_REDIS_POLL_INTERVAL_MS` and the
    /// comma separated `SQJOBS_QUEUES`
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            url: env_parse::<String>("SQJOBS_REDIS_URL")?.unwrap_or(defaults.url),
            key_prefix: env_parse::<String>("SQJOBS_REDIS_KEY_PREFIX")?.unwrap_or(defaults.key_prefix),
            visibility_timeout: env_parse::<u64>("SQJOBS_VISIBILITY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            poll_interval: env_parse::<u64>("SQJOBS_REDIS_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            queues: env_parse::<String>("SQJOBS_QUEUES")?
                .map(|raw| split_queue_list(&raw))
                .unwrap_or_default(),
        })
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }
}

fn split_queue_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

/// Atomically requeue expired in-flight messages, pop the next ready one
/// and mark it in flight.
///
/// KEYS: ready, inflight, bodies, meta, receives, started.
/// ARGV: now (epoch ms), visible-at (epoch ms).
/// Returns `{id, body, created_on, receive_count, first_execution_on}` or nil.
const RECEIVE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('RPUSH', KEYS[1], id)
end
while true do
    local id = redis.call('LPOP', KEYS[1])
    if not id then
        return false
    end
    local body = redis.call('HGET', KEYS[3], id)
    if body then
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        local count = redis.call('HINCRBY', KEYS[5], id, 1)
        redis.call('HSETNX', KEYS[6], id, ARGV[1])
        return {id, body, redis.call('HGET', KEYS[4], id), count, redis.call('HGET', KEYS[6], id)}
    end
    redis.call('HDEL', KEYS[4], id)
    redis.call('HDEL', KEYS[5], id)
    redis.call('HDEL', KEYS[6], id)
end
"#;

/// Raw reply of [`RECEIVE_SCRIPT`]
type Received = (String, Vec<u8>, i64, u32, i64);

/// Connector storing queues in Redis.
///
/// Only non-blocking commands are issued, so one multiplexed connection is
/// shared by producers and consumers. A long poll repeats the receive
/// script every `poll_interval` until `wait_time` runs out; dropping the
/// future at any point leaves every message either ready or in flight.
pub struct RedisConnector {
    config: RedisConfig,
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    codec: Arc<dyn PayloadCodec>,
    receive_script: redis::Script,
}

impl RedisConnector {
    /// Validate the configuration; no connection is opened until first use
    pub fn new(config: RedisConfig) -> QueueResult<Self> {
        if config.key_prefix.is_empty() {
            return Err(QueueError::Configuration(
                "Redis key prefix cannot be empty".to_string(),
            ));
        }
        if config.poll_interval.is_zero() {
            return Err(QueueError::Configuration(
                "Redis poll interval must be positive".to_string(),
            ));
        }

        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| QueueError::Configuration(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            config,
            client,
            connection: OnceCell::new(),
            codec: Arc::new(JsonCodec),
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Declare every queue listed in the configuration
    pub async fn declare_queues(&self) -> QueueResult<()> {
        for queue in &self.config.queues {
            self.create_queue(queue).await?;
        }
        Ok(())
    }

    /// Shared connection, created on first use and reused afterwards
    async fn connection(&self) -> QueueResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!(key_prefix = %self.config.key_prefix, "Opening Redis connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.config.key_prefix)
    }

    fn ready_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.config.key_prefix, queue)
    }

    fn inflight_key(&self, queue: &str) -> String {
        format!("{}:inflight", self.ready_key(queue))
    }

    fn bodies_key(&self, queue: &str) -> String {
        format!("{}:bodies", self.ready_key(queue))
    }

    fn meta_key(&self, queue: &str) -> String {
        format!("{}:meta", self.ready_key(queue))
    }

    fn receives_key(&self, queue: &str) -> String {
        format!("{}:receives", self.ready_key(queue))
    }

    fn started_key(&self, queue: &str) -> String {
        format!("{}:started", self.ready_key(queue))
    }

    async fn ensure_queue(&self, conn: &mut ConnectionManager, queue: &str) -> QueueResult<()> {
        let exists: bool = conn.sismember(self.queues_key(), queue).await?;
        if exists {
            Ok(())
        } else {
            Err(QueueError::QueueNotFound(queue.to_string()))
        }
    }

    /// One atomic receive attempt
    async fn try_receive(&self, conn: &mut ConnectionManager, queue: &str) -> QueueResult<Option<Payload>> {
        let now = Utc::now().timestamp_millis();
        let visible_at = now.saturating_add(millis(self.config.visibility_timeout));

        let received: Option<Received> = self
            .receive_script
            .key(self.ready_key(queue))
            .key(self.inflight_key(queue))
            .key(self.bodies_key(queue))
            .key(self.meta_key(queue))
            .key(self.receives_key(queue))
            .key(self.started_key(queue))
            .arg(now)
            .arg(visible_at)
            .invoke_async(conn)
            .await?;

        let Some((message_id, body, created_ms, receive_count, started_ms)) = received else {
            return Ok(None);
        };

        // an undecodable body stays in flight and is redelivered later
        let payload = self.codec.decode(&body)?.with_metadata(Metadata {
            id: receipt_handle(&message_id, receive_count),
            retries: receive_count.saturating_sub(1),
            created_on: DateTime::from_timestamp_millis(created_ms),
            first_execution_on: DateTime::from_timestamp_millis(started_ms),
        });

        debug!(queue = %queue, message_id = %message_id, receive_count, "Message received");
        Ok(Some(payload))
    }

    /// Check a receipt against the current delivery and return the message id
    async fn resolve_receipt(
        &self,
        conn: &mut ConnectionManager,
        queue: &str,
        receipt: &BrokerId,
    ) -> QueueResult<String> {
        let (message_id, receive_count) =
            parse_receipt(receipt).ok_or_else(|| QueueError::message_not_found(queue, receipt))?;

        let current: Option<u32> = conn.hget(self.receives_key(queue), message_id).await?;
        if current != Some(receive_count) {
            return Err(QueueError::message_not_found(queue, receipt));
        }
        Ok(message_id.to_string())
    }
}

fn receipt_handle(message_id: &str, receive_count: u32) -> BrokerId {
    BrokerId::from(format!("{message_id}:{receive_count}"))
}

fn parse_receipt(receipt: &BrokerId) -> Option<(&str, u32)> {
    let (message_id, count) = receipt.as_str().rsplit_once(':')?;
    if message_id.is_empty() {
        return None;
    }
    Some((message_id, count.parse().ok()?))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Sleep before the next receive attempt of a long poll, or `None` once
/// the deadline has passed
fn next_poll_sleep(remaining: Duration, poll_interval: Duration) -> Option<Duration> {
    (!remaining.is_zero()).then(|| remaining.min(poll_interval))
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("client", &"<ConnectionManager>")
            .field("key_prefix", &self.config.key_prefix)
            .field("visibility_timeout", &self.config.visibility_timeout)
            .field("poll_interval", &self.config.poll_interval)
            .field("codec", &self.codec.codec_id())
            .finish()
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn enqueue(&self, queue: &str, payload: Payload) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_queue(&mut conn, queue).await?;

        let body = self.codec.encode(&payload)?;
        let message_id = uuid::Uuid::new_v4().to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(self.bodies_key(queue), &message_id, body)
            .ignore()
            .hset(self.meta_key(queue), &message_id, Utc::now().timestamp_millis())
            .ignore()
            .rpush(self.ready_key(queue), &message_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(queue = %queue, message_id = %message_id, "Message enqueued");
        Ok(())
    }

    async fn dequeue(&self, queue: &str, wait_time: Duration) -> QueueResult<Option<Payload>> {
        let mut conn = self.connection().await?;
        self.ensure_queue(&mut conn, queue).await?;
        let deadline = Instant::now() + wait_time.min(MAX_WAIT_TIME);

        loop {
            if let Some(payload) = self.try_receive(&mut conn, queue).await? {
                return Ok(Some(payload));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(pause) = next_poll_sleep(remaining, self.config.poll_interval) else {
                return Ok(None);
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn delete(&self, queue: &str, message_id: &BrokerId) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_queue(&mut conn, queue).await?;
        let id = self.resolve_receipt(&mut conn, queue, message_id).await?;

        let _: () = redis::pipe()
            .atomic()
            .hdel(self.bodies_key(queue), &id)
            .ignore()
            .hdel(self.meta_key(queue), &id)
            .ignore()
            .hdel(self.receives_key(queue), &id)
            .ignore()
            .hdel(self.started_key(queue), &id)
            .ignore()
            .zrem(self.inflight_key(queue), &id)
            .ignore()
            .lrem(self.ready_key(queue), 0, &id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_retry_time(&self, queue: &str, message_id: &BrokerId, delay: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_queue(&mut conn, queue).await?;
        let id = self.resolve_receipt(&mut conn, queue, message_id).await?;

        let visible_at = Utc::now().timestamp_millis().saturating_add(millis(delay));
        let _: () = redis::pipe()
            .atomic()
            .lrem(self.ready_key(queue), 0, &id)
            .ignore()
            .zadd(self.inflight_key(queue), &id, visible_at)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn queues(&self) -> QueueResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let mut queues: Vec<String> = conn.smembers(self.queues_key()).await?;
        queues.sort();
        Ok(queues)
    }

    async fn create_queue(&self, queue: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let added: i64 = conn.sadd(self.queues_key(), queue).await?;
        if added == 1 {
            info!(queue = %queue, "Queue declared");
        }
        Ok(())
    }
}
