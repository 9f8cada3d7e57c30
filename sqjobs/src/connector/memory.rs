use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::{JsonCodec, PayloadCodec};
use crate::connector::Connector;
use crate::{BrokerId, Metadata, Payload, QueueError, QueueResult};

/// Default time a received message stays hidden from other consumers
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Entries kept in each of the delete and retry call logs
pub const CALL_LOG_CAPACITY: usize = 1024;

/// Longest delay applied to a visibility deadline, about thirty years
const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, capped instead of overflowing
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now + delay.min(MAX_DELAY)
}

fn record<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == CALL_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

/// One `set_retry_time` call observed by the connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCall {
    pub queue: String,
    pub message_id: BrokerId,
    pub delay: Duration,
}

struct StoredMessage {
    body: Vec<u8>,
    receive_count: u32,
    created_on: DateTime<Utc>,
    first_execution_on: Option<DateTime<Utc>>,
    visible_at: Instant,
    receipt: Option<BrokerId>,
}

#[derive(Default)]
struct MemoryQueue {
    messages: VecDeque<StoredMessage>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn find_receipt(&self, receipt: &BrokerId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.messages.iter().map(|m| m.visible_at).min()
    }
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, MemoryQueue>,
    deleted: VecDeque<(String, BrokerId)>,
    retry_calls: VecDeque<RetryCall>,
}

/// In-process transport for testing and embedding.
///
/// Emulates the parts of a hosted queue the worker relies on: declared
/// queues, a visibility timeout, receive counts and per-delivery receipt
/// handles. Receipts issued for an earlier delivery stop working as soon as
/// the message is delivered again.
pub struct MemoryConnector {
    state: Mutex<MemoryState>,
    codec: Arc<dyn PayloadCodec>,
    visibility_timeout: Duration,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            codec: Arc::new(JsonCodec),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Declare queues up front
    pub fn with_queues<I, S>(self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            for queue in queues {
                state.queues.entry(queue.into()).or_default();
            }
        }
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Messages still stored in `queue`, visible or in flight
    pub fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    /// Decoded payloads stored in `queue`, in enqueue order
    pub fn peek(&self, queue: &str) -> QueueResult<Vec<Payload>> {
        let state = self.state.lock();
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        q.messages.iter().map(|m| self.codec.decode(&m.body)).collect()
    }

    /// Latest successful `delete` calls, oldest first, at most
    /// [`CALL_LOG_CAPACITY`]
    pub fn deleted(&self) -> Vec<(String, BrokerId)> {
        self.state.lock().deleted.iter().cloned().collect()
    }

    /// Latest successful `set_retry_time` calls, oldest first, at most
    /// [`CALL_LOG_CAPACITY`]
    pub fn retry_calls(&self) -> Vec<RetryCall> {
        self.state.lock().retry_calls.iter().cloned().collect()
    }

    fn try_receive(&self, queue: &str) -> QueueResult<Option<Payload>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let Some(message) = q.messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let decoded = self.codec.decode(&message.body)?;
        let receipt = BrokerId::from(uuid::Uuid::new_v4().to_string());
        message.receive_count += 1;
        message.visible_at = deadline_after(now, self.visibility_timeout);
        message.receipt = Some(receipt.clone());
        let first_execution_on = *message.first_execution_on.get_or_insert_with(Utc::now);

        let payload = decoded.with_metadata(Metadata {
            id: receipt,
            retries: message.receive_count - 1,
            created_on: Some(message.created_on),
            first_execution_on: Some(first_execution_on),
        });

        debug!(queue = %queue, receive_count = message.receive_count, "Message received");
        Ok(Some(payload))
    }

    /// Wakeup handle of `queue` plus the earliest instant one of its
    /// in-flight messages turns visible again
    fn wait_state(&self, queue: &str) -> QueueResult<(Arc<Notify>, Option<Instant>)> {
        let state = self.state.lock();
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
        Ok((q.notify.clone(), q.next_visible_at()))
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let mut queues: Vec<_> = state.queues.keys().cloned().collect();
        queues.sort();
        f.debug_struct("MemoryConnector")
            .field("queues", &queues)
            .field("codec", &self.codec.codec_id())
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn enqueue(&self, queue: &str, payload: Payload) -> QueueResult<()> {
        let body = self.codec.encode(&payload)?;
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        q.messages.push_back(StoredMessage {
            body,
            receive_count: 0,
            created_on: Utc::now(),
            first_execution_on: None,
            visible_at: Instant::now(),
            receipt: None,
        });
        q.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, wait_time: Duration) -> QueueResult<Option<Payload>> {
        let deadline = deadline_after(Instant::now(), wait_time);

        loop {
            let (notify, next_visible) = self.wait_state(queue)?;
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.try_receive(queue)? {
                return Ok(Some(payload));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, queue: &str, message_id: &BrokerId) -> QueueResult<()> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let idx = q
            .find_receipt(message_id)
            .ok_or_else(|| QueueError::message_not_found(queue, message_id))?;
        q.messages.remove(idx);

        record(&mut state.deleted, (queue.to_string(), message_id.clone()));
        Ok(())
    }

    async fn set_retry_time(&self, queue: &str, message_id: &BrokerId, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let idx = q
            .find_receipt(message_id)
            .ok_or_else(|| QueueError::message_not_found(queue, message_id))?;
        q.messages[idx].visible_at = deadline_after(Instant::now(), delay);
        q.notify.notify_waiters();

        record(
            &mut state.retry_calls,
            RetryCall {
                queue: queue.to_string(),
                message_id: message_id.clone(),
                delay,
            },
        );
        Ok(())
    }

    async fn queues(&self) -> QueueResult<Vec<String>> {
        let mut queues: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        queues.sort();
        Ok(queues)
    }

    async fn create_queue(&self, queue: &str) -> QueueResult<()> {
        self.state.lock().queues.entry(queue.to_string()).or_default();
        Ok(())
    }
}
