pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::job::{JobHandler, JobInstance};
use crate::{BrokerId, JobArgs, JobContext, JobId, Payload, QueueError, QueueResult};

pub use memory::{MemoryConnector, RetryCall};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisConnector};

/// Transport adapter for one concrete message-queue technology.
///
/// Every queue-addressed operation fails with [`QueueError::QueueNotFound`]
/// when the queue does not exist at the transport. Connectors never create
/// queues implicitly.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Push one payload onto `queue`
    async fn enqueue(&self, queue: &str, payload: Payload) -> QueueResult<()>;

    /// Receive one payload, blocking for up to `wait_time`.
    ///
    /// A zero `wait_time` is a single non-blocking poll. The returned payload
    /// carries `_metadata` with a fresh receipt handle.
    async fn dequeue(&self, queue: &str, wait_time: Duration) -> QueueResult<Option<Payload>>;

    /// Acknowledge one delivered message
    async fn delete(&self, queue: &str, message_id: &BrokerId) -> QueueResult<()>;

    /// Keep an undeleted message invisible for `delay`; zero makes it visible again
    async fn set_retry_time(&self, queue: &str, message_id: &BrokerId, delay: Duration) -> QueueResult<()>;

    /// Names of the queues declared at the transport
    async fn queues(&self) -> QueueResult<Vec<String>>;

    /// Declare a queue (administrative, never called by brokers or workers)
    async fn create_queue(&self, queue: &str) -> QueueResult<()>;

    /// Build the wire payload for one job call
    fn serialize_job(&self, name: &str, job_id: &JobId, args: JobArgs) -> QueueResult<Payload> {
        if name.is_empty() {
            return Err(QueueError::InvalidJobType("empty task name".to_string()));
        }
        Ok(Payload::new(name, job_id.clone(), args))
    }

    /// Rebuild a job instance and its call arguments from a delivered payload
    fn unserialize_job(&self, handler: &dyn JobHandler, queue: &str, payload: &Payload) -> QueueResult<JobInstance> {
        if handler.name() != payload.name {
            return Err(QueueError::InvalidJobType(format!(
                "payload names `{}` but handler is `{}`",
                payload.name,
                handler.name()
            )));
        }

        Ok(JobInstance {
            job: handler.build(),
            context: JobContext::from_payload(queue, payload),
            args: payload.job_args(),
        })
    }
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn enqueue(&self, queue: &str, payload: Payload) -> QueueResult<()> {
        (**self).enqueue(queue, payload).await
    }

    async fn dequeue(&self, queue: &str, wait_time: Duration) -> QueueResult<Option<Payload>> {
        (**self).dequeue(queue, wait_time).await
    }

    async fn delete(&self, queue: &str, message_id: &BrokerId) -> QueueResult<()> {
        (**self).delete(queue, message_id).await
    }

    async fn set_retry_time(&self, queue: &str, message_id: &BrokerId, delay: Duration) -> QueueResult<()> {
        (**self).set_retry_time(queue, message_id, delay).await
    }

    async fn queues(&self) -> QueueResult<Vec<String>> {
        (**self).queues().await
    }

    async fn create_queue(&self, queue: &str) -> QueueResult<()> {
        (**self).create_queue(queue).await
    }

    fn serialize_job(&self, name: &str, job_id: &JobId, args: JobArgs) -> QueueResult<Payload> {
        (**self).serialize_job(name, job_id, args)
    }

    fn unserialize_job(&self, handler: &dyn JobHandler, queue: &str, payload: &Payload) -> QueueResult<JobInstance> {
        (**self).unserialize_job(handler, queue, payload)
    }
}
