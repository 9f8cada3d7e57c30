pub mod eager;
pub mod multiqueue;
pub mod standard;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::job::{Job, JobHandler, JobInstance};
use crate::{BrokerId, Delivery, JobArgs, JobContext, JobResult, Payload, QueueError, QueueResult};

pub use eager::EagerBroker;
pub use multiqueue::MultiQueueBroker;
pub use standard::StandardBroker;

/// Keyword argument that redirects `add_job` to another queue
pub const QUEUE_NAME_KWARG: &str = "queue_name";

/// Lazy, unbounded sequence of deliveries.
///
/// `Ok(None)` only shows up in non-blocking mode and must be skipped by the
/// consumer. Dropping the stream stops consumption.
pub type JobStream = BoxStream<'static, QueueResult<Option<Delivery>>>;

/// Consumer side of a broker, as driven by a worker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliveries read from `queues`; each element is one dequeue
    fn jobs(&self, queues: &[String], timeout: Duration) -> JobStream;

    /// Rebuild a job instance from a delivered payload
    fn unserialize_job(&self, handler: &dyn JobHandler, queue: &str, payload: &Payload) -> QueueResult<JobInstance>;

    /// Acknowledge the message behind `job`
    async fn delete_job(&self, job: &JobContext) -> QueueResult<()>;

    /// Keep the message behind `job` invisible for `delay`
    async fn set_retry_time(&self, job: &JobContext, delay: Duration) -> QueueResult<()>;

    /// Schedule another attempt. `None` leaves the queue's own redelivery
    /// delay in charge and touches nothing.
    async fn retry(&self, job: &JobContext, delay: Option<Duration>) -> QueueResult<()> {
        match delay {
            Some(delay) => self.set_retry_time(job, delay).await,
            None => Ok(()),
        }
    }

    /// Queues declared at the transport
    async fn queues(&self) -> QueueResult<Vec<String>>;
}

/// Producer side of a broker
#[async_trait]
pub trait JobProducer: Send + Sync {
    /// Dispatch one call of `J`.
    ///
    /// A string `queue_name` keyword overrides `J::DEFAULT_QUEUE_NAME` and is
    /// not forwarded to the job.
    async fn add_job<J: Job>(&self, args: JobArgs) -> QueueResult<JobResult>;
}

/// Reject job definitions that may never be dispatched
pub(crate) fn ensure_dispatchable<J: Job>() -> QueueResult<()> {
    if J::ABSTRACT {
        return Err(QueueError::InvalidJobType(format!(
            "{} is abstract",
            std::any::type_name::<J>()
        )));
    }
    Ok(())
}

/// Pull a string `queue_name` keyword out of `args`
pub(crate) fn take_queue_name(args: &mut JobArgs) -> Option<String> {
    match args.kwargs.get(QUEUE_NAME_KWARG) {
        Some(Value::String(_)) => match args.take_kwarg(QUEUE_NAME_KWARG) {
            Some(Value::String(queue)) => Some(queue),
            _ => None,
        },
        _ => None,
    }
}

/// Receipt handle of the delivery behind `job`
pub(crate) fn receipt(job: &JobContext) -> QueueResult<&BrokerId> {
    job.broker_id.as_ref().ok_or_else(|| {
        QueueError::InvalidPayload(format!(
            "job {} carries no broker id",
            job.id.as_ref().map(|id| id.as_str()).unwrap_or("<unknown>")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_queue_name() {
        let mut args = JobArgs::new().arg(1).kwarg("queue_name", "emails").kwarg("num2", 2);
        assert_eq!(take_queue_name(&mut args), Some("emails".to_string()));
        assert!(!args.kwargs.contains_key("queue_name"));
        assert_eq!(args.kwargs.get("num2"), Some(&json!(2)));

        let mut args = JobArgs::new().kwarg("queue_name", 3);
        assert_eq!(take_queue_name(&mut args), None);
        assert_eq!(args.kwargs.get("queue_name"), Some(&json!(3)));
    }

    #[test]
    fn test_receipt_requires_broker_id() {
        let job = JobContext::new("default");
        assert!(matches!(receipt(&job), Err(QueueError::InvalidPayload(_))));

        let job = JobContext {
            broker_id: Some(BrokerId::from("r-1")),
            ..JobContext::new("default")
        };
        assert_eq!(receipt(&job).unwrap().as_str(), "r-1");
    }
}
