use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::broker::{ensure_dispatchable, receipt, take_queue_name, Broker, JobProducer, JobStream};
use crate::connector::Connector;
use crate::job::{Job, JobHandler, JobInstance};
use crate::{Delivery, JobArgs, JobContext, JobId, JobResult, Payload, QueueError, QueueResult};

/// Broker enqueuing through a connector and consuming a single queue
pub struct StandardBroker<C: ?Sized> {
    connector: Arc<C>,
}

impl<C: Connector + ?Sized + 'static> StandardBroker<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }
}

impl<C: ?Sized> Clone for StandardBroker<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
        }
    }
}

impl<C: ?Sized> std::fmt::Debug for StandardBroker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardBroker")
            .field("connector", &std::any::type_name::<C>())
            .finish()
    }
}

#[async_trait]
impl<C: Connector + ?Sized + 'static> JobProducer for StandardBroker<C> {
    async fn add_job<J: Job>(&self, mut args: JobArgs) -> QueueResult<JobResult> {
        ensure_dispatchable::<J>()?;

        let queue = take_queue_name(&mut args).unwrap_or_else(|| J::DEFAULT_QUEUE_NAME.to_string());
        let job_id = JobId::new();
        let name = J::task_name();

        let payload = self.connector.serialize_job(&name, &job_id, args)?;
        self.connector.enqueue(&queue, payload).await?;

        info!(job_id = %job_id, job_name = %name, queue = %queue, "Job enqueued");
        Ok(JobResult::new(job_id))
    }
}

#[async_trait]
impl<C: Connector + ?Sized + 'static> Broker for StandardBroker<C> {
    fn jobs(&self, queues: &[String], timeout: Duration) -> JobStream {
        let [queue] = queues else {
            let err = QueueError::InvalidQueueSelection(format!(
                "standard broker reads exactly one queue, got {}",
                queues.len()
            ));
            return stream::once(async move { Err(err) }).boxed();
        };

        let state = (self.connector.clone(), queue.clone());
        stream::unfold(state, move |(connector, queue)| async move {
            loop {
                match connector.dequeue(&queue, timeout).await {
                    Ok(Some(payload)) => {
                        let delivery = Delivery::new(queue.clone(), payload);
                        return Some((Ok(Some(delivery)), (connector, queue)));
                    }
                    Ok(None) if timeout.is_zero() => return Some((Ok(None), (connector, queue))),
                    Ok(None) => debug!(queue = %queue, "Long poll returned nothing"),
                    Err(e) => return Some((Err(e), (connector, queue))),
                }
            }
        })
        .boxed()
    }

    fn unserialize_job(&self, handler: &dyn JobHandler, queue: &str, payload: &Payload) -> QueueResult<JobInstance> {
        self.connector.unserialize_job(handler, queue, payload)
    }

    async fn delete_job(&self, job: &JobContext) -> QueueResult<()> {
        self.connector.delete(&job.queue_name, receipt(job)?).await
    }

    async fn set_retry_time(&self, job: &JobContext, delay: Duration) -> QueueResult<()> {
        self.connector.set_retry_time(&job.queue_name, receipt(job)?, delay).await
    }

    async fn queues(&self) -> QueueResult<Vec<String>> {
        self.connector.queues().await
    }
}
