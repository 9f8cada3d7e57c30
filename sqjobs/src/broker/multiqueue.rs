use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broker::{Broker, JobProducer, JobStream, StandardBroker};
use crate::config::DEFAULT_POLLING_INTERVAL;
use crate::connector::Connector;
use crate::job::{Job, JobHandler, JobInstance};
use crate::{Delivery, JobArgs, JobContext, JobResult, Payload, QueueResult};

/// Broker consuming several queues in round-robin order.
///
/// Every queue gets one non-blocking poll per sweep. A queue found empty is
/// skipped until `polling_interval` has passed, and a sweep that delivers
/// nothing is followed by a `polling_interval` sleep.
pub struct MultiQueueBroker<C: ?Sized> {
    inner: StandardBroker<C>,
    polling_interval: Duration,
}

impl<C: Connector + ?Sized + 'static> MultiQueueBroker<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self {
            inner: StandardBroker::new(connector),
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn connector(&self) -> &Arc<C> {
        self.inner.connector()
    }
}

impl<C: ?Sized> std::fmt::Debug for MultiQueueBroker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiQueueBroker")
            .field("connector", &std::any::type_name::<C>())
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

/// Private round-robin bookkeeping of one `jobs` stream
struct Sweep<C: ?Sized> {
    connector: Arc<C>,
    queues: Vec<String>,
    /// When each queue was last found empty; `None` means poll it
    last_checked: Vec<Option<Instant>>,
    cursor: usize,
    delivered_this_sweep: bool,
    polling_interval: Duration,
}

impl<C: Connector + ?Sized> Sweep<C> {
    fn new(connector: Arc<C>, queues: Vec<String>, polling_interval: Duration) -> Self {
        Self {
            last_checked: vec![None; queues.len()],
            connector,
            queues,
            cursor: 0,
            delivered_this_sweep: false,
            polling_interval,
        }
    }

    async fn next_delivery(&mut self) -> QueueResult<Delivery> {
        loop {
            if self.cursor == self.queues.len() {
                self.cursor = 0;
                if !self.delivered_this_sweep {
                    trace!(polling_interval = ?self.polling_interval, "All queues idle");
                    tokio::time::sleep(self.polling_interval).await;
                }
                self.delivered_this_sweep = false;
            }

            let idx = self.cursor;
            self.cursor += 1;

            if let Some(checked) = self.last_checked[idx] {
                if checked.elapsed() < self.polling_interval {
                    continue;
                }
            }

            // a long poll here would starve the other queues
            let polled = self.connector.dequeue(&self.queues[idx], Duration::ZERO).await;
            match polled {
                Ok(Some(payload)) => {
                    self.last_checked[idx] = None;
                    self.delivered_this_sweep = true;
                    return Ok(Delivery::new(self.queues[idx].clone(), payload));
                }
                Ok(None) => {
                    debug!(queue = %self.queues[idx], "Queue empty, backing off");
                    self.last_checked[idx] = Some(Instant::now());
                }
                Err(e) => {
                    self.last_checked[idx] = Some(Instant::now());
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<C: Connector + ?Sized + 'static> JobProducer for MultiQueueBroker<C> {
    async fn add_job<J: Job>(&self, args: JobArgs) -> QueueResult<JobResult> {
        self.inner.add_job::<J>(args).await
    }
}

#[async_trait]
impl<C: Connector + ?Sized + 'static> Broker for MultiQueueBroker<C> {
    /// `timeout` is ignored: every poll is non-blocking
    fn jobs(&self, queues: &[String], _timeout: Duration) -> JobStream {
        if queues.is_empty() {
            return stream::empty().boxed();
        }

        let sweep = Sweep::new(self.inner.connector().clone(), queues.to_vec(), self.polling_interval);
        stream::unfold(sweep, |mut sweep| async move {
            let item = sweep.next_delivery().await.map(Some);
            Some((item, sweep))
        })
        .boxed()
    }

    fn unserialize_job(&self, handler: &dyn JobHandler, queue: &str, payload: &Payload) -> QueueResult<JobInstance> {
        self.inner.unserialize_job(handler, queue, payload)
    }

    async fn delete_job(&self, job: &JobContext) -> QueueResult<()> {
        self.inner.delete_job(job).await
    }

    async fn set_retry_time(&self, job: &JobContext, delay: Duration) -> QueueResult<()> {
        self.inner.set_retry_time(job, delay).await
    }

    async fn queues(&self) -> QueueResult<Vec<String>> {
        self.inner.queues().await
    }
}
