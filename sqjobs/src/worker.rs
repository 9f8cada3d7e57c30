use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::broker::Broker;
use crate::config::QueueConfig;
use crate::execution::{build_instance, guarded, retry_delay, run_attempt, Attempt};
use crate::job::{Job, JobInstance, JobRegistry};
use crate::observability::{ErrorReport, ErrorReporter, TracingReporter, WorkerStats};
use crate::{Delivery, JobError, QueueError, QueueResult};

/// Terminal state of one dispatched payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ran cleanly, message deleted
    Completed,
    /// Job asked for another attempt; carries the explicit delay if any
    Retried(Option<Duration>),
    /// Execution failed; carries the explicit delay if any. Always `None`
    /// when `on_success` failed after the message was deleted.
    Failed(Option<Duration>),
    /// No job registered under the payload's name; message untouched
    Unregistered,
    /// Payload could not be turned into a job instance; message untouched
    Rejected,
}

/// Consume-execute-acknowledge loop over one broker.
///
/// Payloads are handled one at a time. Nothing that happens while handling a
/// payload escapes [`Worker::process`]; scale out by running more workers
/// against the same queues.
pub struct Worker<B: ?Sized> {
    broker: Arc<B>,
    queues: Vec<String>,
    registry: JobRegistry,
    config: QueueConfig,
    reporter: Arc<dyn ErrorReporter>,
    stats: Arc<WorkerStats>,
}

impl<B: Broker + ?Sized + 'static> Worker<B> {
    pub fn new<I, S>(broker: Arc<B>, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            broker,
            queues: queues.into_iter().map(Into::into).collect(),
            registry: JobRegistry::new(),
            config: QueueConfig::default(),
            reporter: Arc::new(TracingReporter),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Register a job type for processing
    pub fn register_job<J: Job + Default>(&mut self) -> &mut Self {
        self.registry.register::<J>();
        self
    }

    /// Register a job type built by `factory` for every payload
    pub fn register_factory<J, F>(&mut self, factory: F) -> &mut Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.registry.register_factory(factory);
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run the dispatch loop. With `forever` unset at most one element of
    /// the job stream is handled.
    pub async fn execute(&self, forever: bool) {
        self.dispatch(forever, std::future::pending::<()>()).await
    }

    /// Run the loop on a tokio task
    pub fn spawn(self) -> WorkerHandle
    where
        B: Sized,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let stats = self.stats.clone();
        let join_handle = tokio::spawn(async move {
            self.dispatch(true, async {
                let _ = shutdown_rx.await;
            })
            .await
        });

        WorkerHandle {
            shutdown_tx,
            join_handle,
            stats,
        }
    }

    /// Pull and handle deliveries until the stream ends, `forever` is unset
    /// and one element was handled, or `shutdown` resolves. A payload already
    /// being handled is finished first.
    async fn dispatch<S>(&self, forever: bool, shutdown: S)
    where
        S: std::future::Future<Output = ()>,
    {
        let mut jobs = self.broker.jobs(&self.queues, self.config.wait_time);
        info!(queues = ?self.queues, jobs = ?self.registry.registered_types(), "Worker started");
        tokio::pin!(shutdown);

        loop {
            let item = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Worker shutdown requested");
                    break;
                }
                item = jobs.next() => item,
            };

            let Some(item) = item else {
                break;
            };
            self.handle(item).await;
            if !forever {
                break;
            }
        }

        info!("Worker stopped");
    }

    async fn handle(&self, item: QueueResult<Option<Delivery>>) {
        match item {
            Ok(Some(delivery)) => {
                self.process(delivery).await;
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.record_fetch_error();
                error!(error = %e, "Error fetching job");
                tokio::time::sleep(self.config.error_backoff).await;
            }
        }
    }

    /// Handle one delivered payload end to end
    pub async fn process(&self, delivery: Delivery) -> Disposition {
        let Delivery { queue_name, payload } = delivery;
        self.stats.record_received();

        let span = info_span!(
            "job",
            job_name = %payload.name,
            queue = %queue_name,
            job_id = field::Empty,
            retries = field::Empty,
        );

        async move {
            let Some(handler) = self.registry.get(&payload.name) else {
                self.stats.record_unregistered();
                let err = QueueError::UnregisteredTask(payload.name.clone());
                error!(error = %err, "Unregistered task");
                return Disposition::Unregistered;
            };

            let built = build_instance(|| self.broker.unserialize_job(handler.as_ref(), &queue_name, &payload));
            let mut instance = match built {
                Ok(instance) => instance,
                Err(e) => {
                    self.stats.record_rejected();
                    error!(error = %e, "Error building job");
                    return Disposition::Rejected;
                }
            };

            let span = Span::current();
            if let Some(id) = &instance.context.id {
                span.record("job_id", id.as_str());
            }
            span.record("retries", instance.context.retries);
            debug!("Running job");

            match run_attempt(&mut instance).await {
                Attempt::Completed(_) => self.complete(&mut instance).await,
                Attempt::RetryRequested => self.retry_requested(&mut instance).await,
                Attempt::Failed(e) => self.fail(&mut instance, e).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn complete(&self, instance: &mut JobInstance) -> Disposition {
        if let Err(e) = self.broker.delete_job(&instance.context).await {
            return self.fail(instance, e.into()).await;
        }

        match guarded("on_success", instance.job.on_success(&instance.context, &instance.args)).await {
            Ok(()) => {
                self.stats.record_completed();
                info!("Job completed");
                Disposition::Completed
            }
            // the message is gone, there is nothing left to retry
            Err(e) => {
                self.report_failure(instance, &e).await;
                self.stats.record_failed();
                Disposition::Failed(None)
            }
        }
    }

    async fn retry_requested(&self, instance: &mut JobInstance) -> Disposition {
        if let Err(e) = guarded("on_retry", instance.job.on_retry(&instance.context)).await {
            warn!(error = %e, "on_retry hook failed");
        }

        let delay = retry_delay(instance);
        self.schedule_retry(instance, delay).await;
        self.stats.record_retried();
        info!(delay = ?delay, "Job asked for a retry");
        Disposition::Retried(delay)
    }

    async fn fail(&self, instance: &mut JobInstance, error: JobError) -> Disposition {
        self.report_failure(instance, &error).await;

        let delay = retry_delay(instance);
        self.schedule_retry(instance, delay).await;
        self.stats.record_failed();
        Disposition::Failed(delay)
    }

    async fn report_failure(&self, instance: &mut JobInstance, error: &JobError) {
        if let Err(e) = guarded("on_failure", instance.job.on_failure(&instance.context, error)).await {
            warn!(error = %e, "on_failure hook failed");
        }
        self.reporter.report(&ErrorReport::new(instance, error));
    }

    async fn schedule_retry(&self, instance: &JobInstance, delay: Option<Duration>) {
        if let Err(e) = self.broker.retry(&instance.context, delay).await {
            error!(error = %e, "Error scheduling retry");
        }
    }
}

impl<B: ?Sized> std::fmt::Debug for Worker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("broker", &std::any::type_name::<B>())
            .field("queues", &self.queues)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Handle for managing a spawned worker
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    /// Stop the loop after the payload in progress and wait for it to exit
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}
