use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{ensure_dispatchable, take_queue_name, JobProducer};
use crate::execution::{guarded, run_attempt, Attempt};
use crate::job::{Job, JobInstance, JobRegistry};
use crate::observability::{ErrorReport, ErrorReporter, TracingReporter};
use crate::{JobArgs, JobContext, JobError, JobId, JobResult, QueueError, QueueResult};

/// Broker running jobs in-process at `add_job` time, for tests and local
/// development. Nothing is enqueued and no retry is ever scheduled.
pub struct EagerBroker {
    registry: JobRegistry,
    reporter: Arc<dyn ErrorReporter>,
}

impl EagerBroker {
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn register_job<J: Job + Default>(&mut self) -> &mut Self {
        self.registry.register::<J>();
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    async fn fail(&self, instance: &mut JobInstance, error: JobError) {
        if let Err(e) = guarded("on_failure", instance.job.on_failure(&instance.context, &error)).await {
            warn!(error = %e, "on_failure hook failed");
        }
        self.reporter.report(&ErrorReport::new(instance, &error));
    }
}

impl Default for EagerBroker {
    fn default() -> Self {
        Self::new(JobRegistry::new())
    }
}

impl std::fmt::Debug for EagerBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerBroker")
            .field("registry", &self.registry)
            .finish()
    }
}

#[async_trait]
impl JobProducer for EagerBroker {
    /// Runs the full lifecycle. The result is `None` when the job failed or
    /// asked for a retry.
    async fn add_job<J: Job>(&self, mut args: JobArgs) -> QueueResult<JobResult> {
        ensure_dispatchable::<J>()?;

        let name = J::task_name();
        let handler = self
            .registry
            .get(&name)
            .ok_or_else(|| QueueError::InvalidJobType(format!("{name} is not registered")))?;

        let queue = take_queue_name(&mut args).unwrap_or_else(|| J::DEFAULT_QUEUE_NAME.to_string());
        let job_id = JobId::new();
        let now = Utc::now();

        let mut instance = JobInstance {
            job: handler.build(),
            context: JobContext {
                created_on: Some(now),
                first_execution_on: Some(now),
                ..JobContext::new(queue).with_id(job_id.clone())
            },
            args,
        };

        let result = match run_attempt(&mut instance).await {
            Attempt::Completed(value) => {
                match guarded("on_success", instance.job.on_success(&instance.context, &instance.args)).await {
                    Ok(()) => Some(value),
                    Err(e) => {
                        self.fail(&mut instance, e).await;
                        None
                    }
                }
            }
            Attempt::RetryRequested => {
                if let Err(e) = guarded("on_retry", instance.job.on_retry(&instance.context)).await {
                    warn!(error = %e, "on_retry hook failed");
                }
                warn!(job_id = %job_id, job_name = %name, "Eager job asked for a retry, not rescheduled");
                None
            }
            Attempt::Failed(e) => {
                self.fail(&mut instance, e).await;
                None
            }
        };

        info!(job_id = %job_id, job_name = %name, "Job executed eagerly");
        let handle = JobResult::new(job_id);
        Ok(match result {
            Some(value) => handle.with_result(value),
            None => handle,
        })
    }
}
