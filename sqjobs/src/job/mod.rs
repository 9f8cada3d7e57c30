pub mod registry;

pub use registry::{JobHandler, JobRegistry};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{BrokerId, HookResult, JobArgs, JobError, JobId, Payload};

/// Queue used when a job definition does not name one
pub const DEFAULT_QUEUE_NAME: &str = "sqjobs";

/// A unit of work definition.
///
/// A fresh value is built for every delivered payload and dropped once the
/// worker has deleted or retried the message, so implementations may keep
/// per-attempt state in `self`.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Adder;
///
/// #[async_trait::async_trait]
/// impl Job for Adder {
///     const NAME: Option<&'static str> = Some("adder");
///     const RETRY_TIME: Option<Duration> = Some(Duration::from_secs(10));
///
///     async fn run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
///         let num1: i64 = args.get(0, "num1")?;
///         let num2: i64 = args.get(1, "num2")?;
///         Outcome::success(num1 + num2)
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Task name used for dispatch; `None` falls back to the module-qualified type name
    const NAME: Option<&'static str> = None;

    /// Queue `add_job` targets unless the caller overrides it
    const DEFAULT_QUEUE_NAME: &'static str = DEFAULT_QUEUE_NAME;

    /// Abstract definitions are never registered for execution nor enqueued
    const ABSTRACT: bool = false;

    /// Re-delivery delay after a failure; `None` keeps the queue default
    const RETRY_TIME: Option<Duration> = None;

    /// Name this definition is registered and dispatched under
    fn task_name() -> String {
        Self::NAME
            .map(str::to_string)
            .unwrap_or_else(default_task_name::<Self>)
    }

    async fn pre_run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome>;

    /// Runs after a successful `run`; `ctx.result` holds the computed value
    async fn post_run(&mut self, _ctx: &mut JobContext, _args: &JobArgs) -> HookResult<()> {
        Ok(())
    }

    async fn on_success(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<()> {
        Ok(())
    }

    async fn on_failure(&mut self, _ctx: &JobContext, _error: &JobError) -> HookResult<()> {
        Ok(())
    }

    async fn on_retry(&mut self, _ctx: &JobContext) -> HookResult<()> {
        Ok(())
    }

    /// Delay before the next delivery attempt. `None` defers to the queue's
    /// own visibility timeout.
    fn next_retry_time(&self, _ctx: &JobContext) -> Option<Duration> {
        Self::RETRY_TIME
    }
}

/// Module-qualified type name in `module::path|Type` form
pub fn default_task_name<J: ?Sized>() -> String {
    let full = std::any::type_name::<J>();
    let base_end = full.find('<').unwrap_or(full.len());

    match full[..base_end].rfind("::") {
        Some(idx) => format!("{}|{}", &full[..idx], &full[idx + 2..]),
        None => full.to_string(),
    }
}

/// Result of running a job
#[derive(Debug)]
pub enum Outcome {
    /// Finished; the value becomes the job's `result`
    Success(Value),
    /// Job logic asked for another attempt
    RetryRequested,
    /// Job logic gave up on this attempt
    Failed(JobError),
}

impl Outcome {
    /// Successful outcome carrying a serializable result
    pub fn success(value: impl Serialize) -> HookResult<Self> {
        serde_json::to_value(value)
            .map(Self::Success)
            .map_err(|e| JobError::failed(format!("job result is not serializable: {e}")))
    }

    /// Successful outcome without a result
    pub fn done() -> Self {
        Self::Success(Value::Null)
    }

    pub fn retry() -> Self {
        Self::RetryRequested
    }
}

/// Per-attempt state of a job instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    pub id: Option<JobId>,
    pub broker_id: Option<BrokerId>,
    pub queue_name: String,
    pub retries: u32,
    pub created_on: Option<DateTime<Utc>>,
    pub first_execution_on: Option<DateTime<Utc>>,
    pub result: Option<Value>,
}

impl JobContext {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    /// Copy identifiers and delivery metadata out of a dequeued payload
    pub fn from_payload(queue_name: impl Into<String>, payload: &Payload) -> Self {
        let metadata = payload.metadata.as_ref();

        Self {
            id: payload
                .id
                .clone()
                .or_else(|| metadata.map(|m| JobId::from(m.id.as_str()))),
            broker_id: metadata.map(|m| m.id.clone()),
            queue_name: queue_name.into(),
            retries: metadata.map(|m| m.retries).unwrap_or(0),
            created_on: metadata.and_then(|m| m.created_on),
            first_execution_on: metadata.and_then(|m| m.first_execution_on),
            result: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Object-safe view of a [`Job`], used by registries and workers
#[async_trait]
pub trait DynJob: Send + Sync {
    fn name(&self) -> String;

    async fn pre_run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<()>;

    async fn run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome>;

    async fn post_run(&mut self, ctx: &mut JobContext, args: &JobArgs) -> HookResult<()>;

    async fn on_success(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<()>;

    async fn on_failure(&mut self, ctx: &JobContext, error: &JobError) -> HookResult<()>;

    async fn on_retry(&mut self, ctx: &JobContext) -> HookResult<()>;

    fn next_retry_time(&self, ctx: &JobContext) -> Option<Duration>;
}

#[async_trait]
impl<J: Job> DynJob for J {
    fn name(&self) -> String {
        <J as Job>::task_name()
    }

    async fn pre_run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<()> {
        Job::pre_run(self, ctx, args).await
    }

    async fn run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
        Job::run(self, ctx, args).await
    }

    async fn post_run(&mut self, ctx: &mut JobContext, args: &JobArgs) -> HookResult<()> {
        Job::post_run(self, ctx, args).await
    }

    async fn on_success(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<()> {
        Job::on_success(self, ctx, args).await
    }

    async fn on_failure(&mut self, ctx: &JobContext, error: &JobError) -> HookResult<()> {
        Job::on_failure(self, ctx, error).await
    }

    async fn on_retry(&mut self, ctx: &JobContext) -> HookResult<()> {
        Job::on_retry(self, ctx).await
    }

    fn next_retry_time(&self, ctx: &JobContext) -> Option<Duration> {
        Job::next_retry_time(self, ctx)
    }
}

/// A job built from a payload, ready to execute
pub struct JobInstance {
    pub job: Box<dyn DynJob>,
    pub context: JobContext,
    pub args: JobArgs,
}

impl std::fmt::Debug for JobInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInstance")
            .field("job", &self.job.name())
            .field("context", &self.context)
            .field("args", &self.args)
            .finish()
    }
}
