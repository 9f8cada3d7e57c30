use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::job::JobInstance;
use crate::{JobError, JobId};

/// Everything known about one failed execution attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub job_id: Option<JobId>,
    pub job_name: String,
    pub queue: String,
    pub retries: u32,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub message: String,
    /// Error with its source chain
    pub trace: String,
}

impl ErrorReport {
    pub fn new(instance: &JobInstance, error: &JobError) -> Self {
        Self {
            job_id: instance.context.id.clone(),
            job_name: instance.job.name(),
            queue: instance.context.queue_name.clone(),
            retries: instance.context.retries,
            args: instance.args.args.clone(),
            kwargs: instance.args.kwargs.clone(),
            message: error.to_string(),
            trace: error.trace(),
        }
    }
}

/// Sink for execution failures, e.g. an exception tracker
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Logs every report at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: &ErrorReport) {
        let args = Value::Array(report.args.clone());
        let kwargs = Value::Object(report.kwargs.clone());
        error!(
            job_id = report.job_id.as_ref().map(|id| id.as_str()).unwrap_or_default(),
            job_name = %report.job_name,
            queue = %report.queue,
            retries = report.retries,
            args = %args,
            kwargs = %kwargs,
            error = %report.message,
            trace = %report.trace,
            "Error executing job"
        );
    }
}
