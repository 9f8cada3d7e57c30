use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// Handle returned by `add_job`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,

    /// Computed result, only known when the broker executes eagerly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobResult {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id, result: None }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}
