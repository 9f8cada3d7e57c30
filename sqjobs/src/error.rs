use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type returned by job hooks
pub type HookResult<T> = Result<T, JobError>;

/// Infrastructure errors raised by brokers and connectors
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Invalid job type: {0}")]
    InvalidJobType(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message {message_id} not found in queue {queue}")]
    MessageNotFound { queue: String, message_id: String },

    #[error("Unregistered task: {0}")]
    UnregisteredTask(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid queue selection: {0}")]
    InvalidQueueSelection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn message_not_found(queue: &str, message_id: impl ToString) -> Self {
        Self::MessageNotFound {
            queue: queue.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors raised from job logic and lifecycle hooks
#[derive(Error, Debug)]
pub enum JobError {
    #[error("missing argument `{0}`")]
    MissingArgument(String),

    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// Create a plain failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Render the error together with its source chain and, for `anyhow`
    /// errors, the captured backtrace.
    pub fn trace(&self) -> String {
        match self {
            Self::Other(err) => format!("{err:?}"),
            _ => {
                let mut trace = self.to_string();
                let mut source = std::error::Error::source(self);
                while let Some(cause) = source {
                    trace.push_str("\n\nCaused by:\n    ");
                    trace.push_str(&cause.to_string());
                    source = cause.source();
                }
                trace
            }
        }
    }
}
