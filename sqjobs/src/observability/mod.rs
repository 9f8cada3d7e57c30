pub mod metrics;
pub mod report;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{WorkerStats, WorkerStatsSnapshot};
pub use report::{ErrorReport, ErrorReporter, TracingReporter};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_tracing, LogFormat};
