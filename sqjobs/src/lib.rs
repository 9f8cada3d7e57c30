//! # sqjobs: typed background jobs over simple message queues
//!
//! Jobs are plain Rust types implementing [`Job`]. Producers enqueue them by
//! task name through a broker; workers fetch payloads, rebuild the job from a
//! [`JobRegistry`] and run its lifecycle with at-least-once delivery:
//! a message is deleted only after a successful run, and failures are
//! re-delivered after the job's retry time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqjobs::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Adder;
//!
//! #[async_trait]
//! impl Job for Adder {
//!     const NAME: Option<&'static str> = Some("adder");
//!
//!     async fn run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
//!         Outcome::success(args.get::<i64>(0, "num1")? + args.get::<i64>(1, "num2")?)
//!     }
//! }
//!
//! let connector = Arc::new(MemoryConnector::new().with_queues(["sqjobs"]));
//! let broker = Arc::new(StandardBroker::new(connector));
//! broker.add_job::<Adder>(JobArgs::new().arg(2).arg(3)).await?;
//!
//! let mut worker = Worker::new(broker, ["sqjobs"]);
//! worker.register_job::<Adder>();
//! let handle = worker.spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod broker;
pub mod codec;
pub mod config;
pub mod connector;
pub mod error;
pub mod execution;
pub mod job;
pub mod observability;
pub mod types;
pub mod worker;

pub use error::{HookResult, JobError, QueueError, QueueResult};
pub use types::{BrokerId, Delivery, JobArgs, JobId, JobResult, Metadata, Payload};
pub use job::{DynJob, Job, JobContext, JobHandler, JobInstance, JobRegistry, Outcome, DEFAULT_QUEUE_NAME};
pub use codec::{JsonCodec, PayloadCodec};
pub use connector::{Connector, MemoryConnector, RetryCall};
pub use broker::{Broker, EagerBroker, JobProducer, JobStream, MultiQueueBroker, StandardBroker};
pub use worker::{Disposition, Worker, WorkerHandle};
pub use config::QueueConfig;

// Observability exports
pub use observability::{ErrorReport, ErrorReporter, TracingReporter, WorkerStats, WorkerStatsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_tracing, LogFormat};

// Connector implementations
#[cfg(feature = "redis")]
pub use connector::{RedisConfig, RedisConnector};

/// Everything needed to define jobs, enqueue them and run a worker
pub mod prelude {
    pub use crate::{Broker, Connector, Job, JobProducer, Worker};

    pub use crate::{HookResult, JobArgs, JobContext, JobError, JobId, JobResult, Outcome, QueueResult};

    pub use crate::{EagerBroker, MemoryConnector, MultiQueueBroker, StandardBroker};

    pub use crate::{JobRegistry, QueueConfig};

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisConnector};

    pub use async_trait::async_trait;
}
