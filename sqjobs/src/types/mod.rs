pub mod args;
pub mod ids;
pub mod payload;
pub mod result;

pub use args::JobArgs;
pub use ids::{BrokerId, JobId};
pub use payload::{Delivery, Metadata, Payload};
pub use result::JobResult;
