pub mod json;

use crate::{Payload, QueueResult};

pub use json::JsonCodec;

/// Wire encoding of job payloads
pub trait PayloadCodec: Send + Sync {
    /// Encode a payload into transport bytes
    fn encode(&self, payload: &Payload) -> QueueResult<Vec<u8>>;

    /// Decode transport bytes back into a payload
    fn decode(&self, bytes: &[u8]) -> QueueResult<Payload>;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;
}
