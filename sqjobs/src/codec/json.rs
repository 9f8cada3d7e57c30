use crate::{codec::PayloadCodec, Payload, QueueError, QueueResult};

/// JSON codec for job payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, payload: &Payload) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| QueueError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> QueueResult<Payload> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::InvalidPayload(e.to_string()))
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}
