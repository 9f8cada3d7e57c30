use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{BrokerId, JobArgs, JobId};

/// Wire-level representation of one job dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Job id assigned at enqueue time
    #[serde(default, alias = "job_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,

    /// Task name used for dispatch
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub kwargs: Map<String, Value>,

    /// Delivery metadata, attached by the connector on dequeue
    #[serde(rename = "_metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Payload {
    pub fn new(name: impl Into<String>, job_id: JobId, args: JobArgs) -> Self {
        Self {
            id: Some(job_id),
            name: name.into(),
            args: args.args,
            kwargs: args.kwargs,
            metadata: None,
        }
    }

    /// Attach delivery metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Call arguments carried by this payload
    pub fn job_args(&self) -> JobArgs {
        JobArgs {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }

    /// Receipt handle of the delivery, if the payload came from a connector
    pub fn broker_id(&self) -> Option<&BrokerId> {
        self.metadata.as_ref().map(|m| &m.id)
    }
}

/// Connector-attached delivery metadata (`_metadata` on the wire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Receipt handle of this delivery
    pub id: BrokerId,

    /// Number of prior deliveries of the same message
    #[serde(default)]
    pub retries: u32,

    /// When the message was first enqueued
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,

    /// When the message was first delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_execution_on: Option<DateTime<Utc>>,
}

/// A payload together with the queue it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub queue_name: String,
    pub payload: Payload,
}

impl Delivery {
    pub fn new(queue_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
        }
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
