use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for an event, containing stream + workflow metadata.
///
/// Notes:
/// - `stream_id` identifies the entity the event belongs to (e.g. a job id).
/// - `correlation_id` links events across a multi-step workflow; it is opaque.
/// - `sequence_number` is monotonically increasing per stream as seen by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    stream_id: Uuid,
    stream_type: String,

    sequence_number: u64,
    correlation_id: Option<String>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        correlation_id: Option<String>,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            correlation_id,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
