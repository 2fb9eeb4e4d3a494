use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Event;

#[derive(Debug, Error)]
#[error("event payload serialization failed: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

/// Envelope for a published event, carrying stream metadata.
///
/// Notes:
/// - `stream_id` identifies the entity the event belongs to (e.g. an equipment instance).
/// - `sequence_number` is monotonically increasing per stream.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream_id: Uuid,
    stream_type: String,

    /// Monotonically increasing position in the stream.
    sequence_number: u64,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
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

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Wrap a typed event, serializing it to JSON and capturing its metadata.
    pub fn from_typed<E>(
        event_id: Uuid,
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        event: &E,
    ) -> Result<Self, EnvelopeError>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// Decode the JSON payload back into a typed event.
    pub fn decode<E>(&self) -> Result<E, EnvelopeError>
    where
        E: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        at: DateTime<Utc>,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_typed_captures_event_metadata() {
        let event = Pinged { at: Utc::now() };
        let stream = Uuid::now_v7();
        let env = EventEnvelope::from_typed(Uuid::now_v7(), stream, "test.stream", 7, &event).unwrap();

        assert_eq!(env.stream_id(), stream);
        assert_eq!(env.sequence_number(), 7);
        assert_eq!(env.event_type(), "test.pinged");
        assert_eq!(env.event_version(), 2);
        assert_eq!(env.occurred_at(), event.at);
        assert_eq!(env.decode::<Pinged>().unwrap(), event);
    }
}
