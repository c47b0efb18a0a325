use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::{Error, Event, SerializedEvent};

/// Identifies the ordered sequence of events of one aggregate instance.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EventStream {
    aggregate_type: String,
    aggregate_id: String,
}

impl EventStream {
    /// Creates the stream of the aggregate of type `aggregate_type` identified by `aggregate_id`.
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    /// The name of the aggregate type.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The id of the aggregate.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// The unique id of the stream, `{aggregate_type}-{aggregate_id}`.
    pub fn stream_id(&self) -> String {
        format!("{}-{}", self.aggregate_type, self.aggregate_id)
    }
}

impl Display for EventStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.aggregate_type, self.aggregate_id)
    }
}

/// An event together with the metadata assigned by the [EventStore](crate::EventStore) when it
/// was appended.
///
/// Envelopes are only ever minted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    version: u64,
    occurred_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<String>,
    event: SerializedEvent,
}

impl EventEnvelope {
    pub(crate) fn mint(
        stream: &EventStream,
        version: u64,
        event: SerializedEvent,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_type: stream.aggregate_type.clone(),
            aggregate_id: stream.aggregate_id.clone(),
            version,
            occurred_on: Utc::now(),
            correlation_id,
            causation_id,
            event,
        }
    }

    /// The unique id of the event.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// The name of the aggregate type of the stream.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The id of the aggregate.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// The stream the envelope belongs to.
    pub fn stream(&self) -> EventStream {
        EventStream::new(&self.aggregate_type, &self.aggregate_id)
    }

    /// The position of the envelope in its stream, starting at 1.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When the envelope was appended.
    pub fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }

    /// The correlation id of the append, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The causation id of the append, if any.
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    /// The name of the wrapped event.
    pub fn event_name(&self) -> &str {
        self.event.name()
    }

    /// The wrapped event.
    pub fn event(&self) -> &SerializedEvent {
        &self.event
    }

    /// Unwraps the event.
    pub fn into_event(self) -> SerializedEvent {
        self.event
    }

    /// Deserializes the wrapped event.
    pub fn deserialize<E: Event>(&self) -> Result<E, Error> {
        self.event.deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_id_joins_type_and_id() {
        let stream = EventStream::new("Account", "a1");

        assert_eq!(stream.stream_id(), "Account-a1");
        assert_eq!(stream.to_string(), stream.stream_id());
    }

    #[test]
    fn mint_stamps_metadata() {
        let stream = EventStream::new("Account", "a1");
        let envelope = EventEnvelope::mint(
            &stream,
            3,
            SerializedEvent::new("AccountCreated", json!({ "id": "a1" })),
            Some("correlation".into()),
            None,
        );

        assert_eq!(envelope.version(), 3);
        assert_eq!(envelope.aggregate_id(), "a1");
        assert_eq!(envelope.stream(), stream);
        assert_eq!(envelope.event_name(), "AccountCreated");
        assert_eq!(envelope.correlation_id(), Some("correlation"));
        assert_eq!(envelope.causation_id(), None);
    }
}
