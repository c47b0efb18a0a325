use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// An event represent something that happened in the past.
///
/// It is serialized using the `serde` crate when being recorded, so it can be stored and shared
/// between independent modules of the system. An event must thus implement [Serialize] and
/// [Deserialize].
///
/// # Associated constants
///
/// * [NAME](Self::NAME) - the unique name of the event, used as the topic on the event bus
/// * [VERSION](Self::VERSION) - an optional schema version, recorded with the event
///
/// # Example
///
/// ```
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct AccountCreated {
///     id: String,
/// }
///
/// impl strata::Event for AccountCreated {
///     const NAME: &'static str = "AccountCreated";
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + 'static {
    /// The name of the event. Must be unique.
    const NAME: &'static str;

    /// The schema version of the event.
    const VERSION: Option<u32> = None;

    /// Serializes an event into a [SerializedEvent], timestamped with the current instant.
    fn into_serialized(self) -> Result<SerializedEvent, Error> {
        Ok(SerializedEvent {
            name: Self::NAME.to_owned(),
            payload: serde_json::to_value(self)?,
            version: Self::VERSION,
            timestamp: Some(Utc::now()),
        })
    }
}

/// An event in its serialized form, as it is applied to aggregates, persisted and published.
///
/// Can be created from an [Event] with [Event::into_serialized], or directly from a name and a
/// JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    name: String,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl SerializedEvent {
    /// Creates a serialized event with no version nor timestamp.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            version: None,
            timestamp: None,
        }
    }

    /// Sets the schema version of the event.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp of the event.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The name of the serialized event
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The JSON payload of the event.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The schema version of the event, if any.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// The instant the event was created, if known.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Returns `true` if the serialized event has the name of `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.name == E::NAME
    }

    /// Tries to deserialize to a concrete [Event].
    pub fn deserialize<E: Event>(&self) -> Result<E, Error> {
        Ok(E::deserialize(&self.payload)?)
    }
}
