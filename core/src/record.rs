//! Persisted projection of a [`Message`].
//!
//! A [`MessageRecord`] is what repositories store and what the binary protocol
//! encodes. Going from a record back to a live message needs a
//! [`ContentRegistry`] that knows how to rebuild each typed payload.

use crate::error::{ErrorDetails, MessageError};
use crate::message::{Content, Message, MessageKind, Payload, ProcessingStatus};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors converting between messages and records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The payload could not be projected to JSON.
    #[error("Failed to serialize content of {content_type}: {source}")]
    Serialization {
        /// Content type of the payload.
        content_type: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The stored content does not match the registered type.
    #[error("Failed to deserialize content of {content_type}: {source}")]
    Deserialization {
        /// Content type of the record.
        content_type: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// No deserializer is registered and the content is not an argument map.
    #[error("Unknown content type: {0}")]
    UnknownContentType(String),
}

/// Storable form of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message identifier.
    pub id: Uuid,
    /// Message discriminator.
    pub kind: MessageKind,
    /// Fully-qualified payload type name.
    pub content_type: String,
    /// JSON payload; `Null` is stored as empty content bytes.
    pub content: Value,
    /// Custom data entries, `None` when the message had none.
    pub data: Option<BTreeMap<String, String>>,
    /// Captured error object, only for rejected or failed messages.
    pub error_details: Option<ErrorDetails>,
    /// Error message, empty on success.
    pub error_message: String,
    /// Error kind name, empty on success.
    pub error_type: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Handler execution duration in milliseconds.
    pub execution_duration: i32,
    /// Final processing status.
    pub status: ProcessingStatus,
}

impl MessageRecord {
    /// Project a message into a record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Serialization`] if the payload fails to serialize.
    pub fn from_message(message: &Message) -> Result<Self, RecordError> {
        let content = message
            .payload()
            .to_value()
            .map_err(|source| RecordError::Serialization {
                content_type: message.content_type().to_string(),
                source,
            })?;
        let data = if message.data().is_empty() {
            None
        } else {
            Some(message.data().clone())
        };
        let (error_details, error_message, error_type) = match message.error() {
            Some(error) => (
                Some(error.details.clone()),
                error.message.clone(),
                error.error_type.clone(),
            ),
            None => (None, String::new(), String::new()),
        };
        let millis = message.execution_duration().as_millis();
        let execution_duration = i32::try_from(millis).unwrap_or_else(|_| {
            tracing::warn!(
                message_id = %message.id(),
                millis = %millis,
                "Execution duration exceeds the record range, storing i32::MAX"
            );
            i32::MAX
        });

        Ok(Self {
            id: message.id(),
            kind: message.kind(),
            content_type: message.content_type().to_string(),
            content,
            data,
            error_details,
            error_message,
            error_type,
            created_at: message.created_at(),
            execution_duration,
            status: message.status(),
        })
    }

    /// Whether the record carries error information.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error_details.is_some() || !self.error_type.is_empty()
    }

    /// Execution duration as a [`Duration`]; negative values clamp to zero.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.execution_duration).unwrap_or(0))
    }
}

type Materializer = Box<dyn Fn(Value) -> Result<Box<dyn Content>, serde_json::Error> + Send + Sync>;

/// Content type name → payload deserializer.
#[derive(Default)]
pub struct ContentRegistry {
    entries: HashMap<String, Materializer>,
}

impl ContentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its fully-qualified type name.
    #[must_use]
    pub fn with<T>(mut self) -> Self
    where
        T: Content + DeserializeOwned,
    {
        self.register::<T>();
        self
    }

    /// Register `T` under its fully-qualified type name.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Content + DeserializeOwned,
    {
        self.register_as::<T>(std::any::type_name::<T>())
    }

    /// Register `T` under an explicit content type name.
    pub fn register_as<T>(&mut self, content_type: impl Into<String>) -> &mut Self
    where
        T: Content + DeserializeOwned,
    {
        self.entries.insert(
            content_type.into(),
            Box::new(|value| {
                let content: T = serde_json::from_value(value)?;
                Ok(Box::new(content) as Box<dyn Content>)
            }),
        );
        self
    }

    /// Whether a deserializer is registered for `content_type`.
    #[must_use]
    pub fn contains(&self, content_type: &str) -> bool {
        self.entries.contains_key(content_type)
    }

    /// Rebuild the payload of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Deserialization`] when the content does not fit
    /// the registered type, and [`RecordError::UnknownContentType`] when nothing
    /// is registered and the content is not a JSON object.
    pub fn materialize(&self, record: &MessageRecord) -> Result<Payload, RecordError> {
        match self.entries.get(&record.content_type) {
            Some(materialize) => materialize(record.content.clone())
                .map(Payload::Object)
                .map_err(|source| RecordError::Deserialization {
                    content_type: record.content_type.clone(),
                    source,
                }),
            None => match &record.content {
                Value::Object(map) => Ok(Payload::Arguments(map.clone())),
                _ => Err(RecordError::UnknownContentType(record.content_type.clone())),
            },
        }
    }
}

impl fmt::Debug for ContentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl Message {
    /// Rebuild a message from a stored record.
    ///
    /// # Errors
    ///
    /// Propagates [`ContentRegistry::materialize`] failures.
    pub fn from_record(
        record: &MessageRecord,
        registry: &ContentRegistry,
    ) -> Result<Self, RecordError> {
        let payload = registry.materialize(record)?;
        let error = record.has_error().then(|| MessageError {
            error_type: record.error_type.clone(),
            message: record.error_message.clone(),
            details: record.error_details.clone().unwrap_or_default(),
        });

        let mut message = Self::new(record.kind, payload)
            .with_id(record.id)
            .with_content_type(record.content_type.clone())
            .with_created_at(record.created_at);
        message.restore(
            record.status,
            record.duration(),
            error,
            record.data.clone().unwrap_or_default(),
        );
        Ok(message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on conversion errors
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TaskCreated {
        title: String,
        priority: u8,
    }

    #[test]
    fn successful_message_has_no_error_fields() {
        let mut message = Message::event(TaskCreated {
            title: "write docs".into(),
            priority: 2,
        });
        message.transition(ProcessingStatus::Processing);
        message.complete();

        let record = MessageRecord::from_message(&message).unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(record.content, json!({"title": "write docs", "priority": 2}));
        assert!(record.data.is_none());
        assert!(record.error_details.is_none());
        assert!(record.error_message.is_empty());
        assert!(!record.has_error());
    }

    #[test]
    fn oversized_durations_saturate() {
        let mut message = Message::event(TaskCreated {
            title: "batch import".into(),
            priority: 0,
        });
        message.set_execution_duration(Duration::from_secs(30 * 24 * 60 * 60));

        let record = MessageRecord::from_message(&message).unwrap();

        assert_eq!(record.execution_duration, i32::MAX);
    }

    #[test]
    fn rejected_message_keeps_its_error() {
        let mut message = Message::command(TaskCreated {
            title: "x".into(),
            priority: 1,
        })
        .with_data("tenant", "acme");
        message.transition(ProcessingStatus::Processing);
        message.record_error(&PipelineError::HandlerNotFound {
            message_type: "TaskCreated".into(),
        });

        let record = MessageRecord::from_message(&message).unwrap();
        assert_eq!(record.status, ProcessingStatus::Rejected);
        assert_eq!(record.error_type, "HandlerNotFound");
        assert_eq!(
            record.data.as_ref().and_then(|d| d.get("tenant")).map(String::as_str),
            Some("acme")
        );
        assert_eq!(
            record.error_details.as_ref().map(|d| d.kind.as_str()),
            Some("HandlerNotFound")
        );
    }

    #[test]
    fn registered_types_materialize_as_objects() {
        let message = Message::event(TaskCreated {
            title: "ship".into(),
            priority: 3,
        });
        let record = MessageRecord::from_message(&message).unwrap();
        let registry = ContentRegistry::new().with::<TaskCreated>();

        let rebuilt = Message::from_record(&record, &registry).unwrap();
        assert_eq!(rebuilt.id(), message.id());
        assert_eq!(
            rebuilt.content::<TaskCreated>(),
            Some(&TaskCreated {
                title: "ship".into(),
                priority: 3
            })
        );
    }

    #[test]
    fn unknown_object_content_falls_back_to_arguments() {
        let message = Message::query("Reports.total", serde_json::Map::new());
        let mut record = MessageRecord::from_message(&message).unwrap();
        record.content = json!({"year": 2024});

        let payload = ContentRegistry::new().materialize(&record).unwrap();
        assert_eq!(
            payload.as_arguments().and_then(|a| a.get("year")),
            Some(&json!(2024))
        );

        record.content = Value::Null;
        let error = ContentRegistry::new().materialize(&record).unwrap_err();
        assert!(matches!(error, RecordError::UnknownContentType(name) if name == "Reports.total"));
    }
}
