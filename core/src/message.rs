//! The in-flight message envelope.
//!
//! A [`Message`] carries a command, query or event through a pipeline. It owns
//! the payload, a side-channel [`Items`] map for cross-middleware data, the
//! [`ProcessingStatus`] state machine, and the error captured by the engine.
//!
//! # Status state machine
//!
//! ```text
//! Created ──► Processing ──► Completed
//!                 │
//!                 ├────────► Rejected   (structural failure before business logic)
//!                 └────────► Failed     (error raised by business logic)
//! ```
//!
//! Transitions only move forward. Once terminal, the status never changes and
//! the payload can no longer be borrowed mutably.

use crate::error::{MessageError, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// A request to change state.
    Command = 1,
    /// A request to read state.
    Query = 2,
    /// A fact about something that happened.
    Event = 3,
}

impl MessageKind {
    /// One-byte wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Command),
            2 => Some(Self::Query),
            3 => Some(Self::Event),
            _ => None,
        }
    }

    /// Lowercase name, used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessingStatus {
    /// Constructed, not yet submitted.
    Created = 0,
    /// Running through the pipeline.
    Processing = 1,
    /// Handler finished successfully.
    Completed = 2,
    /// Handler raised during business logic.
    Failed = 3,
    /// Structural failure discovered before business logic ran.
    Rejected = 4,
}

impl ProcessingStatus {
    /// One-byte wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Processing),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }

    /// `Completed`, `Failed` and `Rejected` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// `Failed` or `Rejected`.
    #[must_use]
    pub const fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Rejected)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Processing)
                | (
                    Self::Created | Self::Processing,
                    Self::Completed | Self::Failed | Self::Rejected
                )
        )
    }

    /// Lowercase name, used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message payload object.
///
/// Implemented for every `Serialize + Debug + Send + Sync + 'static` type, so
/// plain command and event structs can be submitted without ceremony. The
/// content type is the fully-qualified Rust type name, which is what
/// [`ContentRegistry`](crate::record::ContentRegistry) uses to reconstruct the
/// payload from a stored record.
pub trait Content: Any + Send + Sync + fmt::Debug {
    /// Fully-qualified type name of the payload.
    fn content_type(&self) -> &'static str;

    /// JSON projection used for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload's `Serialize` impl fails.
    fn to_value(&self) -> Result<Value, serde_json::Error>;

    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    /// Mutably borrow as `Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut (dyn Any + Send + Sync);

    /// Convert into a boxed `Any`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T> Content for T
where
    T: Serialize + Any + Send + Sync + fmt::Debug,
{
    fn content_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn as_any_mut(&mut self) -> &mut (dyn Any + Send + Sync) {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// What a message carries.
#[derive(Debug)]
pub enum Payload {
    /// A typed command, event or reconstructed object.
    Object(Box<dyn Content>),
    /// A generic name → value map built from untyped input.
    Arguments(Map<String, Value>),
}

impl Payload {
    /// Box a typed payload.
    #[must_use]
    pub fn object<T: Content>(value: T) -> Self {
        Self::Object(Box::new(value))
    }

    /// `TypeId` of the concrete payload, used for handler lookup.
    #[must_use]
    pub fn content_type_id(&self) -> TypeId {
        match self {
            Self::Object(content) => content.as_any().type_id(),
            Self::Arguments(_) => TypeId::of::<Map<String, Value>>(),
        }
    }

    /// Content type name of a typed payload.
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Object(content) => Some(content.content_type()),
            Self::Arguments(_) => None,
        }
    }

    /// Downcast a typed payload.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(content) => content.as_any().downcast_ref::<T>(),
            Self::Arguments(_) => None,
        }
    }

    /// Mutably downcast a typed payload.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            Self::Object(content) => content.as_any_mut().downcast_mut::<T>(),
            Self::Arguments(_) => None,
        }
    }

    /// Type-erased mutable access to a typed payload.
    pub fn as_any_mut(&mut self) -> Option<&mut (dyn Any + Send + Sync)> {
        match self {
            Self::Object(content) => Some(content.as_any_mut()),
            Self::Arguments(_) => None,
        }
    }

    /// The argument map of an untyped payload.
    #[must_use]
    pub const fn as_arguments(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Arguments(map) => Some(map),
            Self::Object(_) => None,
        }
    }

    /// JSON projection of the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a typed payload fails to serialize.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Object(content) => content.to_value(),
            Self::Arguments(map) => Ok(Value::Object(map.clone())),
        }
    }
}

/// Side-channel data shared between middleware stages of one message.
#[derive(Default)]
pub struct Items {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Items {
    /// Store a value, replacing any previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.entries.insert(key, Box::new(value));
    }

    /// Borrow a value if present and of type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Mutably borrow a value if present and of type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries
            .get_mut(key)
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove and return a value of type `T`. A value of another type is left in place.
    pub fn take<T: Any>(&mut self, key: &'static str) -> Option<T> {
        let value = self.entries.remove(key)?;
        match value.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(value) => {
                self.entries.insert(key, value);
                None
            }
        }
    }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A command, query or event travelling through a pipeline.
#[derive(Debug)]
pub struct Message {
    id: Uuid,
    kind: MessageKind,
    content_type: String,
    payload: Payload,
    items: Items,
    data: BTreeMap<String, String>,
    status: ProcessingStatus,
    created_at: DateTime<Utc>,
    execution_duration: Duration,
    error: Option<MessageError>,
    result: Option<Value>,
}

impl Message {
    /// Create a message. The content type defaults to the payload's type name.
    #[must_use]
    pub fn new(kind: MessageKind, payload: Payload) -> Self {
        let content_type = payload.type_name().unwrap_or_default().to_string();
        Self {
            id: Uuid::new_v4(),
            kind,
            content_type,
            payload,
            items: Items::default(),
            data: BTreeMap::new(),
            status: ProcessingStatus::Created,
            created_at: Utc::now(),
            execution_duration: Duration::ZERO,
            error: None,
            result: None,
        }
    }

    /// Wrap a typed command.
    #[must_use]
    pub fn command<C: Content>(command: C) -> Self {
        Self::new(MessageKind::Command, Payload::object(command))
    }

    /// Wrap a typed event.
    #[must_use]
    pub fn event<E: Content>(event: E) -> Self {
        Self::new(MessageKind::Event, Payload::object(event))
    }

    /// Build an untyped query message: `content_type` names `Owner.method`.
    #[must_use]
    pub fn query(content_type: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self::new(MessageKind::Query, Payload::Arguments(arguments)).with_content_type(content_type)
    }

    /// Override the identifier.
    #[must_use]
    pub const fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Override the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Override the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attach a persisted custom data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Unique identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Message discriminator.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Fully-qualified payload type name (or `Owner.method` for queries).
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Mutable payload access; `None` once the status is terminal.
    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        if self.status.is_terminal() {
            None
        } else {
            Some(&mut self.payload)
        }
    }

    /// Split borrow of the mutable payload and the side-channel items.
    ///
    /// The payload half is `None` once the status is terminal.
    pub fn payload_and_items_mut(&mut self) -> (Option<&mut Payload>, &mut Items) {
        let payload = if self.status.is_terminal() {
            None
        } else {
            Some(&mut self.payload)
        };
        (payload, &mut self.items)
    }

    /// Downcast a typed payload.
    #[must_use]
    pub fn content<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Consume the message and return the typed payload.
    #[must_use]
    pub fn into_content<T: Any>(self) -> Option<T> {
        match self.payload {
            Payload::Object(content) => content.into_any().downcast::<T>().ok().map(|b| *b),
            Payload::Arguments(_) => None,
        }
    }

    /// Side-channel items.
    #[must_use]
    pub const fn items(&self) -> &Items {
        &self.items
    }

    /// Mutable side-channel items.
    pub fn items_mut(&mut self) -> &mut Items {
        &mut self.items
    }

    /// Persisted custom data.
    #[must_use]
    pub const fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    /// Mutable persisted custom data.
    pub fn data_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.data
    }

    /// Current processing status.
    #[must_use]
    pub const fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Handler execution duration.
    #[must_use]
    pub const fn execution_duration(&self) -> Duration {
        self.execution_duration
    }

    /// Record the handler execution duration.
    pub const fn set_execution_duration(&mut self, duration: Duration) {
        self.execution_duration = duration;
    }

    /// Captured error, if the message was rejected or failed.
    #[must_use]
    pub const fn error(&self) -> Option<&MessageError> {
        self.error.as_ref()
    }

    /// Query result projected as JSON.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Store a query result.
    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&mut self, next: ProcessingStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Mark the message as completed.
    pub fn complete(&mut self) -> bool {
        self.transition(ProcessingStatus::Completed)
    }

    /// Capture `error` and move to its terminal status.
    ///
    /// A message that is already terminal keeps its status and error.
    pub fn record_error(&mut self, error: &PipelineError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.error = Some(MessageError::from(error));
        self.transition(error.terminal_status())
    }

    /// Restore persisted state onto a reconstructed message.
    pub(crate) fn restore(
        &mut self,
        status: ProcessingStatus,
        execution_duration: Duration,
        error: Option<MessageError>,
        data: BTreeMap<String, String>,
    ) {
        self.status = status;
        self.execution_duration = execution_duration;
        self.error = error;
        self.data = data;
    }
}
