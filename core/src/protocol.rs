//! Chunked binary encoding of [`MessageRecord`]s.
//!
//! A record is a sequence of chunks. Every chunk is `[tag: u8][len: i32 LE][payload]`
//! except the two framing chunks, [`tags::BEGIN_RECORD`] and [`tags::END_RECORD`],
//! which are a bare tag byte.
//!
//! ```text
//! 10                                   BeginRecord
//! 11 10000000 <16 uuid bytes>          Id
//! 12 01000000 <kind>                   Type
//! 13 <len> <utf-8>                     ContentType
//! 17 08000000 <i64 LE nanos>           CreatedAt
//! 18 04000000 <i32 LE millis>          ExecutionDuration
//! 19 01000000 <status>                 Status
//! 21 <len> <bincode ErrorDetails>      ErrorDetails (only when present)
//! 22 <len> <utf-8>                     ErrorMessage
//! 23 <len> <utf-8>                     ErrorType
//! 15 <len> <serialized content>        Content (empty for null)
//! 16 <len> <bincode map>               Data (only when present)
//! 50                                   EndRecord
//! ```
//!
//! Content bytes are produced by an [`ObjectSerializer`]; [`JsonSerializer`]
//! is the default and the only one the plain `encode_record`/`decode_record`
//! functions use. Both ends of a stream must agree on the serializer.
//!
//! The reader tolerates garbage before a `BeginRecord`, restarts on a new
//! `BeginRecord`, skips unknown tags, and reports end of stream (including a
//! record truncated before its `EndRecord`) as `Ok(None)`.

use crate::error::ErrorDetails;
use crate::message::{MessageKind, ProcessingStatus};
use crate::record::MessageRecord;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

/// Chunk tags.
pub mod tags {
    /// Opens a record; no length.
    pub const BEGIN_RECORD: u8 = 0x10;
    /// 16 raw UUID bytes.
    pub const ID: u8 = 0x11;
    /// One byte [`MessageKind`](crate::message::MessageKind) code.
    pub const TYPE: u8 = 0x12;
    /// UTF-8 content type name.
    pub const CONTENT_TYPE: u8 = 0x13;
    /// Payload bytes from the configured object serializer.
    pub const CONTENT: u8 = 0x15;
    /// bincode-encoded custom data map.
    pub const DATA: u8 = 0x16;
    /// i64 LE nanoseconds since the Unix epoch.
    pub const CREATED_AT: u8 = 0x17;
    /// i32 LE milliseconds.
    pub const EXECUTION_DURATION: u8 = 0x18;
    /// One byte [`ProcessingStatus`](crate::message::ProcessingStatus) code.
    pub const STATUS: u8 = 0x19;
    /// bincode-encoded [`ErrorDetails`](crate::error::ErrorDetails).
    pub const ERROR_DETAILS: u8 = 0x21;
    /// UTF-8 error message.
    pub const ERROR_MESSAGE: u8 = 0x22;
    /// UTF-8 error kind name.
    pub const ERROR_TYPE: u8 = 0x23;
    /// Closes a record; no length.
    pub const END_RECORD: u8 = 0x50;
}

/// Errors produced while encoding or decoding records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A field could not be encoded.
    #[error("Failed to encode {field}: {reason}")]
    Encode {
        /// Field being encoded.
        field: &'static str,
        /// Encoder error.
        reason: String,
    },

    /// A chunk payload was malformed.
    #[error("Failed to decode {field}: {reason}")]
    Decode {
        /// Field being decoded.
        field: &'static str,
        /// Decoder error.
        reason: String,
    },

    /// The timestamp cannot be represented as i64 nanoseconds.
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),
}

impl ProtocolError {
    fn encode(field: &'static str, reason: impl ToString) -> Self {
        Self::Encode {
            field,
            reason: reason.to_string(),
        }
    }

    fn decode(field: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Boxed error returned by an [`ObjectSerializer`].
pub type SerializerError = Box<dyn std::error::Error + Send + Sync>;

/// Converts message content to and from the bytes of the `Content` chunk.
pub trait ObjectSerializer: Send + Sync {
    /// Encode a non-null content value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has no representation in this format.
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;

    /// Decode a non-empty content payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// Compact JSON content.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ObjectSerializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn put_chunk(buffer: &mut Vec<u8>, tag: u8, field: &'static str, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = i32::try_from(payload.len())
        .map_err(|_| ProtocolError::encode(field, "chunk exceeds i32::MAX bytes"))?;
    buffer.push(tag);
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);
    Ok(())
}

/// Encode one record into a standalone buffer.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the timestamp is out of range or a field
/// fails to serialize.
pub fn encode_record(record: &MessageRecord) -> Result<Vec<u8>, ProtocolError> {
    encode_record_with(record, &JsonSerializer)
}

/// Encode one record, serializing its content with `content`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the timestamp is out of range or a field
/// fails to serialize.
pub fn encode_record_with(record: &MessageRecord, content: &dyn ObjectSerializer) -> Result<Vec<u8>, ProtocolError> {
    let nanos = record
        .created_at
        .timestamp_nanos_opt()
        .ok_or(ProtocolError::TimestampOutOfRange(record.created_at))?;

    let mut buffer = Vec::with_capacity(128 + record.content_type.len());
    buffer.push(tags::BEGIN_RECORD);
    put_chunk(&mut buffer, tags::ID, "id", record.id.as_bytes())?;
    put_chunk(&mut buffer, tags::TYPE, "type", &[record.kind.code()])?;
    put_chunk(&mut buffer, tags::CONTENT_TYPE, "content_type", record.content_type.as_bytes())?;
    put_chunk(&mut buffer, tags::CREATED_AT, "created_at", &nanos.to_le_bytes())?;
    put_chunk(
        &mut buffer,
        tags::EXECUTION_DURATION,
        "execution_duration",
        &record.execution_duration.to_le_bytes(),
    )?;
    put_chunk(&mut buffer, tags::STATUS, "status", &[record.status.code()])?;

    if let Some(details) = &record.error_details {
        let bytes = bincode::serialize(details).map_err(|e| ProtocolError::encode("error_details", e))?;
        put_chunk(&mut buffer, tags::ERROR_DETAILS, "error_details", &bytes)?;
    }
    put_chunk(&mut buffer, tags::ERROR_MESSAGE, "error_message", record.error_message.as_bytes())?;
    put_chunk(&mut buffer, tags::ERROR_TYPE, "error_type", record.error_type.as_bytes())?;

    let content = if record.content.is_null() {
        Vec::new()
    } else {
        content
            .serialize(&record.content)
            .map_err(|e| ProtocolError::encode("content", e))?
    };
    put_chunk(&mut buffer, tags::CONTENT, "content", &content)?;

    if let Some(data) = &record.data {
        let bytes = bincode::serialize(data).map_err(|e| ProtocolError::encode("data", e))?;
        put_chunk(&mut buffer, tags::DATA, "data", &bytes)?;
    }
    buffer.push(tags::END_RECORD);
    Ok(buffer)
}

/// Decode the first complete record in `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] for malformed chunk payloads.
pub fn decode_record(bytes: &[u8]) -> Result<Option<MessageRecord>, ProtocolError> {
    decode_record_with(bytes, &JsonSerializer)
}

/// Decode the first complete record in `bytes`, reading content with `content`.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] for malformed chunk payloads.
pub fn decode_record_with(
    mut bytes: &[u8],
    content: &dyn ObjectSerializer,
) -> Result<Option<MessageRecord>, ProtocolError> {
    read_record(&mut bytes, content)
}

/// Fills `buf` completely. `Ok(false)` means the stream ended first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, ProtocolError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reads a length-prefixed chunk payload. `Ok(None)` means the stream ended first.
fn read_payload(reader: &mut impl Read) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut len = [0_u8; 4];
    if !fill(reader, &mut len)? {
        return Ok(None);
    }
    let len = i32::from_le_bytes(len);
    let len = u64::try_from(len).map_err(|_| ProtocolError::decode("chunk", format!("negative length {len}")))?;

    let mut payload = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 == len {
        Ok(Some(payload))
    } else {
        Ok(None)
    }
}

fn fixed<const N: usize>(field: &'static str, payload: &[u8]) -> Result<[u8; N], ProtocolError> {
    payload
        .try_into()
        .map_err(|_| ProtocolError::decode(field, format!("expected {N} bytes, got {}", payload.len())))
}

fn utf8(field: &'static str, payload: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(payload).map_err(|e| ProtocolError::decode(field, e))
}

#[derive(Default)]
struct PartialRecord {
    id: Option<Uuid>,
    kind: Option<MessageKind>,
    content_type: String,
    content: Value,
    data: Option<BTreeMap<String, String>>,
    error_details: Option<ErrorDetails>,
    error_message: String,
    error_type: String,
    created_at: DateTime<Utc>,
    execution_duration: i32,
    status: Option<ProcessingStatus>,
}

impl PartialRecord {
    fn apply(&mut self, tag: u8, payload: Vec<u8>, content: &dyn ObjectSerializer) -> Result<(), ProtocolError> {
        match tag {
            tags::ID => {
                self.id = Some(Uuid::from_bytes(fixed::<16>("id", &payload)?));
            }
            tags::TYPE => {
                let [code] = fixed::<1>("type", &payload)?;
                self.kind = Some(
                    MessageKind::from_code(code)
                        .ok_or_else(|| ProtocolError::decode("type", format!("unknown code {code}")))?,
                );
            }
            tags::CONTENT_TYPE => self.content_type = utf8("content_type", payload)?,
            tags::CREATED_AT => {
                let nanos = i64::from_le_bytes(fixed::<8>("created_at", &payload)?);
                self.created_at = Utc.timestamp_nanos(nanos);
            }
            tags::EXECUTION_DURATION => {
                self.execution_duration = i32::from_le_bytes(fixed::<4>("execution_duration", &payload)?);
            }
            tags::STATUS => {
                let [code] = fixed::<1>("status", &payload)?;
                self.status = Some(
                    ProcessingStatus::from_code(code)
                        .ok_or_else(|| ProtocolError::decode("status", format!("unknown code {code}")))?,
                );
            }
            tags::ERROR_DETAILS => {
                self.error_details =
                    Some(bincode::deserialize(&payload).map_err(|e| ProtocolError::decode("error_details", e))?);
            }
            tags::ERROR_MESSAGE => self.error_message = utf8("error_message", payload)?,
            tags::ERROR_TYPE => self.error_type = utf8("error_type", payload)?,
            tags::CONTENT => {
                self.content = if payload.is_empty() {
                    Value::Null
                } else {
                    content
                        .deserialize(&payload)
                        .map_err(|e| ProtocolError::decode("content", e))?
                };
            }
            tags::DATA => {
                self.data = Some(bincode::deserialize(&payload).map_err(|e| ProtocolError::decode("data", e))?);
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<MessageRecord, ProtocolError> {
        Ok(MessageRecord {
            id: self.id.ok_or_else(|| ProtocolError::decode("id", "missing chunk"))?,
            kind: self.kind.ok_or_else(|| ProtocolError::decode("type", "missing chunk"))?,
            content_type: self.content_type,
            content: self.content,
            data: self.data,
            error_details: self.error_details,
            error_message: self.error_message,
            error_type: self.error_type,
            created_at: self.created_at,
            execution_duration: self.execution_duration,
            status: self.status.ok_or_else(|| ProtocolError::decode("status", "missing chunk"))?,
        })
    }
}

fn read_record(reader: &mut impl Read, content: &dyn ObjectSerializer) -> Result<Option<MessageRecord>, ProtocolError> {
    let mut current: Option<PartialRecord> = None;
    loop {
        let mut tag = [0_u8; 1];
        if !fill(reader, &mut tag)? {
            return Ok(None);
        }
        match (tag[0], current.take()) {
            (tags::BEGIN_RECORD, _) => current = Some(PartialRecord::default()),
            (tags::END_RECORD, Some(record)) => return record.finish().map(Some),
            (tags::END_RECORD, None) => {}
            (tag, record) => {
                let Some(payload) = read_payload(reader)? else {
                    return Ok(None);
                };
                current = match record {
                    Some(mut record) => {
                        record.apply(tag, payload, content)?;
                        Some(record)
                    }
                    None => None,
                };
            }
        }
    }
}

/// Reads and writes records on a shared byte stream.
///
/// One mutex per stream serializes reads and writes, so a serializer can be
/// shared across threads. Each record is written with a single `write_all`.
/// Content goes through `C`, JSON unless another [`ObjectSerializer`] is given.
#[derive(Debug)]
pub struct MessageBinarySerializer<S, C = JsonSerializer> {
    stream: Mutex<S>,
    content: C,
}

impl<S> MessageBinarySerializer<S> {
    /// Wrap a stream, with JSON content.
    pub const fn new(stream: S) -> Self {
        Self::with_serializer(stream, JsonSerializer)
    }
}

impl<S, C: ObjectSerializer> MessageBinarySerializer<S, C> {
    /// Wrap a stream, serializing content with `content`.
    pub const fn with_serializer(stream: S, content: C) -> Self {
        Self {
            stream: Mutex::new(stream),
            content,
        }
    }

    /// Return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

impl<S: Write, C: ObjectSerializer> MessageBinarySerializer<S, C> {
    /// Append one record to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if encoding or the write fails.
    pub fn write(&self, record: &MessageRecord) -> Result<(), ProtocolError> {
        let buffer = encode_record_with(record, &self.content)?;
        let mut stream = self.stream.lock();
        stream.write_all(&buffer)?;
        stream.flush()?;
        Ok(())
    }
}

impl<S: Read, C: ObjectSerializer> MessageBinarySerializer<S, C> {
    /// Read the next complete record, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] for malformed chunk payloads and
    /// [`ProtocolError::Io`] for stream failures other than end of file.
    pub fn read(&self) -> Result<Option<MessageRecord>, ProtocolError> {
        let mut stream = self.stream.lock();
        read_record(&mut *stream, &self.content)
    }

    /// Read every remaining record.
    ///
    /// # Errors
    ///
    /// Stops at the first error, see [`Self::read`].
    pub fn read_all(&self) -> Result<Vec<MessageRecord>, ProtocolError> {
        let mut stream = self.stream.lock();
        let mut records = Vec::new();
        while let Some(record) = read_record(&mut *stream, &self.content)? {
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on encoding errors
mod tests {
    use super::*;
    use crate::error::Violation;
    use proptest::prelude::*;
    use serde_json::json;
    use std::io::Cursor;

    fn completed_record() -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            kind: MessageKind::Command,
            content_type: "app::commands::CreateTask".into(),
            content: json!({"title": "write docs"}),
            data: None,
            error_details: None,
            error_message: String::new(),
            error_type: String::new(),
            created_at: Utc.timestamp_nanos(1_700_000_000_123_456_789),
            execution_duration: 42,
            status: ProcessingStatus::Completed,
        }
    }

    fn tags_of(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let tag = bytes[i];
            out.push(tag);
            i += 1;
            if tag != tags::BEGIN_RECORD && tag != tags::END_RECORD {
                let len = i32::from_le_bytes(bytes[i..i + 4].try_into().unwrap());
                i += 4 + usize::try_from(len).unwrap();
            }
        }
        out
    }

    #[test]
    fn chunks_are_written_in_protocol_order() {
        let bytes = encode_record(&completed_record()).unwrap();
        assert_eq!(
            tags_of(&bytes),
            vec![
                tags::BEGIN_RECORD,
                tags::ID,
                tags::TYPE,
                tags::CONTENT_TYPE,
                tags::CREATED_AT,
                tags::EXECUTION_DURATION,
                tags::STATUS,
                tags::ERROR_MESSAGE,
                tags::ERROR_TYPE,
                tags::CONTENT,
                tags::END_RECORD,
            ]
        );
        assert_eq!(&bytes[1..6], &[tags::ID, 16, 0, 0, 0]);
    }

    #[test]
    fn optional_chunks_appear_only_when_present() {
        let mut record = completed_record();
        record.status = ProcessingStatus::Rejected;
        record.error_type = "ValidationFailed".into();
        record.error_message = "Validation failed: email: is required".into();
        record.error_details = Some(ErrorDetails {
            kind: "ValidationFailed".into(),
            message: record.error_message.clone(),
            causes: Vec::new(),
            violations: vec![Violation::new("email", "required", "is required")],
        });
        record.data = Some(BTreeMap::from([("tenant".to_string(), "acme".to_string())]));

        let bytes = encode_record(&record).unwrap();
        let written = tags_of(&bytes);
        assert_eq!(written[7], tags::ERROR_DETAILS);
        assert_eq!(written[written.len() - 2], tags::DATA);

        assert_eq!(decode_record(&bytes).unwrap(), Some(record));
    }

    #[test]
    fn null_content_is_an_empty_chunk() {
        let mut record = completed_record();
        record.content = Value::Null;
        let bytes = encode_record(&record).unwrap();

        let content_at = bytes.len() - 1 - 5;
        assert_eq!(&bytes[content_at..content_at + 5], &[tags::CONTENT, 0, 0, 0, 0]);
        assert_eq!(decode_record(&bytes).unwrap().unwrap().content, Value::Null);
    }

    #[test]
    fn reader_skips_garbage_before_begin() {
        let record = completed_record();
        let mut bytes = vec![tags::ERROR_TYPE, 3, 0, 0, 0, b'a', b'b', b'c', tags::END_RECORD];
        bytes.extend(encode_record(&record).unwrap());

        assert_eq!(decode_record(&bytes).unwrap(), Some(record));
    }

    #[test]
    fn new_begin_discards_the_partial_record() {
        let first = completed_record();
        let second = completed_record();
        let encoded = encode_record(&first).unwrap();
        // Begin plus the Id chunk of the first record.
        let mut bytes = encoded[..22].to_vec();
        bytes.extend(encode_record(&second).unwrap());

        assert_eq!(decode_record(&bytes).unwrap(), Some(second));
    }

    #[test]
    fn truncated_stream_reads_as_end() {
        let bytes = encode_record(&completed_record()).unwrap();
        assert_eq!(decode_record(&bytes[..bytes.len() - 1]).unwrap(), None);
        assert_eq!(decode_record(&bytes[..3]).unwrap(), None);
        assert_eq!(decode_record(&[]).unwrap(), None);
    }

    #[test]
    fn unknown_tags_inside_a_record_are_ignored() {
        let record = completed_record();
        let mut bytes = encode_record(&record).unwrap();
        let end = bytes.pop().unwrap();
        bytes.extend([0x7f, 2, 0, 0, 0, 0xde, 0xad, end]);

        assert_eq!(decode_record(&bytes).unwrap(), Some(record));
    }

    #[test]
    fn serializer_streams_multiple_records() {
        let serializer = MessageBinarySerializer::new(Vec::new());
        let records = vec![completed_record(), completed_record()];
        for record in &records {
            serializer.write(record).unwrap();
        }

        let reader = MessageBinarySerializer::new(Cursor::new(serializer.into_inner()));
        assert_eq!(reader.read_all().unwrap(), records);
        assert_eq!(reader.read().unwrap(), None);
    }

    /// Flat string maps as `key=value` lines.
    struct LineSerializer;

    impl ObjectSerializer for LineSerializer {
        fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
            let object = value.as_object().ok_or("only objects have a line form")?;
            let mut out = String::new();
            for (key, value) in object {
                let value = value.as_str().ok_or_else(|| format!("`{key}` is not a string"))?;
                out.push_str(&format!("{key}={value}\n"));
            }
            Ok(out.into_bytes())
        }

        fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
            let text = std::str::from_utf8(bytes)?;
            let mut object = serde_json::Map::new();
            for line in text.lines() {
                let (key, value) = line.split_once('=').ok_or("line without `=`")?;
                object.insert(key.to_string(), Value::String(value.to_string()));
            }
            Ok(Value::Object(object))
        }
    }

    #[test]
    fn content_goes_through_the_configured_serializer() {
        let mut record = completed_record();
        record.content = json!({"title": "write docs", "owner": "ada"});

        let serializer = MessageBinarySerializer::with_serializer(Vec::new(), LineSerializer);
        serializer.write(&record).unwrap();
        let bytes = serializer.into_inner();

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("owner=ada\ntitle=write docs\n"), "{text}");
        assert!(decode_record(&bytes).is_err());

        let reader = MessageBinarySerializer::with_serializer(Cursor::new(bytes), LineSerializer);
        assert_eq!(reader.read().unwrap(), Some(record));
    }

    #[test]
    fn serializer_errors_name_the_content_field() {
        let mut record = completed_record();
        record.content = json!([1, 2]);

        let error = encode_record_with(&record, &LineSerializer).unwrap_err();

        assert!(matches!(error, ProtocolError::Encode { field: "content", .. }), "{error}");
    }

    fn arb_record() -> impl Strategy<Value = MessageRecord> {
        (
            any::<u128>(),
            prop_oneof![
                Just(MessageKind::Command),
                Just(MessageKind::Query),
                Just(MessageKind::Event)
            ],
            "[a-z:]{1,24}",
            proptest::option::of(prop::collection::btree_map("[a-z]{1,6}", ".{0,8}", 0..4)),
            proptest::option::of(("[A-Za-z]{1,12}", ".{0,16}")),
            any::<i64>(),
            any::<i32>(),
            0_u8..5,
            proptest::option::of(any::<i64>()),
        )
            .prop_map(
                |(id, kind, content_type, data, error, nanos, duration, status, content)| {
                    let (error_details, error_message, error_type) = match error {
                        Some((error_kind, message)) => (
                            Some(ErrorDetails {
                                kind: error_kind.clone(),
                                message: message.clone(),
                                ..ErrorDetails::default()
                            }),
                            message,
                            error_kind,
                        ),
                        None => (None, String::new(), String::new()),
                    };
                    MessageRecord {
                        id: Uuid::from_u128(id),
                        kind,
                        content_type,
                        content: content.map_or(Value::Null, |n| json!({ "n": n })),
                        data,
                        error_details,
                        error_message,
                        error_type,
                        created_at: Utc.timestamp_nanos(nanos),
                        execution_duration: duration,
                        status: ProcessingStatus::from_code(status).unwrap(),
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn any_record_survives_the_wire(record in arb_record()) {
            let bytes = encode_record(&record).unwrap();
            prop_assert_eq!(decode_record(&bytes).unwrap(), Some(record));
        }
    }
}
