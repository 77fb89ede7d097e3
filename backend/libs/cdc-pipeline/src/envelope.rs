//! Debezium change envelope decoding.
//!
//! Turns one raw record into a [`ChangeEnvelope`] or a [`SoftSkip`]. Pure and
//! stateless: no I/O, no logging.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::DecodeError;

/// CDC operation types from Debezium
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// c = create
    Create,
    /// u = update
    Update,
    /// r = read, initial snapshot
    Read,
    /// d = delete
    Delete,
    /// Any other operation code
    Unknown(String),
}

impl Operation {
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" => Operation::Create,
            "u" => Operation::Update,
            "r" => Operation::Read,
            "d" => Operation::Delete,
            other => Operation::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Read => "r",
            Operation::Delete => "d",
            Operation::Unknown(code) => code,
        }
    }

    /// The image that carries the row state for this operation.
    ///
    /// Deletes use `before`; creates, updates and snapshot reads use `after`.
    /// Unknown operations have none.
    pub fn authoritative_image(&self) -> Option<ImageSide> {
        match self {
            Operation::Create | Operation::Update | Operation::Read => Some(ImageSide::After),
            Operation::Delete => Some(ImageSide::Before),
            Operation::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Read => write!(f, "read"),
            Operation::Delete => write!(f, "delete"),
            Operation::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSide {
    Before,
    After,
}

impl ImageSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSide::Before => "before",
            ImageSide::After => "after",
        }
    }
}

/// Debezium `source` block. Only used for log context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceInfo {
    pub connector: Option<String>,
    /// Logical name of the database server
    pub name: Option<String>,
    pub db: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// A decoded change event
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    pub operation: Operation,
    /// Row state before the change
    pub before: Option<Value>,
    /// Row state after the change
    pub after: Option<Value>,
    pub source: Option<SourceInfo>,
    /// Connector processing time in milliseconds since epoch
    pub ts_ms: Option<i64>,
}

impl ChangeEnvelope {
    pub fn image(&self, side: ImageSide) -> Option<&Value> {
        match side {
            ImageSide::Before => self.before.as_ref(),
            ImageSide::After => self.after.as_ref(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.table.as_deref())
    }
}

/// Records that are skipped without being treated as failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftSkip {
    /// No payload: a deletion marker with no content
    Tombstone,
    /// Connector heartbeat: a payload with only a timestamp and no operation
    Heartbeat,
}

impl fmt::Display for SoftSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftSkip::Tombstone => write!(f, "tombstone"),
            SoftSkip::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Change(ChangeEnvelope),
    Skip(SoftSkip),
}

/// Decode a record value as delivered by the transport.
///
/// A record with no value at all is a transport-level tombstone.
pub fn decode_bytes(raw: Option<&[u8]>) -> Result<Decoded, DecodeError> {
    match raw {
        None => Ok(Decoded::Skip(SoftSkip::Tombstone)),
        Some(bytes) => decode(std::str::from_utf8(bytes)?),
    }
}

/// Decode one raw change record.
///
/// Accepts both the schema-wrapped shape (`{"schema": .., "payload": {..}}`)
/// and the bare payload shape produced with `schemas.enable=false`, which is
/// recognized by a top-level `op` key.
pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
    let Value::Object(mut root) = serde_json::from_str::<Value>(raw)? else {
        return Err(DecodeError::NotAnObject("$"));
    };

    let payload = match root.remove("payload") {
        Some(Value::Object(payload)) => payload,
        Some(Value::Null) => return Ok(Decoded::Skip(SoftSkip::Tombstone)),
        Some(_) => return Err(DecodeError::NotAnObject("payload")),
        None if root.contains_key("op") => root,
        None => return Ok(Decoded::Skip(SoftSkip::Tombstone)),
    };

    decode_payload(payload)
}

fn decode_payload(mut payload: Map<String, Value>) -> Result<Decoded, DecodeError> {
    let operation = match payload.remove("op") {
        None if is_heartbeat(&payload) => return Ok(Decoded::Skip(SoftSkip::Heartbeat)),
        None | Some(Value::Null) => return Err(DecodeError::MissingOperation),
        Some(Value::String(code)) => Operation::from_code(&code),
        Some(other) => return Err(DecodeError::InvalidOperation(other.to_string())),
    };

    let before = take_image(&mut payload, ImageSide::Before);
    let after = take_image(&mut payload, ImageSide::After);

    if let Some(side) = operation.authoritative_image() {
        let present = match side {
            ImageSide::Before => before.is_some(),
            ImageSide::After => after.is_some(),
        };
        if !present {
            return Err(DecodeError::MissingImage {
                op: operation.to_string(),
                image: side.as_str(),
            });
        }
    }

    let source = payload
        .remove("source")
        .and_then(|v| SourceInfo::deserialize(v).ok());
    let ts_ms = payload.get("ts_ms").and_then(Value::as_i64);

    Ok(Decoded::Change(ChangeEnvelope {
        operation,
        before,
        after,
        source,
        ts_ms,
    }))
}

fn take_image(payload: &mut Map<String, Value>, side: ImageSide) -> Option<Value> {
    payload.remove(side.as_str()).filter(|v| !v.is_null())
}

/// Debezium heartbeats carry `{"ts_ms": ..}` and nothing row-related.
fn is_heartbeat(payload: &Map<String, Value>) -> bool {
    payload.contains_key("ts_ms")
        && !payload.contains_key(ImageSide::Before.as_str())
        && !payload.contains_key(ImageSide::After.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(raw: &str) -> ChangeEnvelope {
        match decode(raw).unwrap() {
            Decoded::Change(envelope) => envelope,
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_create() {
        let envelope = change(
            r#"{"payload":{"op":"c","before":null,"after":{"id":1,"payload":"x","status":"new"},"ts_ms":1700000000000}}"#,
        );

        assert_eq!(envelope.operation, Operation::Create);
        assert!(envelope.before.is_none());
        assert_eq!(
            envelope.after,
            Some(json!({"id": 1, "payload": "x", "status": "new"}))
        );
        assert_eq!(envelope.ts_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_decode_delete_uses_before() {
        let envelope = change(r#"{"payload":{"op":"d","before":{"id":7},"after":null}}"#);

        assert_eq!(envelope.operation, Operation::Delete);
        assert_eq!(envelope.before, Some(json!({"id": 7})));
        assert!(envelope.after.is_none());
    }

    #[test]
    fn test_null_payload_is_tombstone() {
        assert_eq!(
            decode(r#"{"payload":null}"#).unwrap(),
            Decoded::Skip(SoftSkip::Tombstone)
        );
    }

    #[test]
    fn test_absent_payload_is_tombstone() {
        assert_eq!(
            decode(r#"{"schema":{"type":"struct"}}"#).unwrap(),
            Decoded::Skip(SoftSkip::Tombstone)
        );
        assert_eq!(decode_bytes(None).unwrap(), Decoded::Skip(SoftSkip::Tombstone));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            decode("not-json"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            decode_bytes(Some(&[0xff, 0xfe, 0x00])),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_non_object_roots() {
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject("$"))));
        assert!(matches!(
            decode(r#"{"payload":"text"}"#),
            Err(DecodeError::NotAnObject("payload"))
        ));
    }

    #[test]
    fn test_missing_operation() {
        assert!(matches!(
            decode(r#"{"payload":{"after":{"id":1}}}"#),
            Err(DecodeError::MissingOperation)
        ));
        assert!(matches!(
            decode(r#"{"payload":{"op":null,"after":{"id":1}}}"#),
            Err(DecodeError::MissingOperation)
        ));
    }

    #[test]
    fn test_heartbeat_is_soft_skip() {
        assert_eq!(
            decode(r#"{"payload":{"ts_ms":1700000000000}}"#).unwrap(),
            Decoded::Skip(SoftSkip::Heartbeat)
        );
    }

    #[test]
    fn test_non_string_operation() {
        assert!(matches!(
            decode(r#"{"payload":{"op":5}}"#),
            Err(DecodeError::InvalidOperation(code)) if code == "5"
        ));
    }

    #[test]
    fn test_missing_authoritative_image() {
        let err = decode(r#"{"payload":{"op":"c","after":null}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingImage { image: "after", .. }));

        let err = decode(r#"{"payload":{"op":"d","after":{"id":1}}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingImage { image: "before", .. }));
    }

    #[test]
    fn test_unknown_operation_decodes() {
        let envelope = change(r#"{"payload":{"op":"x","after":{"id":1}}}"#);
        assert_eq!(envelope.operation, Operation::Unknown("x".to_string()));
        assert_eq!(envelope.operation.code(), "x");
    }

    #[test]
    fn test_schemaless_payload() {
        let envelope = change(r#"{"op":"r","after":{"id":3,"payload":"p","status":"s"}}"#);
        assert_eq!(envelope.operation, Operation::Read);
    }

    #[test]
    fn test_source_table_extracted() {
        let envelope = change(
            r#"{"payload":{"op":"c","after":{"id":1},"source":{"connector":"postgresql","name":"postgrescdc","db":"app","schema":"events","table":"events"}}}"#,
        );
        assert_eq!(envelope.table(), Some("events"));
    }
}
