//! Operation dispatch for decoded change envelopes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::envelope::{ChangeEnvelope, ImageSide, Operation};
use crate::error::DispatchError;

/// Row of the captured `events` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub payload: String,
    pub status: String,
}

/// Kind of change passed to [`ChangeHandler::on_create_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Create,
    Update,
    Read,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Read => "READ (from snapshot)",
        }
    }
}

/// Business actions for captured changes.
///
/// Any error returned here is treated as a per-record failure and the record
/// is dead-lettered.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_create_or_update(
        &self,
        record: &EventRecord,
        event_type: EventType,
    ) -> anyhow::Result<()>;

    async fn on_delete(&self, record: &EventRecord) -> anyhow::Result<()>;
}

/// How `u` operations are handled.
///
/// `Reject` fails every update so the dead-letter path can be exercised end
/// to end against a live connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    #[default]
    Reject,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied { operation: Operation, record_id: i64 },
    /// Unknown operation code, neither handled nor failed
    Ignored { code: String },
}

pub struct Dispatcher<H> {
    handler: Arc<H>,
    update_policy: UpdatePolicy,
}

impl<H: ChangeHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, update_policy: UpdatePolicy) -> Self {
        Self {
            handler,
            update_policy,
        }
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    pub async fn dispatch(
        &self,
        envelope: &ChangeEnvelope,
    ) -> Result<DispatchOutcome, DispatchError> {
        let record = match &envelope.operation {
            Operation::Create => self.upsert(envelope, EventType::Create).await?,
            Operation::Read => self.upsert(envelope, EventType::Read).await?,
            Operation::Update => match self.update_policy {
                UpdatePolicy::Reject => return Err(DispatchError::UpdateRejected),
                UpdatePolicy::Apply => self.upsert(envelope, EventType::Update).await?,
            },
            Operation::Delete => {
                let record = map_image(envelope, ImageSide::Before)?;
                debug!(id = record.id, "Handling CDC delete");
                self.handler.on_delete(&record).await?;
                record
            }
            Operation::Unknown(code) => {
                warn!(op = %code, table = ?envelope.table(), "Unknown CDC operation, ignoring");
                return Ok(DispatchOutcome::Ignored { code: code.clone() });
            }
        };

        Ok(DispatchOutcome::Applied {
            operation: envelope.operation.clone(),
            record_id: record.id,
        })
    }

    async fn upsert(
        &self,
        envelope: &ChangeEnvelope,
        event_type: EventType,
    ) -> Result<EventRecord, DispatchError> {
        let record = map_image(envelope, ImageSide::After)?;
        debug!(id = record.id, event_type = event_type.as_str(), "Handling CDC change");
        self.handler.on_create_or_update(&record, event_type).await?;
        Ok(record)
    }
}

fn map_image(envelope: &ChangeEnvelope, side: ImageSide) -> Result<EventRecord, DispatchError> {
    let image = envelope
        .image(side)
        .ok_or(DispatchError::MissingImage(side.as_str()))?;
    EventRecord::deserialize(image).map_err(|source| DispatchError::Mapping {
        image: side.as_str(),
        source,
    })
}

/// Returns the `id` of an image when present, for log context only.
pub fn image_id(image: Option<&Value>) -> Option<i64> {
    image.and_then(|v| v.get("id")).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, Decoded};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<(String, i64)>>,
        fail_on_id: Option<i64>,
    }

    #[async_trait]
    impl ChangeHandler for RecordingHandler {
        async fn on_create_or_update(
            &self,
            record: &EventRecord,
            event_type: EventType,
        ) -> anyhow::Result<()> {
            if self.fail_on_id == Some(record.id) {
                anyhow::bail!("handler refused record {}", record.id);
            }
            self.calls
                .lock()
                .unwrap()
                .push((event_type.as_str().to_string(), record.id));
            Ok(())
        }

        async fn on_delete(&self, record: &EventRecord) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("DELETE".to_string(), record.id));
            Ok(())
        }
    }

    fn envelope(raw: &str) -> ChangeEnvelope {
        match decode(raw).unwrap() {
            Decoded::Change(envelope) => envelope,
            other => panic!("expected change, got {:?}", other),
        }
    }

    fn dispatcher(policy: UpdatePolicy) -> (Arc<RecordingHandler>, Dispatcher<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        (handler.clone(), Dispatcher::new(handler, policy))
    }

    #[tokio::test]
    async fn test_create_and_read_call_handler() {
        let (handler, dispatcher) = dispatcher(UpdatePolicy::Reject);

        dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"c","after":{"id":1,"payload":"a","status":"new"}}}"#,
            ))
            .await
            .unwrap();
        dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"r","after":{"id":2,"payload":"b","status":"new"}}}"#,
            ))
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("CREATE".to_string(), 1),
                ("READ (from snapshot)".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_maps_before_image() {
        let (handler, dispatcher) = dispatcher(UpdatePolicy::Reject);

        let outcome = dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"d","before":{"id":9,"payload":"z","status":"done"},"after":null}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                operation: Operation::Delete,
                record_id: 9
            }
        );
        assert_eq!(*handler.calls.lock().unwrap(), vec![("DELETE".to_string(), 9)]);
    }

    #[tokio::test]
    async fn test_update_rejected_by_default() {
        let (handler, dispatcher) = dispatcher(UpdatePolicy::default());

        let err = dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"u","after":{"id":1,"payload":"a","status":"s"}}}"#,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UpdateRejected));
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_applied_when_enabled() {
        let (handler, dispatcher) = dispatcher(UpdatePolicy::Apply);

        dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"u","after":{"id":4,"payload":"a","status":"s"}}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(*handler.calls.lock().unwrap(), vec![("UPDATE".to_string(), 4)]);
    }

    #[tokio::test]
    async fn test_unknown_operation_ignored() {
        let (handler, dispatcher) = dispatcher(UpdatePolicy::Reject);

        let outcome = dispatcher
            .dispatch(&envelope(r#"{"payload":{"op":"x","after":{"id":1}}}"#))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Ignored {
                code: "x".to_string()
            }
        );
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mapping_failure() {
        let (_, dispatcher) = dispatcher(UpdatePolicy::Reject);

        let err = dispatcher
            .dispatch(&envelope(r#"{"payload":{"op":"c","after":{"id":"one"}}}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Mapping { image: "after", .. }));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_dispatch_error() {
        let handler = Arc::new(RecordingHandler {
            fail_on_id: Some(3),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(handler, UpdatePolicy::Reject);

        let err = dispatcher
            .dispatch(&envelope(
                r#"{"payload":{"op":"c","after":{"id":3,"payload":"a","status":"s"}}}"#,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Handler(_)));
        assert!(err.to_string().contains("handler refused record 3"));
    }

    #[test]
    fn test_update_policy_deserialize() {
        let policy: UpdatePolicy = serde_json::from_str(r#""apply""#).unwrap();
        assert_eq!(policy, UpdatePolicy::Apply);
    }
}
