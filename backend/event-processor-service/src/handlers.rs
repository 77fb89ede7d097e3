//! Default change handler.

use async_trait::async_trait;
use cdc_pipeline::{ChangeHandler, EventRecord, EventType};
use tracing::info;

/// Logs each change; the service has no downstream store of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingChangeHandler;

#[async_trait]
impl ChangeHandler for LoggingChangeHandler {
    async fn on_create_or_update(
        &self,
        record: &EventRecord,
        event_type: EventType,
    ) -> anyhow::Result<()> {
        info!(
            event_type = event_type.as_str(),
            id = record.id,
            status = %record.status,
            payload = %record.payload,
            "Event changed"
        );
        Ok(())
    }

    async fn on_delete(&self, record: &EventRecord) -> anyhow::Result<()> {
        info!(id = record.id, status = %record.status, "Event deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_logging_handler_accepts_every_change() {
        let handler = LoggingChangeHandler;
        let record = EventRecord {
            id: 1,
            payload: "{}".to_string(),
            status: "NEW".to_string(),
        };

        assert_ok!(block_on(handler.on_create_or_update(&record, EventType::Read)));
        assert_ok!(block_on(handler.on_delete(&record)));
    }
}
