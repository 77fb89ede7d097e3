//! Dead-letter observation contract.
//!
//! The observer consumes dead-letter topics for alerting only. It never
//! transforms, republishes or retries what it reads.

use async_trait::async_trait;
use tracing::error;

use crate::dead_letter::{headers, original_topic};

/// What an operator needs to know about one dead-lettered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterNotice {
    /// Dead-letter topic the record was read from
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub original_topic: Option<String>,
    pub original_offset: Option<i64>,
    pub failure_reason: Option<String>,
    pub failure_detail: Option<String>,
    pub payload: Option<String>,
}

impl DeadLetterNotice {
    /// Build a notice from a received record.
    ///
    /// `original-topic` falls back to the received topic name without its
    /// `.DLT` suffix.
    pub fn from_headers<'a, I>(
        topic: &str,
        partition: i32,
        offset: i64,
        record_headers: I,
        payload: Option<&[u8]>,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
    {
        let mut notice = Self {
            topic: topic.to_string(),
            partition,
            offset,
            original_topic: None,
            original_offset: None,
            failure_reason: None,
            failure_detail: None,
            payload: payload.map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        };

        for (key, value) in record_headers {
            let Some(value) = value.map(|v| String::from_utf8_lossy(v).into_owned()) else {
                continue;
            };
            match key {
                headers::ORIGINAL_TOPIC => notice.original_topic = Some(value),
                headers::ORIGINAL_OFFSET => notice.original_offset = value.parse().ok(),
                headers::EXCEPTION_MESSAGE => notice.failure_reason = Some(value),
                headers::EXCEPTION_STACKTRACE => notice.failure_detail = Some(value),
                _ => {}
            }
        }

        if notice.original_topic.is_none() {
            notice.original_topic = original_topic(topic).map(str::to_string);
        }

        notice
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, notice: &DeadLetterNotice) -> anyhow::Result<()>;
}

/// Writes every notice to the error log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, notice: &DeadLetterNotice) -> anyhow::Result<()> {
        error!(
            received_topic = %notice.topic,
            partition = notice.partition,
            offset = notice.offset,
            original_topic = ?notice.original_topic,
            original_offset = ?notice.original_offset,
            failure_reason = ?notice.failure_reason,
            failure_detail = ?notice.failure_detail,
            payload = ?notice.payload,
            "Dead letter received"
        );
        Ok(())
    }
}
