//! Dead-letter routing.
//!
//! A failed record is republished once, unmodified, to `<topic>.DLT` on the
//! same partition. There are no retries: a publish error is returned to the
//! caller and the batch must stay uncommitted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::batch::{ConsumedRecord, FailureSignal};
use crate::error::RouterPublishError;
use crate::metrics::PipelineMetrics;

pub const DLT_SUFFIX: &str = ".DLT";

/// Header names attached to every dead-lettered record
pub mod headers {
    pub const EXCEPTION_MESSAGE: &str = "exception-message";
    pub const EXCEPTION_STACKTRACE: &str = "exception-stacktrace";
    pub const ORIGINAL_TOPIC: &str = "original-topic";
    pub const ORIGINAL_PARTITION: &str = "original-partition";
    pub const ORIGINAL_OFFSET: &str = "original-offset";
    pub const DEAD_LETTERED_AT: &str = "dead-lettered-at";
}

pub fn derive_dlt_topic(topic: &str) -> String {
    format!("{}{}", topic, DLT_SUFFIX)
}

/// Source topic of a dead-letter topic, if the name carries the suffix.
pub fn original_topic(dlt_topic: &str) -> Option<&str> {
    dlt_topic.strip_suffix(DLT_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEnvelope {
    pub original_topic: String,
    pub dlt_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// Original record bytes, unmodified
    pub payload: Option<Vec<u8>>,
    pub failure_reason: String,
    pub failure_detail: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEnvelope {
    pub fn from_failure(signal: &FailureSignal, record: &ConsumedRecord) -> Self {
        Self {
            original_topic: record.topic.clone(),
            dlt_topic: derive_dlt_topic(&record.topic),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            payload: record.payload.clone(),
            failure_reason: signal.reason(),
            failure_detail: signal.detail(),
            dead_lettered_at: Utc::now(),
        }
    }

    /// Headers in publish order
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (headers::EXCEPTION_MESSAGE, self.failure_reason.clone()),
            (headers::EXCEPTION_STACKTRACE, self.failure_detail.clone()),
            (headers::ORIGINAL_TOPIC, self.original_topic.clone()),
            (headers::ORIGINAL_PARTITION, self.partition.to_string()),
            (headers::ORIGINAL_OFFSET, self.offset.to_string()),
            (headers::DEAD_LETTERED_AT, self.dead_lettered_at.to_rfc3339()),
        ]
    }
}

/// Where a dead letter ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterDelivery {
    pub position: usize,
    pub dlt_topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Outbound channel for dead letters.
///
/// Implementations make exactly one attempt and return the partition and
/// offset the record was written at.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> anyhow::Result<(i32, i64)>;
}

#[async_trait]
impl<T: DeadLetterPublisher + ?Sized> DeadLetterPublisher for Arc<T> {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> anyhow::Result<(i32, i64)> {
        (**self).publish(envelope).await
    }
}

pub struct DeadLetterRouter<P> {
    publisher: P,
    metrics: Option<PipelineMetrics>,
}

impl<P: DeadLetterPublisher> DeadLetterRouter<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            metrics: None,
        }
    }

    pub fn new_with_metrics(publisher: P, metrics: PipelineMetrics) -> Self {
        Self {
            publisher,
            metrics: Some(metrics),
        }
    }

    pub async fn route(
        &self,
        signal: &FailureSignal,
        record: &ConsumedRecord,
    ) -> Result<DeadLetterDelivery, RouterPublishError> {
        let envelope = DeadLetterEnvelope::from_failure(signal, record);

        match self.publisher.publish(&envelope).await {
            Ok((partition, offset)) => {
                info!(
                    topic = %envelope.original_topic,
                    dlt_topic = %envelope.dlt_topic,
                    partition,
                    original_offset = envelope.offset,
                    dlt_offset = offset,
                    position = signal.position,
                    "Record dead-lettered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.dead_lettered.inc();
                }
                Ok(DeadLetterDelivery {
                    position: signal.position,
                    dlt_topic: envelope.dlt_topic,
                    partition,
                    offset,
                })
            }
            Err(e) => {
                error!(
                    topic = %envelope.original_topic,
                    dlt_topic = %envelope.dlt_topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    error = %e,
                    "Failed to publish dead letter"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.dead_letter_publish_failures.inc();
                }
                Err(RouterPublishError::Publish {
                    dlt_topic: envelope.dlt_topic,
                    topic: envelope.original_topic,
                    partition: envelope.partition,
                    offset: envelope.offset,
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}
