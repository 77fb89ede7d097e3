use anyhow::Context;
use async_trait::async_trait;
use cdc_pipeline::{DeadLetterEnvelope, DeadLetterPublisher};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::debug;

/// Publishes dead letters with a single delivery attempt.
pub struct KafkaDeadLetterPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaDeadLetterPublisher {
    pub fn new(brokers: &str, timeout: Duration) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .context("Failed to create Kafka producer for dead letters")?;

        Ok(Self { producer, timeout })
    }
}

pub(crate) fn to_owned_headers(envelope: &DeadLetterEnvelope) -> OwnedHeaders {
    envelope
        .headers()
        .into_iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key,
                value: Some(value.as_str()),
            })
        })
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetterPublisher {
    async fn publish(&self, envelope: &DeadLetterEnvelope) -> anyhow::Result<(i32, i64)> {
        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&envelope.dlt_topic)
            .partition(envelope.partition)
            .headers(to_owned_headers(envelope));
        if let Some(key) = envelope.key.as_deref() {
            record = record.key(key);
        }
        if let Some(payload) = envelope.payload.as_deref() {
            record = record.payload(payload);
        }

        debug!(
            dlt_topic = %envelope.dlt_topic,
            partition = envelope.partition,
            original_offset = envelope.offset,
            "Sending dead letter"
        );

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_pipeline::{headers, ConsumedRecord, DispatchError, FailureSignal, RecordError};
    use rdkafka::message::Headers;

    #[test]
    fn test_owned_headers_carry_failure_context() {
        let record = ConsumedRecord::new("events", 2, 30, "bad");
        let signal = FailureSignal::new(0, RecordError::Dispatch(DispatchError::UpdateRejected));
        let envelope = DeadLetterEnvelope::from_failure(&signal, &record);

        let owned = to_owned_headers(&envelope);

        assert_eq!(owned.count(), 6);
        let first = owned.get(0);
        assert_eq!(first.key, headers::EXCEPTION_MESSAGE);
        let partition = owned
            .iter()
            .find(|h| h.key == headers::ORIGINAL_PARTITION)
            .and_then(|h| h.value);
        assert_eq!(partition, Some(&b"2"[..]));
    }
}
