use cdc_pipeline::{AlertSink, DeadLetterNotice};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::kafka::record::header_pairs;

/// Independent consumer of the dead-letter topic, for alerting only.
pub struct DeadLetterObserver<S> {
    consumer: StreamConsumer,
    sink: Arc<S>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: AlertSink> DeadLetterObserver<S> {
    pub fn new(
        brokers: &str,
        group_id: &str,
        dlt_topic: &str,
        sink: Arc<S>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .create()?;

        consumer.subscribe(&[dlt_topic])?;
        info!(topic = %dlt_topic, group = %group_id, "Dead-letter observer subscribed");

        Ok(Self {
            consumer,
            sink,
            shutdown_rx,
        })
    }

    pub async fn run(&mut self) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!("Dead-letter observer received shutdown signal");
                    break;
                }
                message = self.consumer.recv() => message.map(|m| notice_for(&m)),
            };

            match received {
                Ok(notice) => {
                    if let Err(e) = self.sink.alert(&notice).await {
                        warn!(offset = notice.offset, "Dead-letter alert failed: {:#}", e);
                    }
                }
                Err(e) => {
                    error!("Dead-letter observer Kafka error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

fn notice_for<M: Message>(message: &M) -> DeadLetterNotice {
    DeadLetterNotice::from_headers(
        message.topic(),
        message.partition(),
        message.offset(),
        header_pairs(message),
        message.payload(),
    )
}
