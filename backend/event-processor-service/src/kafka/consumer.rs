use cdc_pipeline::{
    BatchAck, BatchCoordinator, ChangeHandler, ConsumedRecord, DeadLetterPublisher,
    PipelineMetrics, RouterPublishError,
};
use futures::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::error::{AppError, Result};
use crate::kafka::record::{group_by_partition, to_consumed_record};

/// Consumes the CDC topic in batches with manual offset commits.
///
/// Each polled batch is split by partition; partitions are handled
/// concurrently, records within a partition strictly in order. Offsets of a
/// partition are committed only when every failed record in it was
/// dead-lettered.
pub struct CdcBatchConsumer<H, P> {
    consumer: StreamConsumer,
    coordinator: BatchCoordinator<H, P>,
    topic: String,
    max_batch_size: usize,
    linger: Duration,
    shutdown_grace: Duration,
    metrics: Option<PipelineMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H, P> CdcBatchConsumer<H, P>
where
    H: ChangeHandler,
    P: DeadLetterPublisher + 'static,
{
    pub fn new(
        config: &ProcessorConfig,
        coordinator: BatchCoordinator<H, P>,
        metrics: Option<PipelineMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("group.id", &config.cdc_consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.cdc_topic.as_str()])?;

        info!(
            topic = %config.cdc_topic,
            group = %config.cdc_consumer_group,
            max_batch_size = config.cdc_max_batch_size,
            update_policy = ?config.cdc_update_policy,
            "CDC batch consumer subscribed"
        );

        Ok(Self {
            consumer,
            coordinator,
            topic: config.cdc_topic.clone(),
            max_batch_size: config.cdc_max_batch_size,
            linger: config.batch_linger(),
            shutdown_grace: config.shutdown_grace(),
            metrics,
            shutdown_rx,
        })
    }

    /// Run until shutdown or until a dead letter cannot be published.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let records = tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!(topic = %self.topic, "CDC consumer received shutdown signal");
                    break;
                }
                records = poll_batch(&self.consumer, self.max_batch_size, self.linger) => records,
            };

            if !records.is_empty() {
                self.handle_polled(records).await?;
            }

            if *self.shutdown_rx.borrow() {
                info!(topic = %self.topic, "CDC consumer stopping after shutdown");
                break;
            }
        }

        Ok(())
    }

    async fn handle_polled(&self, records: Vec<ConsumedRecord>) -> Result<()> {
        let batches = group_by_partition(records);
        debug!(partitions = batches.len(), "Handling polled batch");

        let work = join_all(batches.into_iter().map(|batch| {
            let coordinator = &self.coordinator;
            async move {
                let next_offset = batch.next_offset();
                let ack = coordinator.handle_batch(batch.records).await;
                (batch.topic, batch.partition, next_offset, ack)
            }
        }));

        let mut shutdown_rx = self.shutdown_rx.clone();
        let Some(results) = finish_within_grace(work, &mut shutdown_rx, self.shutdown_grace).await
        else {
            warn!("Shutdown grace period expired; batch left uncommitted");
            return Ok(());
        };

        let plan = plan_commits(results);
        for (topic, partition, offset) in &plan.commits {
            self.commit_offset(topic, *partition, *offset)?;
        }

        match plan.failure {
            Some(e) => Err(AppError::DeadLetter(e)),
            None => Ok(()),
        }
    }

    fn commit_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| {
                error!("Failed to commit Kafka offset: {}", e);
                AppError::Kafka(e)
            })?;

        if let Some(metrics) = &self.metrics {
            metrics.batches_committed.inc();
        }
        debug!(topic, partition, offset, "Committed offset");
        Ok(())
    }
}

/// A handled partition batch: topic, partition, next offset to commit, ack
pub(crate) type PartitionResult = (String, i32, Option<i64>, BatchAck);

/// Offsets to commit for one polled batch
#[derive(Debug, Default)]
pub(crate) struct CommitPlan {
    /// (topic, partition, next offset)
    pub commits: Vec<(String, i32, i64)>,
    /// First dead-letter failure among uncommittable partitions
    pub failure: Option<RouterPublishError>,
}

/// Commit only partitions whose failed records were all dead-lettered.
pub(crate) fn plan_commits(results: Vec<PartitionResult>) -> CommitPlan {
    let mut plan = CommitPlan::default();

    for (topic, partition, next_offset, mut ack) in results {
        if ack.is_committable() {
            if let Some(offset) = next_offset {
                plan.commits.push((topic, partition, offset));
            }
            continue;
        }

        log_uncommitted(&topic, partition, &ack);
        if plan.failure.is_none() {
            plan.failure = ack.take_failure();
        }
    }

    plan
}

fn log_uncommitted(topic: &str, partition: i32, ack: &BatchAck) {
    error!(
        topic,
        partition,
        failed = ack.report.failed.len(),
        dead_lettered = ack.dead_lettered.len(),
        publish_failures = ack.publish_failures.len(),
        "Partition batch not committed: dead-letter publish failed"
    );
}

/// Drive `work` to completion. Once shutdown is signalled it gets at most
/// `grace` more; `None` means the grace period expired first.
pub(crate) async fn finish_within_grace<F: Future>(
    work: F,
    shutdown_rx: &mut watch::Receiver<bool>,
    grace: Duration,
) -> Option<F::Output> {
    tokio::pin!(work);

    tokio::select! {
        output = &mut work => Some(output),
        Ok(()) = shutdown_rx.changed() => {
            warn!(
                grace_secs = grace.as_secs(),
                "Shutdown requested mid-batch, waiting for in-flight dead letters"
            );
            tokio::time::timeout(grace, &mut work).await.ok()
        }
    }
}

/// Wait for one record, then collect more until the batch is full or the
/// linger window closes.
async fn poll_batch(
    consumer: &StreamConsumer,
    max_batch_size: usize,
    linger: Duration,
) -> Vec<ConsumedRecord> {
    let mut records = Vec::with_capacity(max_batch_size);

    match consumer.recv().await {
        Ok(message) => records.push(to_consumed_record(&message)),
        Err(e) => {
            error!("Kafka consumer error: {}", e);
            tokio::time::sleep(Duration::from_secs(1)).await;
            return records;
        }
    }

    let deadline = Instant::now() + linger;
    while records.len() < max_batch_size {
        match tokio::time::timeout_at(deadline, consumer.recv()).await {
            Ok(Ok(message)) => records.push(to_consumed_record(&message)),
            Ok(Err(e)) => {
                warn!("Kafka consumer error while filling batch: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    records
}
