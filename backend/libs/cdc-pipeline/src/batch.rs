//! Batch walking with positional failure signalling.
//!
//! The walker never aborts a batch. Each record is decoded and dispatched in
//! delivered order; a record that fails is reported to a [`FailureSink`] by its
//! position and the walk continues with the next one.

use std::error::Error as StdError;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::dispatcher::{image_id, ChangeHandler, DispatchOutcome, Dispatcher};
use crate::envelope::{decode_bytes, Decoded};
use crate::error::RecordError;
use crate::metrics::PipelineMetrics;

/// A record as delivered by the transport, with its coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// Raw value; `None` for a transport tombstone
    pub payload: Option<Vec<u8>>,
}

impl ConsumedRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload.into()),
        }
    }

    pub fn tombstone(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Payload as text for logging; invalid UTF-8 is replaced.
    pub fn payload_lossy(&self) -> String {
        match &self.payload {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => "<null>".to_string(),
        }
    }
}

/// "Batch partially failed at position i"
#[derive(Debug)]
pub struct FailureSignal {
    /// Zero-based index into the batch
    pub position: usize,
    pub cause: RecordError,
    /// Rendered source chain of the cause, if it has one
    pub partial_cause: Option<String>,
}

impl FailureSignal {
    pub fn new(position: usize, cause: RecordError) -> Self {
        let partial_cause = render_source_chain(&cause);
        Self {
            position,
            cause,
            partial_cause,
        }
    }

    /// One-line failure reason
    pub fn reason(&self) -> String {
        self.cause.to_string()
    }

    /// Reason followed by the cause chain
    pub fn detail(&self) -> String {
        match &self.partial_cause {
            Some(chain) => format!("{}: {}\nCaused by: {}", self.cause.kind(), self.cause, chain),
            None => format!("{}: {}", self.cause.kind(), self.cause),
        }
    }
}

fn render_source_chain(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    if chain.is_empty() {
        None
    } else {
        Some(chain.join("\nCaused by: "))
    }
}

/// Receiver of positional failure signals
pub trait FailureSink: Send + Sync {
    fn raise(&self, signal: FailureSignal);
}

impl FailureSink for mpsc::UnboundedSender<FailureSignal> {
    fn raise(&self, signal: FailureSignal) {
        let position = signal.position;
        if self.send(signal).is_err() {
            error!(position, "Failure signal dropped: dead-letter routing has stopped");
        }
    }
}

/// Outcome of one walk over a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub size: usize,
    pub dispatched: usize,
    pub ignored: usize,
    pub skipped: usize,
    /// Failed positions in delivered order
    pub failed: Vec<usize>,
}

pub struct BatchWalker<H> {
    dispatcher: Dispatcher<H>,
    metrics: Option<PipelineMetrics>,
}

impl<H: ChangeHandler> BatchWalker<H> {
    pub fn new(dispatcher: Dispatcher<H>) -> Self {
        Self {
            dispatcher,
            metrics: None,
        }
    }

    pub fn new_with_metrics(dispatcher: Dispatcher<H>, metrics: PipelineMetrics) -> Self {
        Self {
            dispatcher,
            metrics: Some(metrics),
        }
    }

    pub async fn process_batch(
        &self,
        records: &[ConsumedRecord],
        sink: &dyn FailureSink,
    ) -> BatchReport {
        let mut report = BatchReport {
            size: records.len(),
            ..Default::default()
        };

        for (position, record) in records.iter().enumerate() {
            let envelope = match decode_bytes(record.payload.as_deref()) {
                Ok(Decoded::Change(envelope)) => envelope,
                Ok(Decoded::Skip(kind)) => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        position,
                        kind = %kind,
                        "Skipping CDC record without change content"
                    );
                    report.skipped += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.records_skipped.inc();
                    }
                    continue;
                }
                Err(e) => {
                    error!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        position,
                        error = %e,
                        record = %record.payload_lossy(),
                        "Failed to decode CDC record"
                    );
                    self.fail(&mut report, sink, position, e.into());
                    continue;
                }
            };

            match self.dispatcher.dispatch(&envelope).await {
                Ok(DispatchOutcome::Applied { .. }) => {
                    report.dispatched += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.records_dispatched.inc();
                    }
                }
                Ok(DispatchOutcome::Ignored { .. }) => {
                    report.ignored += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.records_ignored.inc();
                    }
                }
                Err(e) => {
                    error!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        position,
                        op = envelope.operation.code(),
                        record_id = ?image_id(envelope.after.as_ref().or(envelope.before.as_ref())),
                        table = ?envelope.table(),
                        ts_ms = ?envelope.ts_ms,
                        error = %e,
                        record = %record.payload_lossy(),
                        "Failed to process CDC record"
                    );
                    self.fail(&mut report, sink, position, e.into());
                }
            }
        }

        report
    }

    fn fail(
        &self,
        report: &mut BatchReport,
        sink: &dyn FailureSink,
        position: usize,
        cause: RecordError,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.records_failed.with_label_values(&[cause.kind()]).inc();
        }
        report.failed.push(position);
        sink.raise(FailureSignal::new(position, cause));
    }
}
