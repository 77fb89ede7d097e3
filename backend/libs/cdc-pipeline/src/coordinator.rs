//! Couples the batch walker with dead-letter routing.
//!
//! Failure signals go through a channel to a drain task that routes them in
//! order while the walker moves on to the next records.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::batch::{BatchReport, BatchWalker, ConsumedRecord, FailureSignal};
use crate::dead_letter::{DeadLetterDelivery, DeadLetterPublisher, DeadLetterRouter};
use crate::dispatcher::ChangeHandler;
use crate::error::RouterPublishError;

/// Result of handling one batch
#[derive(Debug)]
pub struct BatchAck {
    pub report: BatchReport,
    pub dead_lettered: Vec<DeadLetterDelivery>,
    pub publish_failures: Vec<RouterPublishError>,
}

impl BatchAck {
    /// True when every failed position reached its dead-letter topic
    pub fn is_committable(&self) -> bool {
        self.publish_failures.is_empty() && self.dead_lettered.len() == self.report.failed.len()
    }

    pub fn take_failure(&mut self) -> Option<RouterPublishError> {
        if self.publish_failures.is_empty() {
            None
        } else {
            Some(self.publish_failures.remove(0))
        }
    }
}

pub struct BatchCoordinator<H, P> {
    walker: Arc<BatchWalker<H>>,
    router: Arc<DeadLetterRouter<P>>,
}

impl<H, P> Clone for BatchCoordinator<H, P> {
    fn clone(&self) -> Self {
        Self {
            walker: self.walker.clone(),
            router: self.router.clone(),
        }
    }
}

impl<H, P> BatchCoordinator<H, P>
where
    H: ChangeHandler,
    P: DeadLetterPublisher + 'static,
{
    pub fn new(walker: Arc<BatchWalker<H>>, router: Arc<DeadLetterRouter<P>>) -> Self {
        Self { walker, router }
    }

    pub async fn handle_batch(&self, records: Vec<ConsumedRecord>) -> BatchAck {
        let records = Arc::new(records);
        let (tx, rx) = mpsc::unbounded_channel();

        let drain = tokio::spawn(drain_failures(self.router.clone(), records.clone(), rx));

        let report = self.walker.process_batch(&records, &tx).await;
        drop(tx);

        let (dead_lettered, publish_failures) = match drain.await {
            Ok(routed) => routed,
            Err(e) => (
                Vec::new(),
                vec![RouterPublishError::Aborted(e.to_string())],
            ),
        };

        debug!(
            size = report.size,
            dispatched = report.dispatched,
            ignored = report.ignored,
            skipped = report.skipped,
            failed = report.failed.len(),
            dead_lettered = dead_lettered.len(),
            "Batch handled"
        );

        BatchAck {
            report,
            dead_lettered,
            publish_failures,
        }
    }
}

async fn drain_failures<P: DeadLetterPublisher>(
    router: Arc<DeadLetterRouter<P>>,
    records: Arc<Vec<ConsumedRecord>>,
    mut rx: mpsc::UnboundedReceiver<FailureSignal>,
) -> (Vec<DeadLetterDelivery>, Vec<RouterPublishError>) {
    let mut delivered = Vec::new();
    let mut failures = Vec::new();

    while let Some(signal) = rx.recv().await {
        if !failures.is_empty() {
            // Batch will be redelivered; routing the rest now would duplicate them.
            warn!(
                position = signal.position,
                "Not dead-lettering record after an earlier publish failure in this batch"
            );
            continue;
        }

        let Some(record) = records.get(signal.position) else {
            failures.push(RouterPublishError::UnknownPosition(signal.position));
            continue;
        };

        match router.route(&signal, record).await {
            Ok(delivery) => delivered.push(delivery),
            Err(e) => failures.push(e),
        }
    }

    (delivered, failures)
}
