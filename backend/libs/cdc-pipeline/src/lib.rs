//! # CDC Batch Pipeline
//!
//! Processes batches of Debezium change records for the `events` table with
//! per-record failure isolation. A record that cannot be decoded or handled is
//! republished to a dead-letter topic (`<topic>.DLT`, same partition) while the
//! rest of its batch is processed normally.
//!
//! ## Flow
//!
//! ```text
//! batch ─► BatchWalker ─► decode ─► Dispatcher ─► ChangeHandler
//!              │
//!              └─ FailureSignal(position) ─► drain task ─► DeadLetterRouter ─► <topic>.DLT
//! ```
//!
//! - Tombstones (`{"payload":null}` or an empty record) and connector
//!   heartbeats are skipped with a warning.
//! - Unknown operation codes are logged and ignored.
//! - Every other decode or dispatch error becomes a positional
//!   [`FailureSignal`]; the walker keeps going.
//! - Dead-letter publishing has zero retries. If it fails the batch is not
//!   committable and [`BatchAck::take_failure`] yields the error.
//!
//! ## Usage
//!
//! ```ignore
//! use cdc_pipeline::{
//!     BatchCoordinator, BatchWalker, DeadLetterRouter, Dispatcher, UpdatePolicy,
//! };
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::new(Arc::new(my_handler), UpdatePolicy::Apply);
//! let coordinator = BatchCoordinator::new(
//!     Arc::new(BatchWalker::new(dispatcher)),
//!     Arc::new(DeadLetterRouter::new(my_publisher)),
//! );
//!
//! let ack = coordinator.handle_batch(records).await;
//! if ack.is_committable() {
//!     // commit offsets
//! }
//! ```
//!
//! The crate has no Kafka dependency. Transport code supplies
//! [`ConsumedRecord`]s and a [`DeadLetterPublisher`].

mod batch;
mod coordinator;
mod dead_letter;
mod dispatcher;
mod envelope;
mod error;
mod metrics;
mod observer;

pub use batch::{BatchReport, BatchWalker, ConsumedRecord, FailureSignal, FailureSink};
pub use coordinator::{BatchAck, BatchCoordinator};
pub use dead_letter::{
    derive_dlt_topic, headers, original_topic, DeadLetterDelivery, DeadLetterEnvelope,
    DeadLetterPublisher, DeadLetterRouter, DLT_SUFFIX,
};
pub use dispatcher::{
    ChangeHandler, DispatchOutcome, Dispatcher, EventRecord, EventType, UpdatePolicy,
};
pub use envelope::{
    decode, decode_bytes, ChangeEnvelope, Decoded, ImageSide, Operation, SoftSkip, SourceInfo,
};
pub use error::{DecodeError, DispatchError, RecordError, RouterPublishError};
pub use metrics::PipelineMetrics;
pub use observer::{AlertSink, DeadLetterNotice, LogAlertSink};
