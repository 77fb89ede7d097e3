//! Event processor service
//!
//! Consumes Debezium change events for the `events` table, isolates
//! per-record failures to `<topic>.DLT`, and observes the dead-letter topic
//! for alerting.

pub mod config;
pub mod error;
pub mod handlers;
pub mod kafka;
pub mod metrics;
pub mod telemetry;

pub use config::{LogFormat, ProcessorConfig};
pub use error::{AppError, Result};
