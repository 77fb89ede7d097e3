//! rdkafka transport for the CDC pipeline.

pub mod consumer;
pub mod dlt_observer;
pub mod producer;
pub mod record;

pub use consumer::CdcBatchConsumer;
pub use dlt_observer::DeadLetterObserver;
pub use producer::KafkaDeadLetterPublisher;
