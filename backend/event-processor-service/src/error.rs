use cdc_pipeline::RouterPublishError;
use rdkafka::error::KafkaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// A failed record could not be dead-lettered; its batch was not committed
    #[error("Dead-letter error: {0}")]
    DeadLetter(#[from] RouterPublishError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
