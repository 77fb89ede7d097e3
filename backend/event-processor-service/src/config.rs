use cdc_pipeline::{derive_dlt_topic, UpdatePolicy};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Service configuration, read from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Kafka brokers (KAFKA_BROKERS)
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    /// Debezium topic `<server>.<schema>.<table>` (CDC_TOPIC)
    #[serde(default = "default_cdc_topic")]
    pub cdc_topic: String,

    #[serde(default = "default_cdc_consumer_group")]
    pub cdc_consumer_group: String,

    #[serde(default = "default_dlt_consumer_group")]
    pub dlt_consumer_group: String,

    /// Run the dead-letter observer alongside the main consumer
    #[serde(default = "default_true")]
    pub dlt_observer_enabled: bool,

    /// Max records per polled batch
    #[serde(default = "default_max_batch_size")]
    pub cdc_max_batch_size: usize,

    /// How long to wait for more records before handling a partial batch
    #[serde(default = "default_batch_linger_ms")]
    pub cdc_batch_linger_ms: u64,

    #[serde(default = "default_dlt_publish_timeout_ms")]
    pub dlt_publish_timeout_ms: u64,

    /// Grace period for in-flight dead-letter publishes on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub cdc_update_policy: UpdatePolicy,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Port for `/metrics` and `/health` (METRICS_PORT)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_cdc_topic() -> String {
    "postgrescdc.events.events".to_string()
}

fn default_cdc_consumer_group() -> String {
    "event-processor-group".to_string()
}

fn default_dlt_consumer_group() -> String {
    "dlt-processor-group".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    500
}

fn default_batch_linger_ms() -> u64 {
    100
}

fn default_dlt_publish_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_metrics_port() -> u16 {
    9090
}

impl ProcessorConfig {
    /// Load from `.env` (if present) and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka_brokers.trim().is_empty() {
            return Err(AppError::Config("KAFKA_BROKERS must not be empty".to_string()));
        }
        if self.cdc_topic.trim().is_empty() {
            return Err(AppError::Config("CDC_TOPIC must not be empty".to_string()));
        }
        if self.cdc_max_batch_size == 0 {
            return Err(AppError::Config(
                "CDC_MAX_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dlt_topic(&self) -> String {
        derive_dlt_topic(&self.cdc_topic)
    }

    pub fn batch_linger(&self) -> Duration {
        Duration::from_millis(self.cdc_batch_linger_ms)
    }

    pub fn dlt_publish_timeout(&self) -> Duration {
        Duration::from_millis(self.dlt_publish_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
