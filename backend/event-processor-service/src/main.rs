//! Event Processor - Debezium CDC consumer with dead-letter isolation
//!
//! Consumes change events for the `events` table in batches. Records that fail
//! to decode or dispatch are republished unmodified to `<topic>.DLT` on the
//! same partition, and an optional observer logs everything that lands there.
//!
//! Environment variables:
//! - KAFKA_BROKERS: Kafka broker addresses (default: "localhost:9092")
//! - CDC_TOPIC: Debezium topic (default: "postgrescdc.events.events")
//! - CDC_CONSUMER_GROUP: Main consumer group (default: "event-processor-group")
//! - DLT_CONSUMER_GROUP: Observer consumer group (default: "dlt-processor-group")
//! - DLT_OBSERVER_ENABLED: Run the dead-letter observer (default: true)
//! - CDC_MAX_BATCH_SIZE: Max records per batch (default: 500)
//! - CDC_BATCH_LINGER_MS: Batch fill window (default: 100)
//! - DLT_PUBLISH_TIMEOUT_MS: Dead-letter send timeout (default: 5000)
//! - SHUTDOWN_GRACE_SECS: Grace period for in-flight dead letters (default: 10)
//! - CDC_UPDATE_POLICY: "reject" or "apply" (default: "reject")
//! - LOG_FORMAT: "text" or "json" (default: "text")
//! - METRICS_PORT: Port serving /metrics and /health (default: 9090)

use actix_web::{App, HttpServer};
use anyhow::Context;
use cdc_pipeline::{BatchCoordinator, BatchWalker, DeadLetterRouter, Dispatcher, LogAlertSink};
use event_processor_service::handlers::LoggingChangeHandler;
use event_processor_service::kafka::{
    CdcBatchConsumer, DeadLetterObserver, KafkaDeadLetterPublisher,
};
use event_processor_service::metrics::{configure_routes, init_metrics};
use event_processor_service::telemetry::init_tracing;
use event_processor_service::ProcessorConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "event-processor-service";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = ProcessorConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    info!(
        kafka_brokers = %config.kafka_brokers,
        topic = %config.cdc_topic,
        dlt_topic = %config.dlt_topic(),
        update_policy = ?config.cdc_update_policy,
        "Starting {}", SERVICE_NAME
    );

    let metrics = init_metrics(SERVICE_NAME)?;

    let metrics_server = HttpServer::new(|| App::new().configure(configure_routes))
        .workers(1)
        .disable_signals()
        .bind(("0.0.0.0", config.metrics_port))
        .context("Failed to bind metrics server")?
        .run();
    let metrics_handle = metrics_server.handle();
    actix_web::rt::spawn(metrics_server);
    info!(port = config.metrics_port, "Metrics endpoint listening");

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = signal_tx.send(true);
    });

    let dispatcher = Dispatcher::new(Arc::new(LoggingChangeHandler), config.cdc_update_policy);
    let walker = BatchWalker::new_with_metrics(dispatcher, metrics.clone());
    let publisher =
        KafkaDeadLetterPublisher::new(&config.kafka_brokers, config.dlt_publish_timeout())?;
    let router = DeadLetterRouter::new_with_metrics(publisher, metrics.clone());
    let coordinator = BatchCoordinator::new(Arc::new(walker), Arc::new(router));

    let observer_handle = if config.dlt_observer_enabled {
        let mut observer = DeadLetterObserver::new(
            &config.kafka_brokers,
            &config.dlt_consumer_group,
            &config.dlt_topic(),
            Arc::new(LogAlertSink),
            shutdown_rx.clone(),
        )?;
        Some(tokio::spawn(async move { observer.run().await }))
    } else {
        info!("Dead-letter observer disabled");
        None
    };

    let mut consumer =
        CdcBatchConsumer::new(&config, coordinator, Some(metrics), shutdown_rx.clone())?;

    info!("Starting CDC consumer loop");
    let result = consumer.run().await;

    // Stop the observer whether the consumer exited cleanly or not
    let _ = shutdown_tx.send(true);
    if let Some(handle) = observer_handle {
        let _ = handle.await;
    }
    metrics_handle.stop(true).await;

    if let Err(e) = result {
        error!(error = %e, "CDC consumer stopped with error");
        return Err(e.into());
    }

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
