//! Metrics registration and the scrape endpoint

use actix_web::{web, HttpResponse};
use cdc_pipeline::PipelineMetrics;
use prometheus::{Encoder, TextEncoder};

use crate::error::Result;

/// Register the pipeline counters on the default registry
pub fn init_metrics(service: &str) -> Result<PipelineMetrics> {
    let metrics = PipelineMetrics::new(service)?;
    Ok(metrics)
}

/// Render every metric on the default registry in the text exposition format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub async fn serve_metrics() -> HttpResponse {
    match gather_metrics() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(serve_metrics))
        .route("/health", web::get().to(|| async { "OK" }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_metrics_endpoint_serves_pipeline_counters() {
        let metrics = init_metrics("event-processor-service").unwrap();
        metrics.dead_lettered.inc();

        let app = test::init_service(App::new().configure(configure_routes)).await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("cdc_dead_lettered_total"));
        assert!(body.contains("cdc_batches_committed_total"));
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(App::new().configure(configure_routes)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
