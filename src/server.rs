//! HTTP façade: Prometheus text endpoint, JSON API, and the dashboard page.

use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::sampler::Sampler;
use crate::snapshot;
use crate::updater::{MetricsUpdater, Refresh};

/// Prometheus exposition format content type.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

/// Shared application state for the HTTP handlers.
pub struct AppState {
    pub updater: Arc<MetricsUpdater>,
    pub sampler: Arc<dyn Sampler>,
}

/// `GET /metrics`: refresh then render the registry.
///
/// Always responds 200. When a sampler call fails mid-refresh the registry
/// keeps its last successful values, so the scrape sees stale-but-valid data
/// instead of an error page.
pub async fn metrics(state: web::Data<AppState>) -> impl Responder {
    if state.updater.refresh() == Refresh::Partial {
        tracing::debug!("serving last known values after partial refresh");
    }
    HttpResponse::Ok()
        .content_type(METRICS_CONTENT_TYPE)
        .body(state.updater.render())
}

/// `GET /api/metrics`: fresh JSON snapshot, independent of the registry.
///
/// Unlike `/metrics` there is no cached fallback, so a sampler failure
/// surfaces as a 500.
pub async fn api_metrics(state: web::Data<AppState>) -> HttpResponse {
    match snapshot::build_snapshot(state.sampler.as_ref()) {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(err) => {
            tracing::error!("snapshot failed: {err:#}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": err.to_string() }))
        }
    }
}

/// Any other path: the static dashboard page.
pub async fn dashboard() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(DASHBOARD_HTML)
}

/// Mount the exporter's routes on an actix-web app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics))
        .route("/api/metrics", web::get().to(api_metrics))
        .default_service(web::to(dashboard));
}
