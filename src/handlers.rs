//! HTTP surface for dashboards.
//!
//! Every data request is answered from the cache. Only a cold start, where a
//! report has never been fetched, waits on the upstream.

use crate::cache::coordinator::RefreshCoordinator;
use crate::cache::freshness::CacheEntry;
use crate::error::SalesfeedError;
use crate::metrics::SharedMetrics;
use crate::services::splendid::PRODUCT_DATE_WISE_SALE;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
    pub metrics: SharedMetrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/data", get(data_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/cache-status", get(cache_status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    #[serde(rename = "reportType")]
    report_type: Option<String>,
}

impl ReportParams {
    fn report(&self) -> &str {
        self.report_type.as_deref().unwrap_or(PRODUCT_DATE_WISE_SALE)
    }
}

/// Serializes the shared entry's records without copying them
struct Records(Arc<CacheEntry>);

impl Serialize for Records {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.records.serialize(serializer)
    }
}

async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cache_duration = state.coordinator.cache().cache_duration().as_secs();
    Json(json!({
        "status": "running",
        "message": "Sales dashboard data service is running",
        "api": "Splendid Accounts report API",
        "endpoints": {
            "data": "/api/data?reportType=ProductDateWiseSale",
            "refresh": "/api/refresh?reportType=ProductDateWiseSale (POST)",
            "cache_status": "/api/cache-status",
            "health": "/health",
            "metrics": "/metrics",
        },
        "cache_duration": format!("{} seconds", cache_duration),
    }))
}

async fn data_handler(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Records>, SalesfeedError> {
    let entry = state.coordinator.read(params.report()).await?;
    Ok(Json(Records(entry)))
}

async fn refresh_handler(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Response {
    let report = params.report();
    info!(report = report, "Manual refresh requested");

    match state.coordinator.force_refresh(report).await {
        Ok(entry) => Json(json!({
            "status": "success",
            "message": "Data refreshed successfully",
            "records": entry.records.len(),
            "date": entry.cache_date.to_string(),
        }))
        .into_response(),
        Err(e @ SalesfeedError::UnknownReport(_)) => e.into_response(),
        Err(e) => {
            warn!(report = report, error = %e, "Manual refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": "Failed to refresh data",
                })),
            )
                .into_response()
        }
    }
}

async fn cache_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = Local::now();
    let today = now.date_naive();
    let cache = state.coordinator.cache();
    let duration_secs = cache.cache_duration().as_secs();

    let mut caches = Map::new();
    for (report, entry) in cache.entries().await {
        let age_seconds = entry.age_secs(now);
        let age_minutes = (age_seconds as f64 / 60.0 * 10.0).round() / 10.0;
        caches.insert(
            report,
            json!({
                "cached_date": entry.cache_date.to_string(),
                "cache_time": entry.fetched_at.format(TIMESTAMP_FORMAT).to_string(),
                "age_seconds": age_seconds,
                "age_minutes": age_minutes,
                "records": entry.records.len(),
                "is_fresh": (age_seconds as u64) < duration_secs,
                "is_today": entry.cache_date == today,
            }),
        );
    }

    Json(json!({
        "current_time": now.format(TIMESTAMP_FORMAT).to_string(),
        "current_date": today.to_string(),
        "cache_duration_seconds": duration_secs,
        "caches": Value::Object(caches),
    }))
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let reports_cached = state.coordinator.cache().len().await;
    let status = if reports_cached > 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "reports_cached": reports_cached,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.coordinator.cache().entries().await;
    state.metrics.update_cache_metrics(&entries, Local::now());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
