//! HTTP endpoint handlers

use super::timeline::build_timeline;
use super::types::*;
use super::AppState;
use crate::error::StoreError;
use crate::ingest::metrics::CONTENT_TYPE;
use crate::types::{DataFilter, Measurement, TimeWindow};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// Errors
// =============================================================================

/// Failure returned to the client as `{"detail": ...}`
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request parameter (400)
    BadRequest(String),
    /// Store failure (500)
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Store request failed");
        ApiError::Store(e)
    }
}

fn time_param(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw.filter(|r| !r.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => parse_query_time(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {name} '{raw}'"))),
    }
}

fn window(start: Option<&str>, end: Option<&str>) -> Result<TimeWindow, ApiError> {
    Ok(TimeWindow::new(
        time_param("start_time", start)?,
        time_param("end_time", end)?,
    ))
}

// =============================================================================
// Data Handlers
// =============================================================================

/// `GET /data/`: pivoted rows of one or both measurements
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DataParams>,
) -> Result<Json<Vec<DataRow>>, ApiError> {
    let measurement = match params.data_type.as_deref() {
        None | Some("") => None,
        Some(name) => Some(Measurement::from_name(name).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "unknown data_type '{name}', expected thermal_zone or site_metrics"
            ))
        })?),
    };
    let window = window(params.start_time.as_deref(), params.end_time.as_deref())?;

    let mut rows = Vec::new();
    if matches!(measurement, None | Some(Measurement::ThermalZone)) {
        let filter = DataFilter::new(params.zone_id.clone(), window);
        rows.extend(state.store.thermal_zones(&filter).await?.into_iter().map(DataRow::Thermal));
    }
    if matches!(measurement, None | Some(Measurement::SiteMetrics)) {
        rows.extend(state.store.site_metrics(&window).await?.into_iter().map(DataRow::Site));
    }
    Ok(Json(rows))
}

/// `GET /temperatures/`: outdoor and indoor temperature per timestep
pub async fn get_temperatures(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TemperatureParams>,
) -> Result<Json<Vec<TimestepTemperature>>, ApiError> {
    let aggregate = match params.aggregate.as_deref() {
        None => false,
        Some(raw) => parse_flag(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid aggregate '{raw}'")))?,
    };
    let window = window(params.start_time.as_deref(), params.end_time.as_deref())?;

    let site = state.store.site_metrics(&window).await?;
    let indoor = state
        .store
        .zone_temperatures(&DataFilter::new(params.zone_id, window))
        .await?;

    Ok(Json(build_timeline(&site, &indoor, aggregate)))
}

/// `DELETE /data/`: remove both measurements
pub async fn delete_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.delete_all().await?;
    info!(store = state.store.backend(), "Deleted all measurements");
    Ok(Json(MessageResponse {
        message: "All data has been deleted successfully",
    }))
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// `GET /health`: 200 while operational, 503 otherwise
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.check_now().await;
    let status = if report.status.is_operational() {
        StatusCode::OK
    } else {
        warn!(status = ?report.status, "Health check failing");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: report.status,
            version: env!("CARGO_PKG_VERSION"),
            store: state.health.store_backend(),
            checks: report.checks,
        }),
    )
}

/// `GET /metrics`: prometheus text exposition
///
/// Counters reflect ingestion only when the state shares the sink's metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", CONTENT_TYPE)],
        state.metrics.export(),
    )
}
