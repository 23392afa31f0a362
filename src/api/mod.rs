//! HTTP query API
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/data/` | Pivoted thermal zone and/or site rows |
//! | GET | `/temperatures/` | Outdoor vs indoor temperature per timestep |
//! | DELETE | `/data/` | Remove both measurements |
//! | GET | `/health` | Store (and broker) health |
//! | GET | `/metrics` | Prometheus text exposition |
//!
//! Every path is also routed without its trailing slash.
//!
//! `/metrics` exports the [`IngestionMetrics`] held in [`AppState`]; they only
//! count traffic when the same instance is shared with an in-process sink.

pub mod handlers;
pub mod timeline;
pub mod types;

pub use handlers::ApiError;
pub use timeline::build_timeline;

use crate::ingest::IngestionMetrics;
use crate::services::HealthChecker;
use crate::store::MetricStore;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Shared state handed to every handler
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub health: Arc<HealthChecker>,
    pub metrics: Arc<IngestionMetrics>,
}

impl AppState {
    /// State with a store-only health checker
    pub fn new(store: Arc<dyn MetricStore>, metrics: Arc<IngestionMetrics>) -> Self {
        Self {
            health: Arc::new(HealthChecker::with_store(store.clone())),
            store,
            metrics,
        }
    }
}

/// Build the router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    use handlers::*;

    Router::new()
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Data
        .route("/data/", get(get_data).delete(delete_data))
        .route("/data", get(get_data).delete(delete_data))
        .route("/temperatures/", get(get_temperatures))
        .route("/temperatures", get(get_temperatures))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Point};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2005, 1, 1, hour, 0, 0).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let points = vec![
            Point::new("thermal_zone")
                .tag("zone_id", "BLOCK1:OFFICE:X1F")
                .field("mean_air_temperature", 21.0)
                .field("cooling_rate", 0.0)
                .time(at(1)),
            Point::new("thermal_zone")
                .tag("zone_id", "BLOCK1:CORRIDOR:X1F")
                .field("mean_air_temperature", 19.0)
                .time(at(1)),
            Point::new("thermal_zone")
                .tag("zone_id", "BLOCK1:CORRIDOR:X1F")
                .field("mean_air_temperature", 18.5)
                .time(at(2)),
            Point::new("site_metrics")
                .field("outdoor_air_temp", -3.0)
                .field("facility_electricity", 1200.0)
                .time(at(1)),
            Point::new("site_metrics")
                .field("outdoor_air_temp", -4.0)
                .time(at(3)),
        ];
        store.write(&points).await.unwrap();
        store
    }

    async fn router() -> (Router, Arc<MemoryStore>) {
        let store = seeded_store().await;
        let state = AppState::new(store.clone(), Arc::new(IngestionMetrics::new()));
        (build_router(Arc::new(state)), store)
    }

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_data_without_type_returns_thermal_then_site() {
        let (app, _) = router().await;
        let (status, body) = send(app, Method::GET, "/data/").await;
        assert_eq!(status, StatusCode::OK);

        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["zone_id"], "BLOCK1:CORRIDOR:X1F");
        assert_eq!(rows[0]["time"], "2005-01-01T01:00:00Z");
        assert!(rows[0]["operative_temperature"].is_null());
        assert_eq!(rows[2]["zone_id"], "BLOCK1:OFFICE:X1F");
        assert_eq!(rows[2]["cooling_rate"], 0.0);
        assert!(rows[3].get("zone_id").is_none());
        assert_eq!(rows[3]["facility_electricity"], 1200.0);
    }

    #[tokio::test]
    async fn test_data_filters_by_type_zone_and_time() {
        let (app, _) = router().await;
        let (status, body) = send(app.clone(), Method::GET, "/data/?data_type=site_metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = send(
            app.clone(),
            Method::GET,
            "/data?data_type=thermal_zone&zone_id=BLOCK1:CORRIDOR:X1F&start_time=2005-01-01T02:00:00Z",
        )
        .await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["mean_air_temperature"], 18.5);

        let (_, body) = send(app, Method::GET, "/data/?end_time=2005-01-01T02:00:00").await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_data_rejects_bad_parameters() {
        let (app, _) = router().await;
        let (status, body) = send(app.clone(), Method::GET, "/data/?data_type=weather").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("weather"));

        let (status, body) = send(app, Method::GET, "/data/?start_time=last-tuesday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("start_time"));
    }

    #[tokio::test]
    async fn test_temperatures_per_zone() {
        let (app, _) = router().await;
        let (status, body) = send(app, Method::GET, "/temperatures/").await;
        assert_eq!(status, StatusCode::OK);

        let steps = body.as_array().unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0]["outdoor_temp"], -3.0);
        assert_eq!(steps[0]["indoor_temps"]["BLOCK1:OFFICE:X1F"], 21.0);
        assert_eq!(steps[0]["indoor_temps"]["BLOCK1:CORRIDOR:X1F"], 19.0);
        assert!(steps[1]["outdoor_temp"].is_null());
        assert_eq!(steps[2]["time"], "2005-01-01T03:00:00Z");
        assert!(steps[2]["indoor_temps"].is_null());
    }

    #[tokio::test]
    async fn test_temperatures_aggregate() {
        let (app, _) = router().await;
        let (_, body) = send(app.clone(), Method::GET, "/temperatures/?aggregate=true").await;
        assert_eq!(body[0]["indoor_temps"], 20.0);
        assert_eq!(body[1]["indoor_temps"], 18.5);

        let (status, _) = send(app, Method::GET, "/temperatures?aggregate=perhaps").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_clears_everything() {
        let (app, store) = router().await;
        let (status, body) = send(app.clone(), Method::DELETE, "/data/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "All data has been deleted successfully");
        assert!(store.is_empty());

        let (_, body) = send(app, Method::GET, "/data/").await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (app, _) = router().await;
        let (status, body) = send(app.clone(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("building_telemetry_messages_received_total"));
    }

    #[tokio::test]
    async fn test_metrics_serve_shared_counters() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestionMetrics::new());
        let app = build_router(Arc::new(AppState::new(store, metrics.clone())));
        metrics.record_received();
        metrics.record_written(1);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("building_telemetry_messages_received_total 1"));
        assert!(text.contains("building_telemetry_points_written_total 1"));
    }
}
