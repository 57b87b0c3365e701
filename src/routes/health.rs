use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::db::HealthSnapshot;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/info", get(info))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn root(State(state): State<AppState>) -> Response {
    let db = state.db_proxy().map(|proxy| proxy.health_snapshot());
    let db_healthy = db.as_ref().map(|s| s.healthy).unwrap_or(false);

    let response = HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        database: match db {
            Some(_) if db_healthy => "connected",
            Some(_) => "unhealthy",
            None => "disconnected",
        },
        timestamp: now_iso(),
    };

    // The engine keeps answering from memory without a database, so a
    // degraded report still returns 200.
    (StatusCode::OK, Json(response)).into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let response = InfoResponse {
        service: "tutor-backend-rust",
        version: env_or_unknown("APP_VERSION"),
        environment: std::env::var("APP_ENV")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "development".to_string()),
        start_time: system_time_iso(state.started_at_system()),
        uptime: state.uptime_seconds(),
    };
    Json(response).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    let response = LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let snapshot = state.db_proxy().map(|proxy| proxy.health_snapshot());
    let cache_connected = match state.cache() {
        Some(cache) => Some(cache.is_connected().await),
        None => None,
    };

    let (status, status_code) = match &snapshot {
        Some(HealthSnapshot { healthy: true, .. }) => ("healthy", StatusCode::OK),
        Some(_) => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
        None => ("degraded", StatusCode::OK),
    };

    let response = ReadinessResponse {
        status,
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
        checks: ReadinessChecks {
            database: snapshot,
            cache: cache_connected,
        },
    };

    (status_code, Json(response)).into_response()
}

fn env_or_unknown(key: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn system_time_iso(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    service: &'static str,
    version: String,
    environment: String,
    start_time: String,
    uptime: u64,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    checks: ReadinessChecks,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<HealthSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<bool>,
}
