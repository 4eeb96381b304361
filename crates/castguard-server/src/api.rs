use crate::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use castguard_monitor::MonitorError;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_ALERT_LIMIT: usize = 50;
const MAX_ALERT_LIMIT: usize = 500;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(get_health))
        .route("/api/health/detailed", get(get_health_detailed))
        .route("/api/status", get(get_status))
        .route("/api/alerts", get(get_alerts))
        .route("/api/service/restart", post(restart_service))
        .route("/api/stream/cleanup", post(cleanup_stream))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health.snapshot(Utc::now()))
}

async fn get_health_detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health.detailed(Utc::now()))
}

/// 服务状态、输出统计和配置摘要
async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    let health = state.health.snapshot(now);
    let stream = state.health.stream();
    let config = &state.config;

    let (service, service_error) = match state.service.status().await {
        Ok(status) => (Some(status), None),
        Err(e) => {
            warn!("Failed to query service status: {}", e);
            (None, Some(e.to_string()))
        }
    };

    Json(serde_json::json!({
        "timestamp": now.to_rfc3339(),
        "service": service,
        "service_error": service_error,
        "stream": {
            "active": stream.fresh,
            "output_dir": config.stream.output_dir.display().to_string(),
            "playlist_exists": stream.playlist_exists,
            "segment_count": stream.segment_count,
            "total_size_mb": stream.total_size_mb(),
            "latest_segment": stream.latest_segment,
            "last_update": stream.last_update,
            "checked_at": stream.checked_at,
        },
        "config": {
            "fps": config.stream.fps,
            "width": config.stream.width,
            "height": config.stream.height,
            "bitrate": config.stream.bitrate,
            "keyframe_interval": config.stream.keyframe_interval,
            "segment_duration": config.stream.segment_duration,
            "max_restarts": config.stream.max_restarts,
            "max_errors": config.stream.max_errors,
            "live_streaming": config.stream.live_streaming.enabled,
            "auto_recovery": config.auto_recovery,
        },
        "health": health,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<usize>,
}

async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .min(MAX_ALERT_LIMIT);
    let alerts = state.dispatcher.recent(limit).await;
    let cooldowns = state.dispatcher.cooldown_states(Utc::now()).await;

    Json(serde_json::json!({
        "alerts": alerts,
        "cooldowns": cooldowns,
        "delivery_failures": state.dispatcher.delivery_failures(),
    }))
}

async fn restart_service(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.restart_now().await {
        Ok(()) => {
            info!("Service restarted via API");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Service restarted",
                })),
            )
        }
        Err(MonitorError::RecoveryInFlight) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "error": "A recovery action is already in progress",
            })),
        ),
        Err(e) => {
            error!("Manual restart failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn cleanup_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.cleanup_now().await {
        Ok(report) => {
            info!(removed = report.removed, "Stream cleanup via API");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "report": report,
                })),
            )
        }
        Err(e) => {
            error!("Stream cleanup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}
