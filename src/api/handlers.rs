use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{Alert, AlertId};
use crate::model::{MetricSnapshot, MonitoredProfile};
use crate::service::{AlertReport, GrowthReport, MonitorService, ProfileStatus, ServiceError, ServiceStats};

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<MonitorService>,
}

const DEFAULT_HISTORY_DAYS: i64 = 30;
const DEFAULT_GROWTH_DAYS: u32 = 30;
const MAX_GROWTH_DAYS: u32 = 365;

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn source_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.check_source().await?;
    Ok(Json(serde_json::json!({ "status": "connected" })))
}

// ============================================================================
// Profiles
// ============================================================================

pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Json<Vec<MonitoredProfile>> {
    Json(state.service.profiles())
}

pub async fn profile_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ProfileStatus>, ApiError> {
    Ok(Json(state.service.profile_status(&key)?))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub profile: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub snapshots: Vec<MetricSnapshot>,
}

pub async fn profile_history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params
        .from
        .unwrap_or(to - Duration::days(DEFAULT_HISTORY_DAYS));
    if from > to {
        return Err(ApiError::BadRequest(format!(
            "'from' ({}) is after 'to' ({})",
            from.to_rfc3339(),
            to.to_rfc3339()
        )));
    }

    let snapshots = state.service.history(&key, from, to)?;
    Ok(Json(HistoryResponse {
        profile: key,
        from,
        to,
        count: snapshots.len(),
        snapshots,
    }))
}

pub async fn profile_alerts(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Vec<AlertReport>>, ApiError> {
    Ok(Json(state.service.alerts(&key)?))
}

#[derive(Deserialize)]
pub struct GrowthParams {
    pub days: Option<u32>,
}

pub async fn profile_growth(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<GrowthParams>,
) -> Result<Json<GrowthReport>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_GROWTH_DAYS);
    if days == 0 || days > MAX_GROWTH_DAYS {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_GROWTH_DAYS
        )));
    }
    Ok(Json(state.service.growth(&key, days)?))
}

#[derive(Deserialize)]
pub struct AlertUpdate {
    pub enabled: bool,
}

pub async fn update_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(update): Json<AlertUpdate>,
) -> Result<Json<Alert>, ApiError> {
    Ok(Json(state.service.set_alert_enabled(AlertId(id), update.enabled)?))
}

pub async fn check_profile(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.check_now(&key)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": key })),
    ))
}

// ============================================================================
// Stats
// ============================================================================

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<ServiceStats> {
    Json(state.service.stats())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidProfile(_)
            | ServiceError::ProfileDisabled(_)
            | ServiceError::Alert(_) => ApiError::BadRequest(message),
            ServiceError::ProfileNotFound(_)
            | ServiceError::AlertNotFound(_)
            | ServiceError::UnknownOwner(_) => ApiError::NotFound(message),
            ServiceError::Directory(_) | ServiceError::Queue(_) | ServiceError::Source(_) => {
                ApiError::Unavailable(message)
            }
            ServiceError::Config(_) | ServiceError::Notifier(_) | ServiceError::AlreadyStarted => {
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
