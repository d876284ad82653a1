use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::client::error::ClientError;
use crate::client::service::ServiceStatus;
use crate::resilience::circuit_breaker::{BreakerSnapshot, BreakerStatus};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: usize,
    pub open_breakers: usize,
    pub cache_entries: usize,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub prefix: String,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub prefix: String,
    pub removed: usize,
}

#[derive(Serialize)]
pub struct BreakerView {
    pub service: String,
    #[serde(flatten)]
    pub snapshot: BreakerSnapshot,
}

/// Admin-facing error body.
pub struct AdminError(ClientError);

impl From<ClientError> for AdminError {
    fn from(e: ClientError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClientError::UnknownService(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let services = state.client.services();
    let open_breakers = services
        .iter()
        .filter(|s| s.breaker.status != BreakerStatus::Closed)
        .count();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_breakers == 0 { "operational" } else { "degraded" },
        services: services.len(),
        open_breakers,
        cache_entries: state.client.cache().len(),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    Json(state.client.services())
}

pub async fn get_breaker(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerView>, AdminError> {
    let snapshot = state.client.breaker_status(&service)?;
    Ok(Json(BreakerView { service, snapshot }))
}

pub async fn reset_breaker(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerView>, AdminError> {
    let snapshot = state.client.reset_breaker(&service)?;
    tracing::info!(service = %service, "Breaker reset via admin API");
    Ok(Json(BreakerView { service, snapshot }))
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.client.cache_stats())
}

pub async fn invalidate_cache(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Json<InvalidateResponse> {
    let removed = state.client.invalidate_cache(&request.prefix);
    tracing::info!(prefix = %request.prefix, removed, "Cache invalidated via admin API");
    Json(InvalidateResponse {
        prefix: request.prefix,
        removed,
    })
}
