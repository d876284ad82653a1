//! Admin API.
//!
//! Bearer-authenticated JSON endpoints over the running `ServiceClient`:
//! breaker inspection and reset, cache statistics and invalidation.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::client::service::ServiceClient;

/// Shared state of the admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub client: ServiceClient,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(client: ServiceClient, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/breakers/{service}", get(get_breaker))
        .route("/admin/breakers/{service}/reset", post(reset_breaker))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
