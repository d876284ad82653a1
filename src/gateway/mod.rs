//! HTTP forwarding gateway.
//!
//! # Data Flow
//! ```text
//! ANY /call/{service}/{*path}
//!     → RequestSpec (method, query, forwarded headers, body)
//!     → GET/HEAD marked cacheable when the service caches reads
//!     → ServiceClient::call
//!     → upstream response, or ClientError mapped to a status code
//! ```
//!
//! # Error Mapping
//! - breaker open → 503
//! - network failure → 502, timeout → 504
//! - rate limited → 429 with `Retry-After`
//! - auth / validation → upstream status

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::any,
    Json, Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::client::error::ClientError;
use crate::client::request::{Method, RequestSpec, Response};
use crate::client::service::ServiceClient;
use crate::lifecycle::cancel::CancelToken;
use crate::resilience::classifier::ErrorCategory;

const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "content-length", "upgrade"];

#[derive(Clone)]
pub struct GatewayState {
    pub client: ServiceClient,
    /// Lower-cased names of inbound headers copied upstream.
    pub forward_headers: Arc<[String]>,
    /// In-flight calls abort when this fires.
    pub shutdown: Option<CancelToken>,
}

impl GatewayState {
    pub fn new(client: ServiceClient, forward_headers: &[String]) -> Self {
        Self {
            client,
            forward_headers: forward_headers.iter().map(|h| h.to_ascii_lowercase()).collect(),
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, token: CancelToken) -> Self {
        self.shutdown = Some(token);
        self
    }
}

pub fn setup_gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/call/{service}/{*path}", any(forward))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn forward(
    State(state): State<GatewayState>,
    Path((service, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: HttpMethod,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let method: Method = match method.as_str().parse() {
        Ok(m) => m,
        Err(e) => return error_body(StatusCode::METHOD_NOT_ALLOWED, e),
    };

    let Some(entry) = state.client.registry().get(&service) else {
        return error_body(
            StatusCode::NOT_FOUND,
            ClientError::UnknownService(service).to_string(),
        );
    };

    let mut spec = RequestSpec::new(method, format!("/{}", path));
    spec.query = parse_query(query.as_deref());
    spec.headers = forwarded_headers(&headers, &state.forward_headers);
    if !body.is_empty() {
        spec.body = Some(body.to_vec());
    }
    if method.is_read() && entry.descriptor().cache_reads {
        spec = spec.cacheable(None);
    }
    if let Some(token) = &state.shutdown {
        spec = spec.cancel_with(token.clone());
    }

    match state.client.call(&service, spec).await {
        Ok(response) => upstream_response(response),
        Err(e) => client_error_response(&e),
    }
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn forwarded_headers(headers: &HeaderMap, allowed: &[String]) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| allowed.iter().any(|a| a == name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn upstream_response(response: Response) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = (status, response.body).into_response();
    for (name, value) in &response.headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            out.headers_mut().insert(name, value);
        }
    }
    out
}

/// Status code returned to gateway clients for a failed call.
pub fn error_status(error: &ClientError) -> StatusCode {
    let upstream = |fallback: StatusCode| match error {
        ClientError::Transport {
            http_status: Some(code),
            ..
        } => StatusCode::from_u16(*code).unwrap_or(fallback),
        _ => fallback,
    };

    match error {
        ClientError::UnknownService(_) => StatusCode::NOT_FOUND,
        ClientError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ClientError::BreakerOpen { .. } | ClientError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::Transport { category, .. } => match category {
            ErrorCategory::Network => StatusCode::BAD_GATEWAY,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::Auth => upstream(StatusCode::UNAUTHORIZED),
            ErrorCategory::Validation => upstream(StatusCode::BAD_REQUEST),
            ErrorCategory::Incompatible | ErrorCategory::Unknown => upstream(StatusCode::BAD_GATEWAY),
        },
    }
}

fn client_error_response(error: &ClientError) -> HttpResponse {
    let mut response = (
        error_status(error),
        Json(serde_json::json!({
            "error": error.to_string(),
            "category": error.category(),
        })),
    )
        .into_response();

    if let ClientError::Transport {
        retry_after_hint: Some(hint),
        ..
    } = error
    {
        if let Ok(value) = HeaderValue::from_str(&hint.as_secs().max(1).to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}

fn error_body(status: StatusCode, message: String) -> HttpResponse {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
