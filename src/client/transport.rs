//! Transport seam and the HTTP implementation.
//!
//! # Responsibilities
//! - Resolve a `RequestSpec` against a `ServiceDescriptor` into a concrete request
//! - Perform one attempt of I/O
//! - Report I/O failures as `Failure`s the classifier understands
//!
//! Transports return any HTTP status as a `Response`; turning non-2xx into a
//! failure is the caller's job (`status_failure`).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::client::registry::ServiceDescriptor;
use crate::client::request::{Method, RequestSpec, Response};
use crate::resilience::classifier::Failure;

/// A request resolved against its service.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

/// Why a request path could not be resolved under its service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),

    #[error("path must stay under the service base address")]
    OutsideBase,

    #[error("path must not contain '.' or '..' segments")]
    DotSegment,
}

impl PreparedRequest {
    /// Join the path onto the base address, append query parameters and merge headers.
    ///
    /// The result always lies under `base_address`: absolute URLs, scheme-relative
    /// paths and dot segments (plain or percent-encoded) are rejected.
    pub fn resolve(descriptor: &ServiceDescriptor, spec: &RequestSpec) -> Result<Self, ResolveError> {
        let base = &descriptor.base_address;
        let relative = spec.path.trim_start_matches(|c: char| c == '/' || c == '\\');
        if Url::parse(relative).is_ok() {
            return Err(ResolveError::OutsideBase);
        }
        let path = relative.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        if path.split(|c: char| c == '/' || c == '\\').any(is_dot_segment) {
            return Err(ResolveError::DotSegment);
        }

        let mut url = base.join(relative)?;
        let contained = url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default()
            && url.path().starts_with(base.path());
        if !contained {
            return Err(ResolveError::OutsideBase);
        }
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(spec.query.iter());
        }

        let mut headers: BTreeMap<String, String> = descriptor
            .default_headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        headers.extend(
            spec.headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone())),
        );

        Ok(Self {
            method: spec.method,
            url,
            headers,
            body: spec.body.clone(),
        })
    }
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// One attempt of remote I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<Response, Failure>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn io_failure(e: &reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::new(format!("request timed out: {}", e))
    } else if e.is_connect() {
        Failure::new(format!("connection failed: {}", e))
    } else if e.is_builder() {
        Failure::new(format!("invalid request: {}", e))
    } else {
        Failure::new(format!("network error: {}", e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: PreparedRequest) -> Result<Response, Failure> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| io_failure(&e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| io_failure(&e))?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Turn a non-success response into a classifiable failure.
pub fn status_failure(response: &Response) -> Failure {
    let mut snippet = response.text();
    if snippet.len() > 200 {
        let mut cut = 200;
        while !snippet.is_char_boundary(cut) {
            cut -= 1;
        }
        snippet.truncate(cut);
    }

    let mut failure = Failure::new(format!("upstream returned {}: {}", response.status, snippet.trim()))
        .with_status(response.status);
    if let Some(hint) = response.header("retry-after").and_then(parse_retry_after) {
        failure = failure.with_retry_after(hint);
    }
    failure
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
