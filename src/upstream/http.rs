//! HTTP forwarding to the storefront backend.
//!
//! # Responsibilities
//! - Send the normalized payload as query pairs or a JSON body
//! - Carry the client's end-to-end headers (credentials, cookies) upstream
//!
//! # Design Decisions
//! - Hop-by-hop headers, including any named in `Connection`, stay behind
//! - Body framing headers are rebuilt for the re-serialized payload

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use url::Url;

use crate::config::schema::UpstreamConfig;
use crate::http::request::X_REQUEST_ID;
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Forwards normalized payloads over a pooled hyper client.
pub struct HttpUpstream {
    base_url: String,
    client: Client<HttpConnector, Body>,
    max_body_bytes: usize,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        Url::parse(&config.base_url).map_err(|e| UpstreamError::Request(e.to_string()))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn build_request(&self, request: &UpstreamRequest) -> Result<Request<Body>, UpstreamError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let carries_body = !matches!(request.method, Method::GET | Method::HEAD | Method::DELETE);
        let body = if carries_body {
            let bytes = serde_json::to_vec(&request.payload)
                .map_err(|e| UpstreamError::Request(e.to_string()))?;
            Body::from(bytes)
        } else {
            if !request.payload.is_empty() {
                let mut pairs = url.query_pairs_mut();
                pairs.clear();
                for (key, value) in &request.payload {
                    pairs.append_pair(key, &query_value(value));
                }
            }
            Body::empty()
        };

        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(url.as_str())
            .header(header::ACCEPT, "application/json");
        if carries_body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if let Some(id) = &request.request_id {
            builder = builder.header(X_REQUEST_ID, id.as_str());
        }
        let mut outbound = builder
            .body(body)
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        copy_end_to_end(&request.headers, outbound.headers_mut());
        Ok(outbound)
    }
}

// Connection-scoped headers, plus the ones set above for the rebuilt body.
const NOT_FORWARDED: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "content-type",
    "content-encoding",
    "accept",
    "accept-encoding",
    X_REQUEST_ID,
];

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    let listed: Vec<String> = from
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    for (name, value) in from {
        let key = name.as_str();
        if NOT_FORWARDED.contains(&key) || listed.iter().any(|l| l == key) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let outbound = self.build_request(&request)?;

        tracing::debug!(
            operation = %request.operation,
            method = %request.method,
            uri = %outbound.uri(),
            "Forwarding to upstream"
        );

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = axum::body::to_bytes(Body::new(response.into_body()), self.max_body_bytes)
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?;

        if status.is_server_error() {
            tracing::warn!(operation = %request.operation, status = %status, "Upstream server error");
            return Err(UpstreamError::Status { status, body });
        }

        Ok(UpstreamResponse {
            status,
            body,
            content_type,
        })
    }
}
