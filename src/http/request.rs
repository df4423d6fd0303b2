//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a UUID v4 request ID when the client sent none
//! - Derive the caller identity (peer IP, plus forwarded user attributes
//!   when the deployment trusts them)
//! - Merge query, path parameters, and JSON body into one payload
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Body keys win over path parameters, which win over query keys
//! - A missing peer address maps to the unspecified IP rather than failing

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use serde_json::{Map, Value};
use thiserror::Error;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::server::AppState;
use crate::quota::CallerIdentity;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Authenticated user id, set by the auth layer in front of the guard.
pub const X_USER_ID: &str = "x-user-id";

/// "true" or "1" when the authenticated user is a seller.
pub const X_USER_SELLER: &str = "x-user-seller";

/// UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Identity from the peer address, and from the forwarded user headers when
/// `trust_headers` is set. Untrusted callers are always keyed by IP.
pub fn identity_from(peer: Option<IpAddr>, headers: &HeaderMap, trust_headers: bool) -> CallerIdentity {
    let ip = peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    if !trust_headers {
        return CallerIdentity::anonymous(ip);
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    match header(X_USER_ID) {
        Some(user_id) => {
            let is_seller = header(X_USER_SELLER)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);
            CallerIdentity::authenticated(ip, user_id, is_seller)
        }
        None => CallerIdentity::anonymous(ip),
    }
}

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(identity_from(
            peer,
            &parts.headers,
            state.config.quota.trust_identity_headers,
        ))
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Merge query pairs, path parameters, and the JSON body into one value.
///
/// A non-object body is returned as is so validation can report it.
pub fn merge_payload(
    query: Option<&str>,
    params: &HashMap<String, String>,
    body: &[u8],
) -> Result<Value, PayloadError> {
    let mut merged = Map::new();

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            merged.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    for (key, value) in params {
        merged.insert(key.clone(), Value::String(value.clone()));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(merged));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            merged.extend(fields);
            Ok(Value::Object(merged))
        }
        Ok(other) => Ok(other),
        Err(e) => Err(PayloadError::InvalidJson(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::CallerClass;
    use serde_json::json;

    #[test]
    fn test_merge_precedence() {
        let params = HashMap::from([("id".to_string(), "from-path".to_string())]);
        let merged = merge_payload(
            Some("page=2&id=from-query&q=mango%20box"),
            &params,
            br#"{"page": 3}"#,
        )
        .unwrap();

        assert_eq!(merged, json!({"page": 3, "id": "from-path", "q": "mango box"}));
    }

    #[test]
    fn test_empty_and_invalid_bodies() {
        let empty = merge_payload(None, &HashMap::new(), b"  ").unwrap();
        assert_eq!(empty, json!({}));

        let array = merge_payload(None, &HashMap::new(), b"[1]").unwrap();
        assert_eq!(array, json!([1]));

        assert!(merge_payload(None, &HashMap::new(), b"{oops").is_err());
    }

    #[test]
    fn test_identity_from_trusted_headers() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(identity_from(Some(ip), &headers, true).class(), CallerClass::Public);

        headers.insert(X_USER_ID, HeaderValue::from_static("u-42"));
        let identity = identity_from(Some(ip), &headers, true);
        assert_eq!(identity.class(), CallerClass::Authenticated);
        assert_eq!(identity.key(), "user:u-42");

        headers.insert(X_USER_SELLER, HeaderValue::from_static("TRUE"));
        assert_eq!(identity_from(Some(ip), &headers, true).class(), CallerClass::Seller);
    }

    #[test]
    fn test_untrusted_user_headers_are_ignored() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(X_USER_ID, HeaderValue::from_static("spoofed"));
        headers.insert(X_USER_SELLER, HeaderValue::from_static("true"));

        let identity = identity_from(Some(ip), &headers, false);
        assert_eq!(identity.class(), CallerClass::Public);
        assert_eq!(identity.key(), "ip:1.2.3.4");
    }

    #[test]
    fn test_request_ids_are_uuids() {
        let request = Request::new(());
        let id = MakeRequestUuid.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(crate::validation::rules::is_uuid(value));
    }
}
