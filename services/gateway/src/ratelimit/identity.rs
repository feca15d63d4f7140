//! Caller identity used as the rate-limit key.
//!
//! The peer address from `ConnectInfo` wins; without it (embedded routers,
//! tests) the first `X-Forwarded-For` entry or `X-Real-IP` is used.
use crate::api::error::{ApiError, api_validation_error};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Largest body buffered to read a keying field.
pub const MAX_BUFFERED_BODY: usize = 64 * 1024;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    ClientIp,
    /// Client IP plus a top-level JSON body field, e.g. the account being
    /// acted on. The body is handed on to the route unchanged.
    ClientIpAndBodyField(String),
}

impl IdentitySource {
    pub async fn extract(&self, request: Request) -> Result<(Request, String), ApiError> {
        let ip = client_ip(&request);
        match self {
            IdentitySource::ClientIp => Ok((request, ip)),
            IdentitySource::ClientIpAndBodyField(field) => {
                let (parts, body) = request.into_parts();
                let bytes = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
                    .await
                    .map_err(|_| api_validation_error("request body too large or unreadable"))?;
                let identity = match body_field(&bytes, field) {
                    Some(value) => format!("{ip}|{value}"),
                    None => ip,
                };
                Ok((Request::from_parts(parts, Body::from(bytes)), identity))
            }
        }
    }
}

pub fn client_ip(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    forwarded
        .or(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn body_field(bytes: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let value = match value.get(field)? {
        serde_json::Value::String(text) => text.trim().to_lowercase(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}
