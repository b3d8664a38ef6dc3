//! Request authentication and per-request context.
//!
//! PHW clients authenticate with a bearer key from the configured key table.
//! Specialist requests are authenticated by their escalation token (handled
//! in the handlers, not here). Every request gets a random request id that
//! flows into audit records and the `x-request-id` response header.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::ApiError;
use crate::store::AuditCtx;

/// Per-request id, generated at the edge
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Middleware: attach a request id to extensions and echo it in the response.
pub async fn request_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Authenticated PHW identity, resolved from the bearer key table
#[derive(Debug, Clone)]
pub struct PhwAuth {
    pub phw_id: String,
    pub name: String,
    pub facility: String,
    pub request_id: String,
    pub ip: Option<String>,
}

impl PhwAuth {
    pub fn audit_ctx(&self) -> AuditCtx {
        AuditCtx {
            user_id: self.phw_id.clone(),
            ip: self.ip.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

/// Extract the bearer value from an Authorization header, if present.
pub fn bearer_value(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub(super) fn request_id_of(parts: &Parts) -> String {
    parts
        .extensions
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub(super) fn client_ip(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for PhwAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(key) = bearer_value(parts) else {
            return Err(ApiError::unauthorized("missing bearer credential"));
        };

        let config = crate::config::get();
        let Some(entry) = config.auth.phw_keys.iter().find(|k| k.key == key) else {
            return Err(ApiError::unauthorized("unknown credential"));
        };

        Ok(PhwAuth {
            phw_id: entry.phw_id.clone(),
            name: entry.name.clone(),
            facility: entry.facility.clone(),
            request_id: request_id_of(parts),
            ip: client_ip(parts),
        })
    }
}
