//! REST/WS API module using Axum
//!
//! Provides the external surface of the decision support service:
//! - `/api/v1/analyze/risk` - hybrid risk assessment
//! - `/api/v1/escalate` - specialist escalation with magic link + SBAR
//! - `/api/v1/specialist/*` - token-authenticated portal and advice
//! - `/api/v1/cases*` - PHW case listing, detail, lifecycle
//! - `/ws/case/{id}` - live case events
//!
//! Every error renders as `{ "detail": "..." }` with the status mapped from
//! the service error kind.

pub mod auth;
pub mod handlers;
mod routes;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::bus::CaseEventBus;
use crate::engine::DecisionEngine;
use crate::error::ServiceError;
use crate::handover::HandoverGenerator;
use crate::store::CaseStore;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<CaseStore>,
    pub engine: DecisionEngine,
    pub handover: Arc<HandoverGenerator>,
    pub bus: Arc<CaseEventBus>,
    pub started_at: DateTime<Utc>,
}

/// Create the complete application router
pub fn create_app(state: ApiState) -> Router {
    let cors = CorsLayer::permissive();
    let body_limit = crate::config::get().server.body_limit_bytes;

    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::ws_routes(state))
        .layer(axum::middleware::from_fn(auth::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
}

// ============================================================================
// Error Rendering
// ============================================================================

/// API error: a status code plus the `detail` string rendered to the client
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            detail: detail.into(),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            detail: detail.into(),
        }
    }

    /// Portal reads render an invalid token as 404 (the link is the auth;
    /// an invalid link is simply not found), everything else as its default
    /// mapping.
    pub fn for_portal(err: ServiceError) -> Self {
        match err {
            ServiceError::TokenInvalid => Self::not_found("escalation link unknown or expired"),
            other => other.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self {
            status: err.status(),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail });
        (self.status, axum::Json(body)).into_response()
    }
}
