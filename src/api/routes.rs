//! API route definitions
//!
//! - /api/v1/analyze/risk          - hybrid risk assessment
//! - /api/v1/escalate              - mint magic link + SBAR handover
//! - /api/v1/specialist/portal/:t  - token-authenticated case bundle
//! - /api/v1/specialist/advice     - token-authenticated advice submission
//! - /api/v1/cases                 - PHW listing / detail / lifecycle
//! - /api/v1/health                - component health
//! - /ws/case/:case_id             - live case events

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::ws;
use super::ApiState;

/// All /api/v1 routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/analyze/risk", post(handlers::analyze_risk))
        .route("/escalate", post(handlers::escalate))
        .route("/specialist/portal/:token", get(handlers::specialist_portal))
        .route("/specialist/advice", post(handlers::submit_advice))
        .route("/cases", get(handlers::list_cases))
        .route("/cases/:case_id", get(handlers::get_case))
        .route("/cases/:case_id/advice", get(handlers::list_advice))
        .route("/cases/:case_id/close", post(handlers::close_case))
        .route("/cases/:case_id/cancel", post(handlers::cancel_case))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Live event routes (outside the /api/v1 prefix)
pub fn ws_routes(state: ApiState) -> Router {
    Router::new()
        .route("/ws/case/:case_id", get(ws::case_events))
        .with_state(state)
}
