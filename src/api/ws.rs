//! Live case event transport: WebSocket binding of the case event bus.
//!
//! Auth is role-deriving: a PHW connects with its bearer credential and must
//! own the case; a specialist connects with `?token=<escalation token>`
//! bound to the same case. Events are forwarded best-effort; a subscriber
//! that lags the channel is disconnected rather than blocking publishers.
//! Client messages are ignored except close (and pongs, which axum answers
//! at the protocol layer).

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::auth;
use super::{ApiError, ApiState};
use crate::types::{CaseEvent, SubscriberRole};

/// GET /ws/case/{case_id}
pub async fn case_events(
    State(state): State<ApiState>,
    Path(case_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
    parts: Parts,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let role = authorize(&state, case_id, &params, &parts)?;
    Ok(upgrade.on_upgrade(move |socket| handle_socket(socket, state, case_id, role)))
}

/// Derive the subscriber role from the presented credential.
fn authorize(
    state: &ApiState,
    case_id: Uuid,
    params: &HashMap<String, String>,
    parts: &Parts,
) -> Result<SubscriberRole, ApiError> {
    // Specialist path: escalation token query parameter
    if let Some(presented) = params.get("token") {
        let case = state.store.validate_token(presented)?;
        if case.case_id != case_id {
            return Err(ApiError::forbidden("token is bound to a different case"));
        }
        return Ok(SubscriberRole::Specialist);
    }

    // PHW path: bearer credential, must own the case
    let Some(key) = auth::bearer_value(parts) else {
        return Err(ApiError::unauthorized("missing credential"));
    };
    let config = crate::config::get();
    let Some(entry) = config.auth.phw_keys.iter().find(|k| k.key == key) else {
        return Err(ApiError::unauthorized("unknown credential"));
    };
    let case = state
        .store
        .get_case(case_id)?
        .ok_or_else(|| ApiError::not_found("case not found"))?;
    if case.phw_id != entry.phw_id {
        return Err(ApiError::forbidden("case belongs to another health worker"));
    }
    Ok(SubscriberRole::Phw)
}

async fn handle_socket(socket: WebSocket, state: ApiState, case_id: Uuid, role: SubscriberRole) {
    let mut rx = state.bus.subscribe(case_id, role);
    let (mut sink, mut stream) = socket.split();

    let ping_period =
        std::time::Duration::from_secs(crate::config::get().events.ping_interval_secs);
    let mut ping = tokio::time::interval(ping_period);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it
    ping.tick().await;

    debug!(case_id = %case_id, role = ?role, "Live event subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                        // Keepalive counts from the last delivered event
                        ping.reset();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Slow subscriber: disconnect rather than block
                        warn!(case_id = %case_id, skipped, "Subscriber lagged; disconnecting");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = ping.tick() => {
                if send_event(&mut sink, &CaseEvent::Ping).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pongs and client chatter are ignored
                    Some(Err(e)) => {
                        debug!(case_id = %case_id, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    debug!(case_id = %case_id, role = ?role, "Live event subscriber disconnected");
}

async fn send_event(
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    event: &CaseEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}
