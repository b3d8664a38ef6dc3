//! AEGIS-CDS - Clinical Decision Support & Escalation Service
//!
//! Hybrid triage engine for primary-health outreach: a deterministic rule
//! guardrail, a calibrated risk model with per-prediction attribution, and a
//! medication pattern engine are fused under defined override precedence.
//! High-risk cases escalate to a specialist through a time-bounded opaque
//! link with an SBAR handover, and advice streams back to the health worker
//! over a per-case event bus.
//!
//! Module map:
//! - [`types`] - intake snapshots, case lifecycle, assessments, advice, events
//! - [`engine`] - rule guardrail, risk model, medication engine, aggregator
//! - [`handover`] - SBAR generation with deterministic fallback
//! - [`store`] - transactional case store (sled) with audit trail
//! - [`token`] - escalation token mint/validate/revoke
//! - [`bus`] - per-case publish/subscribe
//! - [`api`] - HTTP/WS surface
//! - [`config`] - TOML/env deployment configuration

pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod handover;
pub mod store;
pub mod token;
pub mod types;
