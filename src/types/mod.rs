//! Shared data structures for the clinical decision support pipeline:
//! - Intake snapshots (patient, vitals, medications, symptoms)
//! - Case lifecycle and escalation binding
//! - Analyzer results and the fused risk assessment
//! - Specialist advice
//! - Case event bus messages
//! - SBAR handover
//! - Audit records

mod patient;
mod case;
mod assessment;
mod events;
mod handover;
mod audit;

pub use patient::*;
pub use case::*;
pub use assessment::*;
pub use events::*;
pub use handover::*;
pub use audit::*;
