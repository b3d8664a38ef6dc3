//! Hybrid decision engine: deterministic rule guardrail, probabilistic risk
//! model with attribution, medication pattern engine, and the aggregator
//! that fuses the three under defined override precedence.

pub mod rules;
pub mod features;
pub mod model;
pub mod medication;
pub mod aggregator;

pub use aggregator::{AnalysisOutcome, DecisionEngine};
pub use medication::MedicationEngine;
pub use model::{ModelArtifact, ModelFeature, RiskModel};
