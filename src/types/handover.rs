//! SBAR handover: the four-field structured summary handed to a specialist.

use serde::{Deserialize, Serialize};

/// Situation / Background / Assessment / Recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SbarHandover {
    pub situation: String,
    pub background: String,
    pub assessment: String,
    pub recommendation: String,
}
