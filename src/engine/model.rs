//! Risk Model - calibrated probabilistic scorer with per-prediction attribution
//!
//! Consumes an already-trained artifact: a calibrated logistic model stored
//! as JSON (version, intercept, per-feature weight/center/scale/label). The
//! artifact is loaded once at startup behind a health flag; when it is
//! absent or broken the component reports unavailable and the aggregator
//! degrades instead of failing.
//!
//! Attribution is the signed per-feature term of the log-odds sum. The
//! observable contract is the ordering of the top-k array, not that the
//! contributions sum to the probability.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::FeatureValue;
use crate::error::ServiceError;
use crate::types::{MlResult, RiskLevel, ShapFeature};

/// Number of attributions reported per prediction
pub const TOP_K: usize = 5;

// ============================================================================
// Artifact
// ============================================================================

/// One feature row of the trained artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFeature {
    /// Engineered feature name this weight binds to
    pub name: String,
    /// Human-readable label used in attributions
    pub label: String,
    pub weight: f64,
    /// Centering constant from training
    pub center: f64,
    /// Scaling constant from training (must be non-zero)
    pub scale: f64,
}

/// Trained model artifact as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub intercept: f64,
    pub features: Vec<ModelFeature>,
}

impl ModelArtifact {
    fn validate(&self) -> Result<(), String> {
        if self.features.is_empty() {
            return Err("artifact has no features".to_string());
        }
        for feature in &self.features {
            if feature.scale == 0.0 {
                return Err(format!("feature '{}' has zero scale", feature.name));
            }
            if !feature.weight.is_finite() || !feature.center.is_finite() {
                return Err(format!("feature '{}' has non-finite parameters", feature.name));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Model
// ============================================================================

/// The risk model component. Cheap to clone; the artifact is immutable.
#[derive(Debug, Clone)]
pub struct RiskModel {
    artifact: Option<std::sync::Arc<ModelArtifact>>,
}

impl RiskModel {
    /// Load the artifact from disk. A missing or invalid file yields an
    /// unavailable model, never an error; startup must not depend on it.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Risk model artifact not readable — model unavailable");
                return Self { artifact: None };
            }
        };

        let artifact: ModelArtifact = match serde_json::from_str(&contents) {
            Ok(a) => a,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Risk model artifact not parseable — model unavailable");
                return Self { artifact: None };
            }
        };

        if let Err(reason) = artifact.validate() {
            warn!(path = %path.display(), reason = %reason, "Risk model artifact rejected — model unavailable");
            return Self { artifact: None };
        }

        info!(
            version = %artifact.version,
            features = artifact.features.len(),
            "Risk model artifact loaded"
        );
        Self {
            artifact: Some(std::sync::Arc::new(artifact)),
        }
    }

    /// Construct directly from an artifact (tests, embedded defaults)
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, String> {
        artifact.validate()?;
        Ok(Self {
            artifact: Some(std::sync::Arc::new(artifact)),
        })
    }

    /// An explicitly-unavailable model
    pub fn unavailable() -> Self {
        Self { artifact: None }
    }

    pub fn is_available(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn version(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.version.as_str())
    }

    /// Score one engineered feature vector.
    ///
    /// Features absent from the vector contribute nothing; vector entries
    /// unknown to the artifact are ignored.
    pub fn predict(&self, features: &[FeatureValue]) -> Result<MlResult, ServiceError> {
        let artifact = self.artifact.as_ref().ok_or(ServiceError::Unavailable {
            component: "risk_model",
            reason: "model artifact not loaded".to_string(),
        })?;

        let values: HashMap<&str, f64> =
            features.iter().map(|f| (f.name, f.value)).collect();

        let mut z = artifact.intercept;
        let mut attributions: Vec<ShapFeature> = Vec::with_capacity(artifact.features.len());

        for feature in &artifact.features {
            let Some(&value) = values.get(feature.name.as_str()) else {
                continue;
            };
            let contribution = feature.weight * (value - feature.center) / feature.scale;
            z += contribution;
            attributions.push(ShapFeature {
                feature: feature.name.clone(),
                label: feature.label.clone(),
                value,
                contribution,
            });
        }

        let probability = sigmoid(z);

        // Stable sort keeps artifact order among exact ties
        attributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        attributions.truncate(TOP_K);

        let shap_text = summarize(&attributions);

        Ok(MlResult {
            risk_probability: probability,
            risk_level: RiskLevel::from_probability(probability),
            shap_features: attributions,
            shap_text,
            model_version: artifact.version.clone(),
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn direction(contribution: f64) -> &'static str {
    if contribution >= 0.0 {
        "raising risk"
    } else {
        "lowering risk"
    }
}

/// One-sentence summary of the top two attributions. Deterministic: the
/// same attribution array always produces byte-identical text.
fn summarize(top: &[ShapFeature]) -> String {
    match top {
        [] => "No attributable features.".to_string(),
        [only] => format!(
            "Prediction driven mainly by {} ({}).",
            only.label,
            direction(only.contribution)
        ),
        [first, second, ..] => format!(
            "Prediction driven mainly by {} ({}) and {} ({}).",
            first.label,
            direction(first.contribution),
            second.label,
            direction(second.contribution)
        ),
    }
}
