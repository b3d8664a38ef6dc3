//! Feature engineering for the risk model.
//!
//! Derives the model's input vector deterministically from the intake
//! snapshots. The same intake always yields the same vector, in the same
//! order; the model artifact binds weights to features by name.

use crate::types::{
    MedicationEntry, PatientSnapshot, SymptomEntry, SymptomSeverity, VitalsSnapshot,
};

/// One engineered feature value
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureValue {
    pub name: &'static str,
    pub value: f64,
}

/// Symptom name fragments treated as chest-pain-like
const CHEST_PAIN_MARKERS: [&str; 3] = ["chest pain", "chest tightness", "chest pressure"];

/// Symptom name fragments treated as dyspnea-like
const BREATHING_MARKERS: [&str; 4] = [
    "difficulty breathing",
    "shortness of breath",
    "breathless",
    "dyspnea",
];

/// Build the engineered feature vector.
pub fn build(
    patient: &PatientSnapshot,
    vitals: &VitalsSnapshot,
    medications: &[MedicationEntry],
    symptoms: &[SymptomEntry],
) -> Vec<FeatureValue> {
    let shock_index = vitals.heart_rate as f64 / (vitals.systolic_bp.max(1) as f64);

    let red_flag_count = symptoms.iter().filter(|s| s.is_red_flag).count() as f64;
    let severe_symptom_count = symptoms
        .iter()
        .filter(|s| s.severity == SymptomSeverity::Severe)
        .count() as f64;

    let has_chest_pain = symptoms
        .iter()
        .any(|s| CHEST_PAIN_MARKERS.iter().any(|m| s.name_contains(m)));
    let has_breathing_difficulty = symptoms
        .iter()
        .any(|s| BREATHING_MARKERS.iter().any(|m| s.name_contains(m)));

    // GCS 15 is intact; absent GCS is treated as intact (deficit 0)
    let gcs_deficit = vitals.gcs_score.map(|g| 15.0 - g as f64).unwrap_or(0.0);

    // Relative distance from euglycemia; 0 when not measured
    let glucose_deviation = vitals
        .blood_glucose_mgdl
        .map(|g| (g - 100.0).abs() / 100.0)
        .unwrap_or(0.0);

    vec![
        FeatureValue { name: "age_years", value: patient.age as f64 },
        FeatureValue { name: "shock_index", value: shock_index },
        FeatureValue { name: "spo2", value: vitals.spo2 },
        FeatureValue { name: "temperature", value: vitals.temperature },
        FeatureValue { name: "respiratory_rate", value: vitals.respiratory_rate as f64 },
        FeatureValue { name: "systolic_bp", value: vitals.systolic_bp as f64 },
        FeatureValue { name: "red_flag_count", value: red_flag_count },
        FeatureValue { name: "severe_symptom_count", value: severe_symptom_count },
        FeatureValue {
            name: "vulnerability_count",
            value: patient.vulnerability_flags.len() as f64,
        },
        FeatureValue { name: "has_chest_pain", value: has_chest_pain as u8 as f64 },
        FeatureValue {
            name: "has_breathing_difficulty",
            value: has_breathing_difficulty as u8 as f64,
        },
        FeatureValue { name: "gcs_deficit", value: gcs_deficit },
        FeatureValue { name: "glucose_deviation", value: glucose_deviation },
        FeatureValue { name: "med_count", value: medications.len() as f64 },
    ]
}
