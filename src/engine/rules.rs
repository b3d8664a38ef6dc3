//! Rule Guardrail - deterministic safety floor of the decision engine
//!
//! A pure, total function over (vitals, symptoms, vulnerability flags).
//! Every threshold is evaluated independently; each triggered threshold
//! contributes a human-readable reason and a candidate tier, and the result
//! tier is the worst candidate. A critical result suppresses the model tier
//! at aggregation (the probability is still reported for transparency).
//!
//! Thresholds here are part of the clinical safety contract and are NOT
//! operator-configurable.

use crate::types::{
    RiskLevel, RuleResult, SymptomEntry, SymptomSeverity, VitalsSnapshot, VulnerabilityFlag,
};

// ============================================================================
// Clinical Thresholds
// ============================================================================

/// Fixed clinical thresholds for the guardrail rules
pub mod clinical_thresholds {
    /// SpO2 below this is severe hypoxia (%)
    pub const SPO2_CRITICAL: f64 = 90.0;
    /// SpO2 below this (and >= SPO2_CRITICAL) is borderline hypoxia (%)
    pub const SPO2_BORDERLINE: f64 = 94.0;
    /// Systolic BP bounds (mmHg)
    pub const SBP_CRITICAL_LOW: u16 = 90;
    pub const SBP_CRITICAL_HIGH: u16 = 220;
    /// Systolic BP above this is severe hypertension (mmHg)
    pub const SBP_SEVERE_HYPERTENSION: u16 = 180;
    /// Diastolic BP above this is severe hypertension (mmHg)
    pub const DBP_SEVERE_HYPERTENSION: u16 = 120;
    /// Respiratory rate bounds (/min)
    pub const RR_CRITICAL_LOW: u16 = 8;
    pub const RR_CRITICAL_HIGH: u16 = 30;
    /// Heart rate bounds (bpm)
    pub const HR_CRITICAL_LOW: u16 = 40;
    pub const HR_CRITICAL_HIGH: u16 = 130;
    /// Heart rate above this is significant tachycardia (bpm)
    pub const HR_TACHYCARDIA: u16 = 120;
    /// Temperature bounds (C)
    pub const TEMP_CRITICAL_LOW: f64 = 35.0;
    pub const TEMP_CRITICAL_HIGH: f64 = 39.5;
    /// Temperature above this is high fever (C)
    pub const TEMP_HIGH_FEVER: f64 = 38.5;
    /// GCS below this is impaired consciousness
    pub const GCS_CRITICAL: u8 = 13;
    /// Pregnancy hypertension thresholds (mmHg)
    pub const PREECLAMPSIA_SBP: u16 = 140;
    pub const PREECLAMPSIA_DBP: u16 = 90;
    /// Blood glucose bounds (mg/dL)
    pub const GLUCOSE_CRITICAL_LOW: f64 = 54.0;
    pub const GLUCOSE_HIGH: f64 = 400.0;
}

use clinical_thresholds as t;

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate the guardrail. Deterministic, no I/O, total.
///
/// Reasons are emitted in rule-table order so equally-severe reasons keep a
/// stable ordering all the way into the recommendation text.
pub fn evaluate(
    vitals: &VitalsSnapshot,
    symptoms: &[SymptomEntry],
    flags: &[VulnerabilityFlag],
) -> RuleResult {
    let mut findings: Vec<(RiskLevel, String)> = Vec::new();

    // --- Critical rules, table order ---

    if vitals.spo2 < t::SPO2_CRITICAL {
        findings.push((
            RiskLevel::Critical,
            format!("SpO2 {:.1}% below {:.0}% — severe hypoxia", vitals.spo2, t::SPO2_CRITICAL),
        ));
    }

    if vitals.systolic_bp < t::SBP_CRITICAL_LOW {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Systolic BP {} mmHg below {} — hypotension/shock risk",
                vitals.systolic_bp,
                t::SBP_CRITICAL_LOW
            ),
        ));
    } else if vitals.systolic_bp > t::SBP_CRITICAL_HIGH {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Systolic BP {} mmHg above {} — hypertensive emergency",
                vitals.systolic_bp,
                t::SBP_CRITICAL_HIGH
            ),
        ));
    }

    if vitals.respiratory_rate < t::RR_CRITICAL_LOW {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Respiratory rate {}/min below {} — respiratory depression",
                vitals.respiratory_rate,
                t::RR_CRITICAL_LOW
            ),
        ));
    } else if vitals.respiratory_rate > t::RR_CRITICAL_HIGH {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Respiratory rate {}/min above {} — severe respiratory distress",
                vitals.respiratory_rate,
                t::RR_CRITICAL_HIGH
            ),
        ));
    }

    if vitals.heart_rate < t::HR_CRITICAL_LOW {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Heart rate {} bpm below {} — severe bradycardia",
                vitals.heart_rate,
                t::HR_CRITICAL_LOW
            ),
        ));
    } else if vitals.heart_rate > t::HR_CRITICAL_HIGH {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Heart rate {} bpm above {} — severe tachycardia",
                vitals.heart_rate,
                t::HR_CRITICAL_HIGH
            ),
        ));
    }

    if vitals.temperature < t::TEMP_CRITICAL_LOW {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Temperature {:.1} C below {:.1} — hypothermia",
                vitals.temperature,
                t::TEMP_CRITICAL_LOW
            ),
        ));
    } else if vitals.temperature > t::TEMP_CRITICAL_HIGH {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Temperature {:.1} C above {:.1} — hyperpyrexia",
                vitals.temperature,
                t::TEMP_CRITICAL_HIGH
            ),
        ));
    }

    if let Some(gcs) = vitals.gcs_score {
        if gcs < t::GCS_CRITICAL {
            findings.push((
                RiskLevel::Critical,
                format!("GCS {gcs} below {} — impaired consciousness", t::GCS_CRITICAL),
            ));
        }
    }

    for symptom in symptoms {
        if symptom.is_red_flag {
            findings.push((
                RiskLevel::Critical,
                format!("Red-flag symptom reported: {}", symptom.symptom_name),
            ));
        }
    }

    if flags.contains(&VulnerabilityFlag::Pregnant)
        && vitals.systolic_bp >= t::PREECLAMPSIA_SBP
        && vitals.diastolic_bp >= t::PREECLAMPSIA_DBP
    {
        findings.push((
            RiskLevel::Critical,
            format!(
                "Pregnancy hypertension: BP {}/{} mmHg at or above {}/{} — pre-eclampsia risk",
                vitals.systolic_bp,
                vitals.diastolic_bp,
                t::PREECLAMPSIA_SBP,
                t::PREECLAMPSIA_DBP
            ),
        ));
    }

    if let Some(glucose) = vitals.blood_glucose_mgdl {
        if glucose < t::GLUCOSE_CRITICAL_LOW {
            findings.push((
                RiskLevel::Critical,
                format!(
                    "Blood glucose {glucose:.0} mg/dL below {:.0} — severe hypoglycemia",
                    t::GLUCOSE_CRITICAL_LOW
                ),
            ));
        }
    }

    // --- High rules ---

    if vitals.heart_rate > t::HR_TACHYCARDIA && vitals.heart_rate <= t::HR_CRITICAL_HIGH {
        findings.push((
            RiskLevel::High,
            format!("Heart rate {} bpm above {} — tachycardia", vitals.heart_rate, t::HR_TACHYCARDIA),
        ));
    }

    if vitals.spo2 >= t::SPO2_CRITICAL && vitals.spo2 < t::SPO2_BORDERLINE {
        findings.push((
            RiskLevel::High,
            format!(
                "SpO2 {:.1}% in {:.0}-{:.0}% range — borderline hypoxia",
                vitals.spo2,
                t::SPO2_CRITICAL,
                t::SPO2_BORDERLINE
            ),
        ));
    }

    if vitals.temperature > t::TEMP_HIGH_FEVER && vitals.temperature <= t::TEMP_CRITICAL_HIGH {
        findings.push((
            RiskLevel::High,
            format!("Temperature {:.1} C above {:.1} — high fever", vitals.temperature, t::TEMP_HIGH_FEVER),
        ));
    }

    if let Some(glucose) = vitals.blood_glucose_mgdl {
        if glucose > t::GLUCOSE_HIGH {
            findings.push((
                RiskLevel::High,
                format!(
                    "Blood glucose {glucose:.0} mg/dL above {:.0} — marked hyperglycemia",
                    t::GLUCOSE_HIGH
                ),
            ));
        }
    }

    // --- Moderate rules ---

    if vitals.systolic_bp > t::SBP_SEVERE_HYPERTENSION && vitals.systolic_bp <= t::SBP_CRITICAL_HIGH
    {
        findings.push((
            RiskLevel::Moderate,
            format!(
                "Systolic BP {} mmHg above {} — severe hypertension",
                vitals.systolic_bp,
                t::SBP_SEVERE_HYPERTENSION
            ),
        ));
    }

    if vitals.diastolic_bp > t::DBP_SEVERE_HYPERTENSION {
        findings.push((
            RiskLevel::Moderate,
            format!(
                "Diastolic BP {} mmHg above {} — severe hypertension",
                vitals.diastolic_bp,
                t::DBP_SEVERE_HYPERTENSION
            ),
        ));
    }

    for symptom in symptoms {
        if !symptom.is_red_flag && symptom.severity == SymptomSeverity::Severe {
            findings.push((
                RiskLevel::Moderate,
                format!("Severe symptom reported: {}", symptom.symptom_name),
            ));
        }
    }

    // --- Fold ---

    if findings.is_empty() {
        return RuleResult::clean();
    }

    let level = findings.iter().map(|(l, _)| *l).max().unwrap_or(RiskLevel::Moderate);
    let reasons = findings.into_iter().map(|(_, reason)| reason).collect();

    RuleResult {
        triggered: true,
        risk_level: Some(level),
        reasons,
        override_ml: level == RiskLevel::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_vitals() -> VitalsSnapshot {
        VitalsSnapshot {
            systolic_bp: 122,
            diastolic_bp: 78,
            heart_rate: 72,
            respiratory_rate: 16,
            spo2: 98.0,
            temperature: 36.9,
            blood_glucose_mgdl: None,
            weight_kg: None,
            gcs_score: None,
        }
    }

    fn red_flag(name: &str) -> SymptomEntry {
        SymptomEntry {
            symptom_name: name.to_string(),
            is_red_flag: true,
            severity: SymptomSeverity::Severe,
            duration_hours: None,
        }
    }

    #[test]
    fn test_normal_vitals_do_not_trigger() {
        let result = evaluate(&normal_vitals(), &[], &[]);
        assert!(!result.triggered);
        assert!(result.risk_level.is_none());
        assert!(result.reasons.is_empty());
        assert!(!result.override_ml);
    }

    #[test]
    fn test_hypoxia_is_critical() {
        let mut vitals = normal_vitals();
        vitals.spo2 = 88.0;
        let result = evaluate(&vitals, &[], &[]);
        assert!(result.triggered);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        assert!(result.override_ml);
        assert!(result.reasons[0].contains("SpO2"));
    }

    #[test]
    fn test_hypotension_is_critical() {
        let mut vitals = normal_vitals();
        vitals.systolic_bp = 85;
        let result = evaluate(&vitals, &[], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        assert!(result.reasons[0].contains("Systolic BP 85"));
    }

    #[test]
    fn test_red_flag_symptom_is_critical() {
        let result = evaluate(&normal_vitals(), &[red_flag("chest pain")], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        assert!(result.reasons.iter().any(|r| r.contains("chest pain")));
    }

    #[test]
    fn test_pregnancy_hypertension_is_critical() {
        let mut vitals = normal_vitals();
        vitals.systolic_bp = 155;
        vitals.diastolic_bp = 100;
        let result = evaluate(&vitals, &[], &[VulnerabilityFlag::Pregnant]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        assert!(result.reasons.iter().any(|r| r.contains("Pregnancy hypertension")));

        // Same vitals without the flag: only severe-hypertension moderate paths
        let result = evaluate(&vitals, &[], &[]);
        assert_ne!(result.risk_level, Some(RiskLevel::Critical));
    }

    #[test]
    fn test_borderline_band_is_high() {
        let mut vitals = normal_vitals();
        vitals.spo2 = 91.5;
        let result = evaluate(&vitals, &[], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::High));

        vitals = normal_vitals();
        vitals.heart_rate = 125;
        assert_eq!(evaluate(&vitals, &[], &[]).risk_level, Some(RiskLevel::High));

        vitals = normal_vitals();
        vitals.temperature = 38.8;
        assert_eq!(evaluate(&vitals, &[], &[]).risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn test_worst_tier_wins() {
        let mut vitals = normal_vitals();
        vitals.spo2 = 91.5; // high
        vitals.systolic_bp = 85; // critical
        let result = evaluate(&vitals, &[], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        assert!(result.reasons.len() >= 2);
    }

    #[test]
    fn test_reasons_follow_table_order() {
        let mut vitals = normal_vitals();
        vitals.spo2 = 88.0;
        vitals.systolic_bp = 85;
        vitals.respiratory_rate = 34;
        let result = evaluate(&vitals, &[red_flag("difficulty breathing")], &[]);
        assert!(result.reasons[0].contains("SpO2"));
        assert!(result.reasons[1].contains("Systolic"));
        assert!(result.reasons[2].contains("Respiratory"));
        assert!(result.reasons[3].contains("Red-flag"));
    }

    #[test]
    fn test_severe_symptom_without_red_flag_is_moderate() {
        let symptom = SymptomEntry {
            symptom_name: "abdominal pain".to_string(),
            is_red_flag: false,
            severity: SymptomSeverity::Severe,
            duration_hours: Some(6.0),
        };
        let result = evaluate(&normal_vitals(), &[symptom], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Moderate));
        assert!(!result.override_ml);
    }

    #[test]
    fn test_hypoglycemia_is_critical() {
        let mut vitals = normal_vitals();
        vitals.blood_glucose_mgdl = Some(45.0);
        let result = evaluate(&vitals, &[], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
    }

    #[test]
    fn test_gcs_below_13_is_critical() {
        let mut vitals = normal_vitals();
        vitals.gcs_score = Some(12);
        let result = evaluate(&vitals, &[], &[]);
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
        // 13 itself is fine
        vitals.gcs_score = Some(13);
        assert!(!evaluate(&vitals, &[], &[]).triggered);
    }
}
