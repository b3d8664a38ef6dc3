//! Intake snapshot types: patient demographics, vitals, medications, symptoms
//!
//! Everything in this module is an immutable snapshot taken at assessment
//! time. Range validation happens here, before any analyzer sees the data;
//! out-of-range vitals never reach the decision engine.

use serde::{Deserialize, Serialize};

// ============================================================================
// Patient Demographics
// ============================================================================

/// Patient sex as recorded at intake
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Other,
}

/// Vulnerability flags that gate condition-specific rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityFlag {
    Pregnant,
    Diabetic,
    Elderly,
    HeartDisease,
    Immunocompromised,
}

impl std::fmt::Display for VulnerabilityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnerabilityFlag::Pregnant => write!(f, "pregnant"),
            VulnerabilityFlag::Diabetic => write!(f, "diabetic"),
            VulnerabilityFlag::Elderly => write!(f, "elderly"),
            VulnerabilityFlag::HeartDisease => write!(f, "heart_disease"),
            VulnerabilityFlag::Immunocompromised => write!(f, "immunocompromised"),
        }
    }
}

/// Demographic snapshot captured per assessment, never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSnapshot {
    /// Age in years (0-150)
    pub age: u16,
    pub sex: Sex,
    /// Free-form geographic tags (village, district, catchment area)
    #[serde(default)]
    pub geo_tags: Vec<String>,
    /// Active vulnerability flags
    #[serde(default)]
    pub vulnerability_flags: Vec<VulnerabilityFlag>,
}

impl PatientSnapshot {
    pub fn has_flag(&self, flag: VulnerabilityFlag) -> bool {
        self.vulnerability_flags.contains(&flag)
    }

    /// Collect field-level validation errors (empty = valid)
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.age > 150 {
            errors.push(format!("patient.age {} outside range 0-150", self.age));
        }
        errors
    }
}

// ============================================================================
// Vitals
// ============================================================================

/// One immutable vitals reading
///
/// Required fields carry the declared clinical ranges; optional fields are
/// validated only when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Systolic blood pressure (40-350 mmHg)
    pub systolic_bp: u16,
    /// Diastolic blood pressure (20-250 mmHg)
    pub diastolic_bp: u16,
    /// Heart rate (20-350 bpm)
    pub heart_rate: u16,
    /// Respiratory rate (4-80 /min)
    pub respiratory_rate: u16,
    /// Oxygen saturation (50.0-100.0 %)
    pub spo2: f64,
    /// Body temperature (30.0-45.0 C)
    pub temperature: f64,
    /// Blood glucose (20-1000 mg/dL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_glucose_mgdl: Option<f64>,
    /// Body weight (kg)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    /// Glasgow Coma Scale (3-15)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_score: Option<u8>,
}

impl VitalsSnapshot {
    /// Collect field-level validation errors (empty = valid)
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(40..=350).contains(&self.systolic_bp) {
            errors.push(format!(
                "vitals.systolic_bp {} outside range 40-350 mmHg",
                self.systolic_bp
            ));
        }
        if !(20..=250).contains(&self.diastolic_bp) {
            errors.push(format!(
                "vitals.diastolic_bp {} outside range 20-250 mmHg",
                self.diastolic_bp
            ));
        }
        if !(20..=350).contains(&self.heart_rate) {
            errors.push(format!(
                "vitals.heart_rate {} outside range 20-350 bpm",
                self.heart_rate
            ));
        }
        if !(4..=80).contains(&self.respiratory_rate) {
            errors.push(format!(
                "vitals.respiratory_rate {} outside range 4-80 /min",
                self.respiratory_rate
            ));
        }
        if !(50.0..=100.0).contains(&self.spo2) {
            errors.push(format!("vitals.spo2 {} outside range 50.0-100.0 %", self.spo2));
        }
        if !(30.0..=45.0).contains(&self.temperature) {
            errors.push(format!(
                "vitals.temperature {} outside range 30.0-45.0 C",
                self.temperature
            ));
        }
        if let Some(glucose) = self.blood_glucose_mgdl {
            if !(20.0..=1000.0).contains(&glucose) {
                errors.push(format!(
                    "vitals.blood_glucose_mgdl {} outside range 20-1000 mg/dL",
                    glucose
                ));
            }
        }
        if let Some(gcs) = self.gcs_score {
            if !(3..=15).contains(&gcs) {
                errors.push(format!("vitals.gcs_score {} outside range 3-15", gcs));
            }
        }

        errors
    }
}

// ============================================================================
// Medications & Symptoms
// ============================================================================

/// One currently-taken medication as reported at intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationEntry {
    pub drug_name: String,
    /// Normalized drug code when the intake client resolved one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl MedicationEntry {
    pub fn validate(&self, index: usize) -> Vec<String> {
        let mut errors = Vec::new();
        if self.drug_name.trim().is_empty() {
            errors.push(format!("medications[{index}].drug_name is required"));
        }
        errors
    }
}

/// Reported symptom severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SymptomSeverity {
    Mild,
    Moderate,
    Severe,
}

impl Default for SymptomSeverity {
    fn default() -> Self {
        SymptomSeverity::Moderate
    }
}

/// One reported symptom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomEntry {
    pub symptom_name: String,
    /// Red-flag symptoms drive the rule guardrail straight to critical
    #[serde(default)]
    pub is_red_flag: bool,
    #[serde(default)]
    pub severity: SymptomSeverity,
    /// Duration in hours since onset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
}

impl SymptomEntry {
    pub fn validate(&self, index: usize) -> Vec<String> {
        let mut errors = Vec::new();
        if self.symptom_name.trim().is_empty() {
            errors.push(format!("symptoms[{index}].symptom_name is required"));
        }
        if let Some(hours) = self.duration_hours {
            if hours < 0.0 {
                errors.push(format!(
                    "symptoms[{index}].duration_hours {hours} must be >= 0"
                ));
            }
        }
        errors
    }

    /// Case-insensitive substring match against the symptom name
    pub fn name_contains(&self, needle: &str) -> bool {
        self.symptom_name.to_lowercase().contains(needle)
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

    #[test]
    fn test_normal_vitals_validate_clean() {
        assert!(normal_vitals().validate().is_empty());
    }

    #[test]
    fn test_out_of_range_vitals_enumerate_fields() {
        let mut vitals = normal_vitals();
        vitals.systolic_bp = 400;
        vitals.spo2 = 45.0;
        let errors = vitals.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("systolic_bp"));
        assert!(errors[1].contains("spo2"));
    }

    #[test]
    fn test_optional_vitals_validated_when_present() {
        let mut vitals = normal_vitals();
        vitals.gcs_score = Some(2);
        vitals.blood_glucose_mgdl = Some(1500.0);
        let errors = vitals.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_patient_age_bound() {
        let patient = PatientSnapshot {
            age: 151,
            sex: Sex::Other,
            geo_tags: Vec::new(),
            vulnerability_flags: Vec::new(),
        };
        assert_eq!(patient.validate().len(), 1);
    }

    #[test]
    fn test_symptom_duration_negative() {
        let symptom = SymptomEntry {
            symptom_name: "headache".to_string(),
            is_red_flag: false,
            severity: SymptomSeverity::Mild,
            duration_hours: Some(-1.0),
        };
        assert_eq!(symptom.validate(0).len(), 1);
    }
}
