//! Medication Engine - drug-drug, drug-condition and drug-symptom safety patterns
//!
//! The interaction table and drug class reference are read-only caches built
//! at process start. Reported drug names are normalized and matched against
//! the vocabulary exactly first, then by trigram similarity, so common
//! misspellings ("amoxicilin") still resolve.
//!
//! `override_triggered` is set on a warning when its severity is severe or
//! contraindicated, or when a named danger pattern matches; the aggregator
//! escalates on any overriding warning.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{
    MedWarning, MedicationEntry, SymptomEntry, VulnerabilityFlag, WarningKind, WarningSeverity,
};

/// Minimum trigram similarity accepted as a fuzzy drug-name match
const FUZZY_MATCH_THRESHOLD: f64 = 0.55;

// ============================================================================
// Name Normalization
// ============================================================================

fn non_alpha() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z]+").expect("static regex"))
}

/// Dosage/frequency tokens that intake clients commonly append to drug names
const NOISE_TOKENS: [&str; 10] = ["mg", "mcg", "ml", "od", "bd", "bid", "tds", "tid", "qds", "prn"];

/// Normalize a reported drug name: lowercase, strip digits/punctuation and
/// dosage tokens ("Atenolol 50mg OD" -> "atenolol").
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let cleaned = non_alpha().replace_all(&lowered, " ");
    cleaned
        .split_whitespace()
        .filter(|token| !NOISE_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trigram similarity between two normalized strings (Jaccard over padded
/// character trigrams).
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    fn trigrams(s: &str) -> BTreeSet<[char; 3]> {
        let padded: Vec<char> = std::iter::repeat(' ')
            .take(2)
            .chain(s.chars())
            .chain(std::iter::repeat(' ').take(2))
            .collect();
        padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
    }

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let ta = trigrams(a);
    let tb = trigrams(b);
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

// ============================================================================
// Reference Tables
// ============================================================================

/// Drug class identifiers used by condition and symptom rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DrugClass {
    Anticoagulant,
    Nsaid,
    BetaBlocker,
    AceInhibitor,
    Opioid,
    Hypoglycemic,
    Statin,
    Nitrate,
    Corticosteroid,
}

struct InteractionRow {
    drug_a: &'static str,
    drug_b: &'static str,
    severity: WarningSeverity,
    message: &'static str,
}

/// Pairwise interaction table, keyed by normalized names
const INTERACTIONS: &[InteractionRow] = &[
    InteractionRow { drug_a: "warfarin", drug_b: "aspirin", severity: WarningSeverity::Severe, message: "Combined anticoagulant and antiplatelet effect markedly increases bleeding risk" },
    InteractionRow { drug_a: "warfarin", drug_b: "ibuprofen", severity: WarningSeverity::Severe, message: "NSAID use with warfarin increases bleeding risk and may raise INR" },
    InteractionRow { drug_a: "warfarin", drug_b: "ciprofloxacin", severity: WarningSeverity::Moderate, message: "Ciprofloxacin potentiates warfarin; INR may rise" },
    InteractionRow { drug_a: "methotrexate", drug_b: "trimethoprim", severity: WarningSeverity::Contraindicated, message: "Additive folate antagonism causes severe myelosuppression" },
    InteractionRow { drug_a: "sildenafil", drug_b: "nitroglycerin", severity: WarningSeverity::Contraindicated, message: "PDE5 inhibitor with nitrate causes profound hypotension" },
    InteractionRow { drug_a: "sildenafil", drug_b: "isosorbide dinitrate", severity: WarningSeverity::Contraindicated, message: "PDE5 inhibitor with nitrate causes profound hypotension" },
    InteractionRow { drug_a: "digoxin", drug_b: "amiodarone", severity: WarningSeverity::Severe, message: "Amiodarone raises digoxin levels; toxicity risk" },
    InteractionRow { drug_a: "atenolol", drug_b: "verapamil", severity: WarningSeverity::Severe, message: "Beta-blocker with verapamil risks bradycardia and AV block" },
    InteractionRow { drug_a: "metoprolol", drug_b: "verapamil", severity: WarningSeverity::Severe, message: "Beta-blocker with verapamil risks bradycardia and AV block" },
    InteractionRow { drug_a: "simvastatin", drug_b: "clarithromycin", severity: WarningSeverity::Severe, message: "CYP3A4 inhibition raises statin levels; rhabdomyolysis risk" },
    InteractionRow { drug_a: "tramadol", drug_b: "sertraline", severity: WarningSeverity::Severe, message: "Serotonergic combination; serotonin syndrome risk" },
    InteractionRow { drug_a: "tramadol", drug_b: "fluoxetine", severity: WarningSeverity::Severe, message: "Serotonergic combination; serotonin syndrome risk" },
    InteractionRow { drug_a: "lisinopril", drug_b: "spironolactone", severity: WarningSeverity::Moderate, message: "ACE inhibitor with potassium-sparing diuretic; hyperkalemia risk" },
    InteractionRow { drug_a: "enalapril", drug_b: "spironolactone", severity: WarningSeverity::Moderate, message: "ACE inhibitor with potassium-sparing diuretic; hyperkalemia risk" },
    InteractionRow { drug_a: "spironolactone", drug_b: "potassium chloride", severity: WarningSeverity::Severe, message: "Potassium-sparing diuretic with potassium supplement; hyperkalemia risk" },
    InteractionRow { drug_a: "ciprofloxacin", drug_b: "theophylline", severity: WarningSeverity::Severe, message: "Ciprofloxacin raises theophylline levels; seizure risk" },
    InteractionRow { drug_a: "amlodipine", drug_b: "simvastatin", severity: WarningSeverity::Moderate, message: "Amlodipine raises simvastatin exposure; limit statin dose" },
    InteractionRow { drug_a: "aspirin", drug_b: "ibuprofen", severity: WarningSeverity::Mild, message: "Ibuprofen may blunt the antiplatelet effect of aspirin" },
];

const CLASS_MEMBERS: &[(DrugClass, &[&str])] = &[
    (DrugClass::Anticoagulant, &["warfarin", "heparin", "enoxaparin", "rivaroxaban", "apixaban", "dabigatran"]),
    (DrugClass::Nsaid, &["ibuprofen", "naproxen", "diclofenac", "aspirin", "indomethacin", "ketorolac"]),
    (DrugClass::BetaBlocker, &["atenolol", "metoprolol", "propranolol", "bisoprolol", "carvedilol"]),
    (DrugClass::AceInhibitor, &["lisinopril", "enalapril", "ramipril", "captopril"]),
    (DrugClass::Opioid, &["morphine", "tramadol", "codeine", "oxycodone", "pethidine"]),
    (DrugClass::Hypoglycemic, &["insulin", "glibenclamide", "gliclazide", "glimepiride", "glipizide"]),
    (DrugClass::Statin, &["simvastatin", "atorvastatin", "rosuvastatin"]),
    (DrugClass::Nitrate, &["nitroglycerin", "isosorbide dinitrate", "isosorbide mononitrate"]),
    (DrugClass::Corticosteroid, &["prednisolone", "dexamethasone", "hydrocortisone"]),
];

struct ConditionRule {
    class: DrugClass,
    flag: VulnerabilityFlag,
    severity: WarningSeverity,
    message: &'static str,
}

const CONDITION_RULES: &[ConditionRule] = &[
    ConditionRule { class: DrugClass::Anticoagulant, flag: VulnerabilityFlag::Pregnant, severity: WarningSeverity::Contraindicated, message: "Anticoagulant in pregnancy; teratogenic and bleeding risk" },
    ConditionRule { class: DrugClass::AceInhibitor, flag: VulnerabilityFlag::Pregnant, severity: WarningSeverity::Contraindicated, message: "ACE inhibitor in pregnancy; fetal renal toxicity" },
    ConditionRule { class: DrugClass::Statin, flag: VulnerabilityFlag::Pregnant, severity: WarningSeverity::Contraindicated, message: "Statin in pregnancy; contraindicated" },
    ConditionRule { class: DrugClass::Nsaid, flag: VulnerabilityFlag::Pregnant, severity: WarningSeverity::Severe, message: "NSAID in pregnancy; risk of premature ductus closure" },
    ConditionRule { class: DrugClass::Nsaid, flag: VulnerabilityFlag::HeartDisease, severity: WarningSeverity::Severe, message: "NSAID with heart disease; fluid retention and cardiovascular risk" },
    ConditionRule { class: DrugClass::BetaBlocker, flag: VulnerabilityFlag::Diabetic, severity: WarningSeverity::Moderate, message: "Beta-blocker may mask hypoglycemia symptoms in diabetes" },
    ConditionRule { class: DrugClass::Nsaid, flag: VulnerabilityFlag::Elderly, severity: WarningSeverity::Moderate, message: "NSAID in an elderly patient; GI bleeding and renal risk" },
    ConditionRule { class: DrugClass::Anticoagulant, flag: VulnerabilityFlag::Elderly, severity: WarningSeverity::Moderate, message: "Anticoagulant in an elderly patient; heightened bleeding and fall risk" },
    ConditionRule { class: DrugClass::Corticosteroid, flag: VulnerabilityFlag::Immunocompromised, severity: WarningSeverity::Moderate, message: "Corticosteroid deepens existing immunosuppression" },
];

struct SymptomRule {
    class: DrugClass,
    markers: &'static [&'static str],
    severity: WarningSeverity,
    /// Named danger pattern: forces override regardless of severity
    named_pattern: bool,
    message: &'static str,
}

const SYMPTOM_RULES: &[SymptomRule] = &[
    SymptomRule { class: DrugClass::Anticoagulant, markers: &["head injury", "head trauma", "hit head", "fall"], severity: WarningSeverity::Severe, named_pattern: true, message: "Anticoagulant with reported head injury; intracranial bleeding must be excluded" },
    SymptomRule { class: DrugClass::BetaBlocker, markers: &["dizziness", "fainting", "syncope", "slow heart"], severity: WarningSeverity::Severe, named_pattern: false, message: "Beta-blocker with bradycardia-like symptoms" },
    SymptomRule { class: DrugClass::BetaBlocker, markers: &["difficulty breathing", "shortness of breath", "wheez", "asthma"], severity: WarningSeverity::Severe, named_pattern: false, message: "Beta-blocker with respiratory symptoms; bronchospasm risk" },
    SymptomRule { class: DrugClass::Hypoglycemic, markers: &["confusion", "sweating", "tremor", "drowsiness"], severity: WarningSeverity::Severe, named_pattern: false, message: "Hypoglycemic agent with symptoms compatible with low blood sugar" },
    SymptomRule { class: DrugClass::Opioid, markers: &["difficulty breathing", "shortness of breath", "drowsiness"], severity: WarningSeverity::Severe, named_pattern: false, message: "Opioid with respiratory or sedation symptoms; respiratory depression risk" },
    SymptomRule { class: DrugClass::Nsaid, markers: &["black stool", "melena", "vomiting blood", "hematemesis"], severity: WarningSeverity::Severe, named_pattern: true, message: "NSAID with signs of GI bleeding" },
];

fn action_for(severity: WarningSeverity) -> &'static str {
    match severity {
        WarningSeverity::Mild => "Note in record; no immediate action required",
        WarningSeverity::Moderate => "Review at next clinical contact",
        WarningSeverity::Severe => "Hold drug pending clinician review",
        WarningSeverity::Contraindicated => "Stop drug and seek immediate clinician input",
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Read-only medication pattern engine, built once at startup
pub struct MedicationEngine {
    /// Pair lookup keyed by (min, max) of the normalized names
    interactions: HashMap<(String, String), (WarningSeverity, &'static str)>,
    /// Normalized name -> classes
    classes: HashMap<String, Vec<DrugClass>>,
    /// Full vocabulary for fuzzy matching, sorted for deterministic scans
    vocabulary: Vec<String>,
}

impl Default for MedicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MedicationEngine {
    pub fn new() -> Self {
        let mut interactions = HashMap::new();
        let mut vocabulary: BTreeSet<String> = BTreeSet::new();

        for row in INTERACTIONS {
            let key = pair_key(row.drug_a, row.drug_b);
            vocabulary.insert(row.drug_a.to_string());
            vocabulary.insert(row.drug_b.to_string());
            interactions.insert(key, (row.severity, row.message));
        }

        let mut classes: HashMap<String, Vec<DrugClass>> = HashMap::new();
        for (class, members) in CLASS_MEMBERS {
            for member in *members {
                vocabulary.insert(member.to_string());
                classes.entry(member.to_string()).or_default().push(*class);
            }
        }

        Self {
            interactions,
            classes,
            vocabulary: vocabulary.into_iter().collect(),
        }
    }

    /// Resolve a reported drug name to a vocabulary entry: exact match on the
    /// normalized name first, then best trigram match above the threshold.
    /// Unknown drugs resolve to their normalized form (no warnings match).
    pub fn resolve(&self, raw: &str) -> String {
        let normalized = normalize_name(raw);
        if normalized.is_empty() {
            return normalized;
        }
        if self.vocabulary.binary_search(&normalized).is_ok() {
            return normalized;
        }

        let mut best: Option<(f64, &String)> = None;
        for candidate in &self.vocabulary {
            let score = trigram_similarity(&normalized, candidate);
            let better = match best {
                Some((best_score, _)) => score > best_score,
                None => true,
            };
            if better {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, candidate)) if score >= FUZZY_MATCH_THRESHOLD => candidate.clone(),
            _ => normalized,
        }
    }

    /// Evaluate all three pattern families. Pure over its inputs; the
    /// reference tables are immutable.
    pub fn evaluate(
        &self,
        medications: &[MedicationEntry],
        flags: &[VulnerabilityFlag],
        symptoms: &[SymptomEntry],
    ) -> Vec<MedWarning> {
        // Resolve once, dedup while keeping deterministic order
        let resolved: Vec<String> = {
            let mut seen = BTreeSet::new();
            medications
                .iter()
                .map(|m| self.resolve(&m.drug_name))
                .filter(|name| !name.is_empty() && seen.insert(name.clone()))
                .collect()
        };

        let mut warnings = Vec::new();

        // Drug <-> drug
        for (i, a) in resolved.iter().enumerate() {
            for b in resolved.iter().skip(i + 1) {
                if let Some((severity, message)) = self.interactions.get(&pair_key(a, b)) {
                    let (drug1, drug2) = ordered(a, b);
                    warnings.push(build_warning(
                        drug1,
                        Some(drug2),
                        WarningKind::DrugDrug,
                        *severity,
                        message,
                        false,
                    ));
                }
            }
        }

        // Drug <-> condition
        for drug in &resolved {
            let Some(drug_classes) = self.classes.get(drug) else {
                continue;
            };
            for rule in CONDITION_RULES {
                if drug_classes.contains(&rule.class) && flags.contains(&rule.flag) {
                    warnings.push(build_warning(
                        drug,
                        None,
                        WarningKind::DrugCondition,
                        rule.severity,
                        rule.message,
                        false,
                    ));
                }
            }
        }

        // Drug <-> symptom
        for drug in &resolved {
            let Some(drug_classes) = self.classes.get(drug) else {
                continue;
            };
            for rule in SYMPTOM_RULES {
                if !drug_classes.contains(&rule.class) {
                    continue;
                }
                let matched = symptoms
                    .iter()
                    .any(|s| rule.markers.iter().any(|m| s.name_contains(m)));
                if matched {
                    warnings.push(build_warning(
                        drug,
                        None,
                        WarningKind::DrugSymptom,
                        rule.severity,
                        rule.message,
                        rule.named_pattern,
                    ));
                }
            }
        }

        sort_warnings(&mut warnings);
        warnings
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    let (x, y) = ordered(a, b);
    (x.to_string(), y.to_string())
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn build_warning(
    drug1: &str,
    drug2: Option<&str>,
    kind: WarningKind,
    severity: WarningSeverity,
    message: &str,
    named_pattern: bool,
) -> MedWarning {
    MedWarning {
        drug1: drug1.to_string(),
        drug2: drug2.map(str::to_string),
        kind,
        severity,
        message: message.to_string(),
        action_required: action_for(severity).to_string(),
        override_triggered: named_pattern || severity >= WarningSeverity::Severe,
    }
}

/// Tie-break ordering: contraindicated > severe > moderate > mild; within a
/// severity drug-drug, then drug-condition, then drug-symptom; within a
/// category alphabetical on drug1 then drug2.
pub fn sort_warnings(warnings: &mut [MedWarning]) {
    warnings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(a.kind.cmp(&b.kind))
            .then(a.drug1.cmp(&b.drug1))
            .then(a.drug2.cmp(&b.drug2))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymptomSeverity;

    fn med(name: &str) -> MedicationEntry {
        MedicationEntry {
            drug_name: name.to_string(),
            code: None,
            dose: None,
            frequency: None,
            route: None,
        }
    }

    fn symptom(name: &str) -> SymptomEntry {
        SymptomEntry {
            symptom_name: name.to_string(),
            is_red_flag: false,
            severity: SymptomSeverity::Moderate,
            duration_hours: None,
        }
    }

    #[test]
    fn test_normalize_strips_dosage() {
        assert_eq!(normalize_name("Atenolol 50mg OD"), "atenolol");
        assert_eq!(normalize_name("Warfarin 5 mg"), "warfarin");
        assert_eq!(normalize_name("Isosorbide Dinitrate 20mg BD"), "isosorbide dinitrate");
    }

    #[test]
    fn test_trigram_fuzzy_resolution() {
        let engine = MedicationEngine::new();
        assert_eq!(engine.resolve("warfarine"), "warfarin");
        assert_eq!(engine.resolve("ibuprofene 400mg"), "ibuprofen");
        // Far-off names stay unresolved
        assert_eq!(engine.resolve("zzzzdrugzzz"), "zzzzdrugzzz");
    }

    #[test]
    fn test_drug_drug_interaction() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(&[med("Warfarin 5mg"), med("Aspirin 75mg")], &[], &[]);
        assert_eq!(warnings.len(), 1);
        let w = &warnings[0];
        assert_eq!(w.kind, WarningKind::DrugDrug);
        assert_eq!(w.severity, WarningSeverity::Severe);
        assert_eq!(w.drug1, "aspirin");
        assert_eq!(w.drug2.as_deref(), Some("warfarin"));
        assert!(w.override_triggered);
    }

    #[test]
    fn test_contraindicated_pair() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(&[med("sildenafil"), med("nitroglycerin")], &[], &[]);
        assert_eq!(warnings[0].severity, WarningSeverity::Contraindicated);
        assert!(warnings[0].override_triggered);
    }

    #[test]
    fn test_drug_condition_pregnancy() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(&[med("warfarin")], &[VulnerabilityFlag::Pregnant], &[]);
        assert!(warnings
            .iter()
            .any(|w| w.kind == WarningKind::DrugCondition
                && w.severity == WarningSeverity::Contraindicated));
    }

    #[test]
    fn test_beta_blocker_with_breathing_symptom() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(
            &[med("Atenolol 50mg OD")],
            &[VulnerabilityFlag::Diabetic],
            &[symptom("difficulty breathing")],
        );
        // Severe drug-symptom warning plus moderate diabetic masking warning
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].severity, WarningSeverity::Severe);
        assert_eq!(warnings[0].kind, WarningKind::DrugSymptom);
        assert_eq!(warnings[0].drug1, "atenolol");
        assert!(warnings[0].override_triggered);
        assert_eq!(warnings[1].severity, WarningSeverity::Moderate);
        assert!(!warnings[1].override_triggered);
    }

    #[test]
    fn test_anticoagulant_head_injury_named_pattern() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(&[med("apixaban")], &[], &[symptom("head injury after fall")]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].override_triggered);
        assert!(warnings[0].message.contains("head injury"));
    }

    #[test]
    fn test_no_meds_no_warnings() {
        let engine = MedicationEngine::new();
        assert!(engine
            .evaluate(&[], &[VulnerabilityFlag::Pregnant], &[symptom("headache")])
            .is_empty());
    }

    #[test]
    fn test_tie_break_ordering() {
        let mut warnings = vec![
            build_warning("zeta", None, WarningKind::DrugSymptom, WarningSeverity::Severe, "m", false),
            build_warning("alpha", None, WarningKind::DrugCondition, WarningSeverity::Severe, "m", false),
            build_warning("beta", Some("delta"), WarningKind::DrugDrug, WarningSeverity::Severe, "m", false),
            build_warning("omega", None, WarningKind::DrugCondition, WarningSeverity::Contraindicated, "m", false),
            build_warning("mu", None, WarningKind::DrugCondition, WarningSeverity::Mild, "m", false),
        ];
        sort_warnings(&mut warnings);
        assert_eq!(warnings[0].severity, WarningSeverity::Contraindicated);
        assert_eq!(warnings[1].kind, WarningKind::DrugDrug);
        assert_eq!(warnings[2].drug1, "alpha");
        assert_eq!(warnings[3].drug1, "zeta");
        assert_eq!(warnings[4].severity, WarningSeverity::Mild);
    }

    #[test]
    fn test_duplicate_meds_deduplicated() {
        let engine = MedicationEngine::new();
        let warnings = engine.evaluate(
            &[med("warfarin"), med("Warfarin 5mg"), med("aspirin")],
            &[],
            &[],
        );
        assert_eq!(warnings.len(), 1);
    }
}
