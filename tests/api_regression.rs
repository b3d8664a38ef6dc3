//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /api/v1/* surface using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port — runs in CI without `#[ignore]`.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use aegis_cds::api::{create_app, ApiState};
use aegis_cds::bus::CaseEventBus;
use aegis_cds::config::{self, ServiceConfig};
use aegis_cds::engine::{DecisionEngine, MedicationEngine, RiskModel};
use aegis_cds::handover::HandoverGenerator;
use aegis_cds::store::CaseStore;

const PHW_KEY: &str = "dev-phw-key";

fn ensure_config() {
    if !config::is_initialized() {
        config::init(ServiceConfig::default());
    }
}

fn create_test_state(model_available: bool) -> (tempfile::TempDir, ApiState) {
    ensure_config();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CaseStore::open(dir.path().join("aegis.db")).unwrap());

    let model = if model_available {
        let artifact_path =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("artifacts/risk_model.json");
        let model = RiskModel::load(&artifact_path);
        assert!(model.is_available(), "shipped artifact must load");
        model
    } else {
        RiskModel::unavailable()
    };

    let engine = DecisionEngine::new(
        model,
        MedicationEngine::new(),
        config::get().engine.clone(),
    );

    let state = ApiState {
        store,
        engine,
        handover: Arc::new(HandoverGenerator::template_only()),
        bus: Arc::new(CaseEventBus::new(config::get().events.channel_capacity)),
        started_at: Utc::now(),
    };
    (dir, state)
}

fn authed_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {PHW_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {PHW_KEY}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// S1 intake: deranged vitals, red-flag symptoms, a beta-blocker
fn s1_payload() -> Value {
    json!({
        "patient": {
            "age": 45,
            "sex": "female",
            "vulnerability_flags": ["diabetic", "heart_disease"]
        },
        "vitals": {
            "systolic_bp": 85,
            "diastolic_bp": 55,
            "heart_rate": 118,
            "respiratory_rate": 26,
            "spo2": 91.5,
            "temperature": 38.8
        },
        "symptoms": [
            { "symptom_name": "chest pain", "is_red_flag": true, "severity": "severe" },
            { "symptom_name": "difficulty breathing", "is_red_flag": true }
        ],
        "medications": [
            { "drug_name": "Atenolol 50mg OD" }
        ],
        "chief_complaint": "chest pain and difficulty breathing"
    })
}

/// S2 intake: benign adult, mild headache only
fn s2_payload() -> Value {
    json!({
        "patient": { "age": 28, "sex": "male" },
        "vitals": {
            "systolic_bp": 122,
            "diastolic_bp": 78,
            "heart_rate": 72,
            "respiratory_rate": 16,
            "spo2": 98.0,
            "temperature": 36.9
        },
        "symptoms": [
            { "symptom_name": "mild headache", "is_red_flag": false, "severity": "mild", "duration_hours": 2.0 }
        ],
        "medications": [],
        "chief_complaint": "headache"
    })
}

#[tokio::test]
async fn test_s1_critical_rule_overrides_model() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app
        .oneshot(authed_post("/api/v1/analyze/risk", s1_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["final_risk_level"], "critical");
    assert_eq!(body["rule_engine"]["triggered"], true);
    assert_eq!(body["rule_engine"]["override_ml"], true);
    assert_eq!(body["escalation_suggested"], true);

    let reasons: Vec<String> = body["rule_engine"]["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap().to_string())
        .collect();
    assert!(
        reasons.iter().any(|r| r.contains("Systolic BP 85")),
        "expected hypotension reason in {reasons:?}"
    );
    assert!(
        reasons.iter().any(|r| r.contains("SpO2")),
        "expected SpO2 reason in {reasons:?}"
    );

    // One severe atenolol warning among the medication warnings
    let warnings = body["med_warnings"].as_array().unwrap();
    assert!(
        warnings
            .iter()
            .any(|w| w["drug1"] == "atenolol" && w["severity"] == "severe"),
        "expected severe atenolol warning in {warnings:?}"
    );

    // Model output recorded for transparency even though the rule overrode it
    assert!(body["ml_result"].is_object());
    assert!(body["ml_result"]["risk_probability"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_s2_benign_intake_is_low() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app
        .oneshot(authed_post("/api/v1/analyze/risk", s2_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["final_risk_level"], "low");
    assert_eq!(body["rule_engine"]["triggered"], false);
    assert_eq!(body["escalation_suggested"], false);
    let probability = body["ml_result"]["risk_probability"].as_f64().unwrap();
    assert!(probability < 0.3, "p = {probability}");
}

#[tokio::test]
async fn test_s3_pregnancy_hypertension_is_critical() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let payload = json!({
        "patient": { "age": 32, "sex": "female", "vulnerability_flags": ["pregnant"] },
        "vitals": {
            "systolic_bp": 155,
            "diastolic_bp": 100,
            "heart_rate": 98,
            "respiratory_rate": 20,
            "spo2": 97.0,
            "temperature": 37.2
        },
        "symptoms": [
            { "symptom_name": "severe headache", "is_red_flag": true, "severity": "severe" },
            { "symptom_name": "blurred vision", "is_red_flag": true, "severity": "severe" }
        ],
        "medications": [],
        "chief_complaint": "severe headache and blurred vision"
    });

    let response = app
        .oneshot(authed_post("/api/v1/analyze/risk", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["final_risk_level"], "critical");
    let reasons: Vec<String> = body["rule_engine"]["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap().to_string())
        .collect();
    assert!(
        reasons.iter().any(|r| r.contains("Pregnancy hypertension")),
        "expected pregnancy-hypertension reason in {reasons:?}"
    );
}

#[tokio::test]
async fn test_s6_model_absence_degrades_cleanly() {
    let (_dir, state) = create_test_state(false);
    let app = create_app(state);

    let response = app
        .oneshot(authed_post("/api/v1/analyze/risk", s2_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert!(body["ml_result"].is_null());
    assert_eq!(body["final_risk_level"], "low");
    assert_eq!(body["model_version"], "none");
}

#[tokio::test]
async fn test_out_of_range_vitals_rejected_with_fields() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let mut payload = s2_payload();
    payload["vitals"]["spo2"] = json!(45.0);
    payload["vitals"]["systolic_bp"] = json!(400);

    let response = app
        .oneshot(authed_post("/api/v1/analyze/risk", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("spo2"));
    assert!(detail.contains("systolic_bp"));
}

#[tokio::test]
async fn test_missing_credential_is_unauthorized() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/analyze/risk")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&s2_payload()).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_case_listing_and_detail() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(authed_post("/api/v1/analyze/risk", s2_payload()))
        .await
        .unwrap();
    let assessment = body_json(response).await;
    let case_id = assessment["case_id"].as_str().unwrap().to_string();

    let response = app.clone().oneshot(authed_get("/api/v1/cases")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    let cases = listing.as_array().unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0]["case_id"].as_str().unwrap(), case_id);
    assert_eq!(cases[0]["status"], "analyzed");
    assert_eq!(cases[0]["final_risk_level"], "low");

    let response = app
        .oneshot(authed_get(&format!("/api/v1/cases/{case_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["case"]["status"], "analyzed");
    assert_eq!(
        detail["assessment"]["assessment_id"],
        assessment["assessment_id"]
    );
}

#[tokio::test]
async fn test_reanalysis_appends_to_existing_case() {
    let (_dir, state) = create_test_state(true);
    let store = Arc::clone(&state.store);
    let app = create_app(state);

    let first = body_json(
        app.clone()
            .oneshot(authed_post("/api/v1/analyze/risk", s2_payload()))
            .await
            .unwrap(),
    )
    .await;
    let case_id = first["case_id"].as_str().unwrap().to_string();

    // Second reading on the same case, now with a fever
    let mut payload = s2_payload();
    payload["case_id"] = json!(case_id);
    payload["vitals"]["temperature"] = json!(39.0);

    let response = app
        .clone()
        .oneshot(authed_post("/api/v1/analyze/risk", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["case_id"].as_str().unwrap(), case_id);
    assert_ne!(second["assessment_id"], first["assessment_id"]);
    assert_eq!(second["rule_engine"]["triggered"], true);

    // Still one case, carrying both vitals snapshots
    let response = app.oneshot(authed_get("/api/v1/cases")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    let history = store
        .vitals_history(case_id.parse().unwrap())
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_unknown_case_is_not_found() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app
        .oneshot(authed_get(
            "/api/v1/cases/00000000-0000-4000-8000-000000000000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_close_then_cancel_conflicts() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(authed_post("/api/v1/analyze/risk", s2_payload()))
        .await
        .unwrap();
    let case_id = body_json(response).await["case_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(authed_post(
            &format!("/api/v1/cases/{case_id}/close"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "closed");

    let response = app
        .oneshot(authed_post(
            &format!("/api/v1/cases/{case_id}/cancel"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("closed"));
}

#[tokio::test]
async fn test_health_reports_model_flag() {
    let (_dir, state) = create_test_state(false);
    let app = create_app(state);

    let response = app.oneshot(authed_get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let response = app.oneshot(authed_get("/api/v1/health")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_recommendation_is_deterministic_across_requests() {
    let (_dir, state) = create_test_state(true);
    let app = create_app(state);

    let first = body_json(
        app.clone()
            .oneshot(authed_post("/api/v1/analyze/risk", s1_payload()))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        app.oneshot(authed_post("/api/v1/analyze/risk", s1_payload()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["recommendation"], second["recommendation"]);
    assert_eq!(first["final_risk_score"], second["final_risk_score"]);
}
