//! Integration tests for hxp-predict API endpoints

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use hxp_common::config::{LabelPolicy, ModelSourceConfig};
use hxp_common::schema::sedation_schema;
use hxp_common::SCHEMA_VERSION;
use hxp_predict::acquire::{sha256_hex, ArtifactAcquirer};
use hxp_predict::features::FeatureVector;
use hxp_predict::{build_router, AppState, ModelGateway, PredictError};
use serde_json::{json, Value};
use tower::util::ServiceExt;

/// Logistic artifact that ignores its inputs: positive intercept → label 1
fn constant_artifact(label: i64) -> Value {
    let intercept = if label == 1 { 4.0 } else { -4.0 };
    json!({
        "format": "hxp-classifier",
        "schema_version": SCHEMA_VERSION,
        "n_features": 26,
        "name": format!("constant-{}", label),
        "model": {
            "type": "logistic",
            "coefficients": vec![0.0; 26],
            "intercept": intercept
        }
    })
}

/// Single-tree forest: SPO2 (position 7) <= 90 → high risk
fn spo2_forest(classes: [i64; 2]) -> Value {
    json!({
        "format": "hxp-classifier",
        "schema_version": SCHEMA_VERSION,
        "n_features": 26,
        "model": {
            "type": "forest",
            "classes": classes,
            "trees": [{
                "nodes": [
                    { "split": { "feature": 7, "threshold": 90.0, "left": 1, "right": 2 } },
                    { "leaf": { "value": [0.1, 0.9] } },
                    { "leaf": { "value": [0.8, 0.2] } }
                ]
            }]
        }
    })
}

fn write_artifact(path: &Path, artifact: &Value) {
    std::fs::write(path, serde_json::to_vec(artifact).unwrap()).expect("Failed to write artifact");
}

fn gateway_for(config: ModelSourceConfig) -> Arc<ModelGateway> {
    let acquirer = ArtifactAcquirer::new(config).expect("Failed to build acquirer");
    Arc::new(ModelGateway::new(sedation_schema(), acquirer))
}

fn router_for(gateway: &Arc<ModelGateway>, policy: LabelPolicy) -> Router {
    build_router(AppState::new(Arc::clone(gateway), policy))
}

/// Test helper: app backed by a local artifact, already loaded
async fn create_test_app(artifact: &Value) -> (Router, Arc<ModelGateway>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("final_model.json");
    write_artifact(&path, artifact);

    let gateway = gateway_for(ModelSourceConfig::local(&path));
    gateway.ensure_loaded().await;
    assert!(gateway.is_ready());

    (router_for(&gateway, LabelPolicy::Strict), gateway, dir)
}

/// Test helper: serve `app` on an ephemeral port, returning the base URL
async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Test helper: serve `body` at `/final_model.json`
///
/// With `None` every path answers 404.
async fn spawn_mirror(body: Option<Vec<u8>>) -> String {
    let app = match body {
        Some(bytes) => {
            Router::new().route("/final_model.json", get(move || async move { bytes }))
        }
        None => Router::new(),
    };
    spawn_server(app).await
}

/// Mirror whose body can be swapped between requests
async fn spawn_swappable_mirror(body: Vec<u8>) -> (String, Arc<Mutex<Vec<u8>>>) {
    let shared = Arc::new(Mutex::new(body));
    let served = Arc::clone(&shared);
    let app = Router::new().route(
        "/final_model.json",
        get(move || {
            let served = Arc::clone(&served);
            async move { served.lock().unwrap().clone() }
        }),
    );
    (spawn_server(app).await, shared)
}

/// Mirror that counts requests and answers each one after `delay`
async fn spawn_slow_mirror(body: Vec<u8>, delay: Duration) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().route(
        "/final_model.json",
        get(move || {
            let counter = Arc::clone(&counter);
            let body = body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                body
            }
        }),
    );
    (spawn_server(app).await, hits)
}

fn patient_payload() -> Value {
    json!({
        "Propofol Dosage": 150,
        "Height": 172.5,
        "Years of Surgical Experience": 8,
        "STOP-BANG": 5,
        "BMI": 31.2,
        "NC": 43,
        "Diastolic Blood Pressure": 88,
        "SPO2": 95,
        "Systolic Blood Pressure": 145,
        "Age": 67,
        "RR": 18,
        "HR": 84,
        "ASA": 3,
        "Snoring": 1,
        "Surgery Type-3": 0,
        "Drinking": 1,
        "BP": 1,
        "Smoking": 0,
        "Inpatient": 1,
        "Observed": 0,
        "Gender": 0,
        "Cardiovascular Disease-1": 1,
        "Tired": 1,
        "Other Disease-1.0": 1.0,
        "Oxygen Flow Rate": 3,
        "Surgery Type-4": 0
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_high_risk_prediction() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let (status, body) = send(app, post_json("/predict", &patient_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["tier"], "high");
    assert!(body["message"].as_str().unwrap().contains("higher risk"));
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 5);
    assert_eq!(body["schema_version"], SCHEMA_VERSION);
}

#[tokio::test]
async fn test_low_risk_prediction() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(0)).await;

    let (status, body) = send(app, post_json("/predict", &patient_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);
    assert_eq!(body["tier"], "low");
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_field_lists_only_that_field() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;
    let mut payload = patient_payload();
    payload.as_object_mut().unwrap().remove("Age");

    let (status, body) = send(app, post_json("/predict", &payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["missing_fields"], json!(["Age"]));
    assert!(body["error"].as_str().unwrap().contains("Age"));
}

#[tokio::test]
async fn test_unconvertible_field_is_named() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;
    let mut payload = patient_payload();
    payload["BMI"] = json!("not-a-number");

    let (status, body) = send(app, post_json("/predict", &payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONVERSION_ERROR");
    assert_eq!(body["field"], "BMI");
    assert!(body["error"].as_str().unwrap().contains("BMI"));
}

#[tokio::test]
async fn test_missing_artifact_and_failed_remote_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = spawn_mirror(None).await;

    let mut config = ModelSourceConfig::local(dir.path().join("final_model.json"));
    config.remote_url = Some(format!("{}/final_model.json", mirror));
    let gateway = gateway_for(config);
    let app = router_for(&gateway, LabelPolicy::Strict);

    let (status, body) = send(app, post_json("/predict", &patient_payload())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "MODEL_UNAVAILABLE");
    assert_eq!(gateway.state().as_str(), "failed");
    assert!(!dir.path().join("final_model.json").exists());
}

#[tokio::test]
async fn test_remote_fallback_fetches_and_persists_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("final_model.json");
    let bytes = serde_json::to_vec(&constant_artifact(1)).unwrap();
    let mirror = spawn_mirror(Some(bytes.clone())).await;

    let mut config = ModelSourceConfig::local(&local);
    config.remote_url = Some(format!("{}/final_model.json", mirror));
    config.sha256 = Some(sha256_hex(&bytes));
    let gateway = gateway_for(config);
    let app = router_for(&gateway, LabelPolicy::Strict);

    let (status, body) = send(app.clone(), post_json("/predict", &patient_payload())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "high");

    // Next process start finds it locally
    assert_eq!(std::fs::read(&local).unwrap(), bytes);

    let (_, model) = send(app, get_request("/model")).await;
    assert_eq!(model["state"], "ready");
    assert_eq!(model["source"], "remote");
    assert_eq!(model["sha256"], sha256_hex(&bytes));
}

#[tokio::test]
async fn test_rejected_remote_artifact_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("final_model.json");

    let mut stale = constant_artifact(1);
    stale["schema_version"] = json!("sedation-hypoxemia-v0");
    let (mirror, served) = spawn_swappable_mirror(serde_json::to_vec(&stale).unwrap()).await;

    let mut config = ModelSourceConfig::local(&local);
    config.remote_url = Some(format!("{}/final_model.json", mirror));
    let gateway = gateway_for(config);

    gateway.ensure_loaded().await;
    assert_eq!(gateway.state().as_str(), "failed");
    assert!(!local.exists());

    // Mirror fixed; the reload must fetch again instead of reusing a bad local copy
    let good = serde_json::to_vec(&constant_artifact(0)).unwrap();
    *served.lock().unwrap() = good.clone();

    let artifact = gateway.reload().await.unwrap();
    assert_eq!(artifact.name.as_deref(), Some("constant-0"));
    assert!(gateway.is_ready());
    assert_eq!(std::fs::read(&local).unwrap(), good);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_loads_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = serde_json::to_vec(&constant_artifact(1)).unwrap();
    let (mirror, hits) = spawn_slow_mirror(bytes, Duration::from_millis(400)).await;

    let mut config = ModelSourceConfig::local(dir.path().join("final_model.json"));
    config.remote_url = Some(format!("{}/final_model.json", mirror));
    let gateway = gateway_for(config);

    let loaders: Vec<_> = (0..16)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.ensure_loaded().await })
        })
        .collect();

    for _ in 0..200 {
        if hits.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Mid-fetch: callers are turned away rather than queued
    assert_eq!(gateway.state().as_str(), "loading");
    assert!(!gateway.is_ready());
    assert!(matches!(
        gateway.predict(&FeatureVector::from(vec![0.0; 26])),
        Err(PredictError::ModelUnavailable(_))
    ));
    let app = router_for(&gateway, LabelPolicy::Strict);
    let (status, body) = send(app, post_json("/predict", &patient_payload())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "MODEL_UNAVAILABLE");

    for loader in loaders {
        loader.await.unwrap();
    }
    assert!(gateway.is_ready());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_with_wrong_checksum_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = serde_json::to_vec(&constant_artifact(1)).unwrap();
    let mirror = spawn_mirror(Some(bytes)).await;

    let mut config = ModelSourceConfig::local(dir.path().join("final_model.json"));
    config.remote_url = Some(format!("{}/final_model.json", mirror));
    config.sha256 = Some("ab".repeat(32));
    let gateway = gateway_for(config);
    let app = router_for(&gateway, LabelPolicy::Strict);

    let (status, body) = send(app.clone(), post_json("/predict", &patient_payload())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "MODEL_UNAVAILABLE");

    let (_, model) = send(app, get_request("/model")).await;
    assert_eq!(model["state"], "failed");
    assert!(model["last_error"].as_str().unwrap().contains("checksum mismatch"));
}

#[tokio::test]
async fn test_raw_format_returns_label_list() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let (status, body) = send(app, post_json("/predict?format=raw", &patient_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "prediction": [1] }));
}

#[tokio::test]
async fn test_raw_format_skips_label_policy() {
    let (app, _gateway, _dir) = create_test_app(&spo2_forest([0, 2])).await;
    let mut payload = patient_payload();
    payload["SPO2"] = json!(85);

    let (status, body) = send(app, post_json("/predict?format=raw", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "prediction": [2] }));
}

#[tokio::test]
async fn test_unknown_format_is_invalid_payload() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let (status, body) = send(app, post_json("/predict?format=xml", &patient_payload())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_non_object_body_is_invalid_payload() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let (status, body) = send(app, post_json("/predict", &json!([1, 2, 3]))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_malformed_json_is_invalid_payload() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"Age\": "))
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_string_values_are_coerced() {
    let (app, _gateway, _dir) = create_test_app(&spo2_forest([0, 1])).await;

    // Form-style payload: every value is a string
    let mut payload = patient_payload();
    for value in payload.as_object_mut().unwrap().values_mut() {
        *value = json!(value.to_string());
    }
    payload["SPO2"] = json!("88");

    let (status, body) = send(app, post_json("/predict", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "high");
}

#[tokio::test]
async fn test_forest_artifact_uses_feature_positions() {
    let (app, _gateway, _dir) = create_test_app(&spo2_forest([0, 1])).await;

    let mut hypoxic = patient_payload();
    hypoxic["SPO2"] = json!(86);
    let (_, body) = send(app.clone(), post_json("/predict", &hypoxic)).await;
    assert_eq!(body["tier"], "high");

    let mut normal = patient_payload();
    normal["SPO2"] = json!(98);
    let (_, body) = send(app, post_json("/predict", &normal)).await;
    assert_eq!(body["tier"], "low");
}

#[tokio::test]
async fn test_unexpected_label_is_contract_violation() {
    let (app, _gateway, _dir) = create_test_app(&spo2_forest([0, 2])).await;
    let mut payload = patient_payload();
    payload["SPO2"] = json!(85);

    let (status, body) = send(app, post_json("/predict", &payload)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "MODEL_CONTRACT_VIOLATION");
}

#[tokio::test]
async fn test_permissive_policy_reports_unexpected_label_as_low() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final_model.json");
    write_artifact(&path, &spo2_forest([0, 2]));
    let gateway = gateway_for(ModelSourceConfig::local(&path));
    let app = router_for(&gateway, LabelPolicy::Permissive);

    let mut payload = patient_payload();
    payload["SPO2"] = json!(85);
    let (status, body) = send(app, post_json("/predict", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 0);
    assert_eq!(body["tier"], "low");
}

#[tokio::test]
async fn test_first_request_triggers_lazy_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final_model.json");
    write_artifact(&path, &constant_artifact(0));
    let gateway = gateway_for(ModelSourceConfig::local(&path));
    assert_eq!(gateway.state().as_str(), "unloaded");

    let app = router_for(&gateway, LabelPolicy::Strict);
    let (status, _) = send(app, post_json("/predict", &patient_payload())).await;

    assert_eq!(status, StatusCode::OK);
    assert!(gateway.is_ready());
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway_for(ModelSourceConfig::local(dir.path().join("absent.json")));
    let app = router_for(&gateway, LabelPolicy::Strict);
    let (status, body) = send(app, get_request("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["module"], "hxp-predict");
    assert_eq!(body["model_state"], "unloaded");
    assert_eq!(body["schema_version"], SCHEMA_VERSION);

    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;
    let (_, body) = send(app, get_request("/health")).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_state"], "ready");
}

#[tokio::test]
async fn test_schema_endpoint_lists_fields_in_order() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let (status, body) = send(app, get_request("/schema")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], SCHEMA_VERSION);
    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 26);
    assert_eq!(features[0]["name"], "Propofol Dosage");
    assert_eq!(features[23]["name"], "Other Disease-1.0");
    assert_eq!(features[23]["kind"], "truncated_integer");
    assert_eq!(features[25]["position"], 25);
}

#[tokio::test]
async fn test_reload_swaps_artifact() {
    let (app, _gateway, dir) = create_test_app(&constant_artifact(1)).await;
    let path = dir.path().join("final_model.json");

    write_artifact(&path, &constant_artifact(0));
    let request = Request::builder()
        .method("POST")
        .uri("/model/reload")
        .body(Body::empty())
        .unwrap();
    let (status, model) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(model["state"], "ready");
    assert_eq!(model["name"], "constant-0");

    let (_, body) = send(app, post_json("/predict", &patient_payload())).await;
    assert_eq!(body["tier"], "low");
}

#[tokio::test]
async fn test_failed_reload_keeps_serving() {
    let (app, _gateway, dir) = create_test_app(&constant_artifact(1)).await;
    std::fs::remove_file(dir.path().join("final_model.json")).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/model/reload")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "MODEL_LOAD_FAILED");

    let (status, body) = send(app, post_json("/predict", &patient_payload())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "high");
}

#[tokio::test]
async fn test_index_page() {
    let (app, _gateway, _dir) = create_test_app(&constant_artifact(1)).await;

    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("/predict"));
}
