//! HTTP API behaviour through the full router

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use emigrant_forecast::api;
use emigrant_forecast::config::Config;
use emigrant_forecast::controller::AppState;
use emigrant_forecast::store::MemoryModelStore;

fn app() -> Router {
    let cfg = Config::default();
    let state = AppState::with_store(cfg.clone(), Arc::new(MemoryModelStore::new()));
    api::router(state, &cfg)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, body.map(|b| b.to_string()).unwrap_or_default()).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn send_raw(app: &Router, method: &str, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn quick_train_body() -> Value {
    json!({
        "candidates": [
            {"id": 2, "lookback": 2, "units": [4], "dropout": [0.1]},
            {"id": 3, "lookback": 3, "units": [4], "dropout": [0.0]}
        ],
        "epochs": 3,
        "wait": true
    })
}

#[tokio::test]
async fn health_reports_store_and_models() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["models"]["active"], json!([]));

    let (status, _) = send(&app, "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn categories_are_listed() {
    let (status, body) = send(&app(), "GET", "/api/v1/categories", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["totalCount"], 2);

    let categories = body["data"].as_array().unwrap();
    assert_eq!(categories[0]["key"], "sex");
    assert_eq!(categories[1]["key"], "civilStatus");
    assert_eq!(categories[1]["fields"].as_array().unwrap().len(), 6);
    assert_eq!(categories[0]["active"], false);
}

#[tokio::test]
async fn unknown_category_is_not_found() {
    let (status, body) = send(&app(), "GET", "/api/v1/models/age", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn forecast_without_model_is_not_found() {
    let (status, body) = send(&app(), "GET", "/api/v1/models/sex/forecast", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Train or load a model first"));
}

#[tokio::test]
async fn invalid_training_request_is_unprocessable() {
    let (status, body) = send(&app(), "POST", "/api/v1/models/sex/train", Some(json!({"epochs": 0}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "ValidationError");
}

#[tokio::test]
async fn train_activate_forecast_lifecycle() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/v1/models/sex/train", Some(quick_train_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["history"].as_array().unwrap().len(), 2);
    assert!(body["data"]["best"]["config"]["id"].is_number());

    // trained but not confirmed
    let (status, body) = send(&app, "GET", "/api/v1/models/sex/forecast?periods=3", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "Conflict");

    let (status, body) = send(&app, "GET", "/api/v1/models/sex", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stored"], false);
    assert_eq!(body["data"]["staged"], true);
    assert_eq!(body["data"]["active"], false);
    assert_eq!(body["data"]["lastReport"]["status"], "completed");

    let (status, body) = send(&app, "POST", "/api/v1/models/sex/activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["category"], "sex");

    let (_, body) = send(&app, "GET", "/api/v1/models/sex", None).await;
    assert_eq!(body["data"]["stored"], true);
    assert_eq!(body["data"]["staged"], false);
    assert_eq!(body["data"]["active"], true);

    let (status, body) = send(&app, "GET", "/api/v1/models/sex/forecast?periods=3", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["fields"], json!(["male", "female"]));
    assert_eq!(data["fieldLabels"]["male"], "Male");
    let future = data["futureForecast"].as_array().unwrap();
    assert_eq!(future.len(), 3);
    assert_eq!(future[0]["year"], 2023);
    assert!(future[0]["values"]["female"].is_number());
    assert!(!data["chartSeries"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", "/api/v1/models/sex/forecast?periods=500", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "DELETE", "/api/v1/models/sex", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
    let (status, _) = send(&app, "DELETE", "/api/v1/models/sex", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn training_with_too_few_records_is_a_bad_request() {
    let mut body = quick_train_body();
    body["records"] = json!([
        {"year": 2020, "male": 1, "female": 2},
        {"year": 2021, "male": 3, "female": 4}
    ]);
    let (status, body) = send(&app(), "POST", "/api/v1/models/sex/train", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Need at least 5 years"));
}

#[tokio::test]
async fn cancel_without_running_training() {
    let (status, body) = send(&app(), "POST", "/api/v1/models/civilStatus/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cancelled"], false);
}

#[tokio::test]
async fn export_then_import_into_another_instance() {
    let source = app();
    let (status, _) = send(&source, "POST", "/api/v1/models/civilStatus/train", Some(quick_train_body())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&source, "POST", "/api/v1/models/civilStatus/activate", None).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/api/v1/models/civilStatus/export")
        .body(Body::empty())
        .unwrap();
    let response = source.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("civilStatus-model.json"));
    let package = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let package = String::from_utf8(package.to_vec()).unwrap();

    let target = app();
    let (status, body) = send_raw(&target, "POST", "/api/v1/models/import", "{\"category\":\"sex\"}".into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "BadRequest");

    let (status, body) = send_raw(&target, "POST", "/api/v1/models/import", package).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["data"]["category"], "civilStatus");

    let (status, body) = send(&target, "GET", "/api/v1/models/civilStatus/forecast?periods=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["futureForecast"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn import_with_oversized_topology_is_rejected() {
    let source = app();
    send(&source, "POST", "/api/v1/models/sex/train", Some(quick_train_body())).await;
    send(&source, "POST", "/api/v1/models/sex/activate", None).await;
    let request = Request::builder()
        .uri("/api/v1/models/sex/export")
        .body(Body::empty())
        .unwrap();
    let response = source.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let package = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let mut package: Value = serde_json::from_slice(&package).unwrap();
    package["model"]["topology"]["units"] = json!([1u64 << 40]);

    let target = app();
    let (status, body) = send_raw(&target, "POST", "/api/v1/models/import", package.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "BadRequest");

    let (status, _) = send(&target, "GET", "/api/v1/models/sex/forecast", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
