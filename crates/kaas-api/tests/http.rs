//! HTTP behaviour of the API against an in-memory orchestrator

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use kaas_api::{router, AppState};
use kaas_common::PlatformConfig;
use kaas_engine::memory::InMemoryOrchestrator;
use kaas_engine::Engine;
use kaas_workload::k8s::{Deployment, Secret};

const WEB: &str = r#"{"name":"web","replicas":2,"image":"nginx","image_tag":"latest",
    "port":80,"resources":"500m,128Mi,1Gi","external_access":false}"#;

fn app(fake: &Arc<InMemoryOrchestrator>) -> Router {
    let engine = Engine::new(fake.clone(), PlatformConfig::new("apps", "kaas-ingress"));
    router(AppState::new(engine))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn healthz_answers_ok() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let (status, body) = send(&app(&fake), Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

// =============================================================================
// Story: deploy an app, look it up, deploy it again
// =============================================================================

#[tokio::test]
async fn story_deploy_then_query_then_conflict() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let api = app(&fake);

    let (status, body) = send_json(&api, Method::POST, "/api/apps/", Some(WEB)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "web");
    assert_eq!(body["created"], json!(["Deployment/web", "Service/web"]));

    fake.set_ready_replicas("web", 2);
    let (status, body) = send_json(&api, Method::GET, "/api/apps/web", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment_name"], "web");
    assert_eq!(body["namespace"], "apps");
    assert_eq!(body["replicas"], 2);
    assert_eq!(body["ready_replicas"], 2);

    let (status, body) = send_json(&api, Method::POST, "/api/apps", Some(WEB)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "Deployment web already exists"}));
    assert_eq!(fake.names::<Deployment>(), vec!["web"]);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let api = app(&fake);

    let (status, body) = send_json(&api, Method::POST, "/api/apps/", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("invalid request body"));

    let missing_name = r#"{"resources":"1,2Gi"}"#;
    let (status, _) = send_json(&api, Method::POST, "/api/dbs/", Some(missing_name)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn wrong_token_count_is_bad_request_with_no_calls() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let body = WEB.replace("500m,128Mi,1Gi", "500m,128Mi");
    let (status, body) =
        send_json(&app(&fake), Method::POST, "/api/apps/", Some(&body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("validation error for web"));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn unknown_app_is_not_found() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let (status, body) = send_json(&app(&fake), Method::GET, "/api/apps/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Deployment ghost not found"}));
}

#[tokio::test]
async fn listing_is_wrapped_and_served_on_both_paths() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let api = app(&fake);

    let (_, body) = send_json(&api, Method::GET, "/api/apps/", None).await;
    assert_eq!(body, json!({"apps": []}));

    send_json(&api, Method::POST, "/api/apps/", Some(WEB)).await;
    for path in ["/api/apps/", "/api/apps"] {
        let (status, body) = send_json(&api, Method::GET, path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["apps"].as_array().unwrap().len(), 1);
        assert_eq!(body["apps"][0]["deployment_name"], "web");
    }
}

// =============================================================================
// Story: orchestrator failures keep each route's historical status
// =============================================================================

#[tokio::test]
async fn story_upstream_failures_map_per_route() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let api = app(&fake);

    fake.fail_next("create", "Deployment", Some(500), "etcd timeout");
    let (status, _) = send_json(&api, Method::POST, "/api/apps/", Some(WEB)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    fake.fail_next("get", "Deployment", Some(500), "etcd timeout");
    let (status, _) = send_json(&api, Method::GET, "/api/apps/web", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    fake.fail_next("list", "Deployment", Some(403), "forbidden");
    let (status, body) = send_json(&api, Method::GET, "/api/apps/", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("forbidden"));

    fake.fail_next("create", "Secret", Some(403), "forbidden");
    let (status, body) = send_json(
        &api,
        Method::POST,
        "/api/dbs/",
        Some(r#"{"name":"orders","resources":"1,2Gi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("forbidden"));
}

#[tokio::test]
async fn partial_failure_is_reported_with_leftovers() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    fake.fail_next("create", "Service", Some(500), "etcd timeout");

    let (status, body) =
        send_json(&app(&fake), Method::POST, "/api/apps/", Some(WEB)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let msg = body["error"].as_str().unwrap();
    assert!(msg.contains("[Deployment/web]"), "{msg}");
    assert!(msg.contains("create Service"), "{msg}");
}

// =============================================================================
// Story: provisioning a database
// =============================================================================

#[tokio::test]
async fn story_database_deploy_never_returns_the_password() {
    let fake = Arc::new(InMemoryOrchestrator::new("apps"));
    let api = app(&fake);

    let (status, bytes) = send(
        &api,
        Method::POST,
        "/api/dbs",
        Some(r#"{"db_name":"orders","resources":"1,2Gi","external_access":false}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let secret: Secret = fake.object("orders-secret").unwrap();
    let password = &secret.string_data["password"];
    let body = String::from_utf8(bytes).unwrap();
    assert!(!body.contains(password.as_str()));

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        body["created"],
        json!(["Secret/orders-secret", "StatefulSet/orders", "Service/orders"])
    );

    let (status, body) = send_json(
        &api,
        Method::POST,
        "/api/dbs/",
        Some(r#"{"name":"orders","resources":"1,2Gi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "Secret orders-secret already exists"}));
}
