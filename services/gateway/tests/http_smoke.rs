mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, read_json};
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn system_endpoints_are_public() {
    let harness = Harness::new().await;
    let app = harness.router();

    let response = app
        .clone()
        .oneshot(get("/api/v1/system/health"))
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app
        .clone()
        .oneshot(get("/api/v1/system/info"))
        .await
        .expect("info");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["api_version"], "v1");
    assert_eq!(body["storage_backend"], "memory");
    assert_eq!(body["rate_limit_enabled"], true);
}

#[tokio::test]
async fn openapi_document_lists_admin_routes() {
    let harness = Harness::new().await;
    let response = harness
        .router()
        .oneshot(get("/api/v1/openapi.json"))
        .await
        .expect("openapi");
    assert_eq!(response.status(), StatusCode::OK);
    let doc = read_json(response).await;
    let paths = doc["paths"].as_object().expect("paths");
    for path in [
        "/api/v1/admin/rbac/roles",
        "/api/v1/admin/rbac/roles/{role}/policies",
        "/api/v1/admin/rbac/principals/{principal}/roles",
        "/api/v1/admin/rbac/sessions/revoke",
        "/api/v1/admin/rbac/reload",
        "/api/v1/sessions/revoke",
    ] {
        assert!(paths.contains_key(path), "{path}");
    }
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let harness = Harness::new().await;
    let response = harness
        .router()
        .oneshot(get("/api/v1/nope"))
        .await
        .expect("404");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
