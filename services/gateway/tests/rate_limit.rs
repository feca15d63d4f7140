mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{Harness, HarnessOptions, SUPER_ADMIN, read_json};
use gateway::store::{CounterError, CounterStore, WindowCount};
use http_helpers::{authed, authed_json};
use portcullis_authz::{PrincipalId, WindowConfig};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_REVOKE: &str = "/api/v1/admin/rbac/sessions/revoke";

fn from_ip(mut request: axum::http::Request<axum::body::Body>, ip: &str) -> axum::http::Request<axum::body::Body> {
    request
        .headers_mut()
        .insert("x-forwarded-for", ip.parse().expect("ip header"));
    request
}

async fn limited(max: u64, window: Duration) -> Harness {
    Harness::with_options(HarnessOptions {
        window: WindowConfig::new(window, max),
        ..HarnessOptions::default()
    })
    .await
}

#[tokio::test]
async fn admin_revoke_is_limited_per_ip_and_principal() {
    let harness = limited(2, Duration::from_secs(60)).await;
    let app = harness.router();
    let root = harness.token(SUPER_ADMIN).await;
    harness.add_principal(PrincipalId::admin(5), false).await;
    harness.add_principal(PrincipalId::admin(6), false).await;

    let revoke = |principal: &str, ip: &str| {
        from_ip(
            authed_json(
                "POST",
                ADMIN_REVOKE,
                &root,
                serde_json::json!({ "principal": principal }),
            ),
            ip,
        )
    };

    for expected_remaining in ["1", "0"] {
        let response = app
            .clone()
            .oneshot(revoke("admin:5", "10.1.1.1"))
            .await
            .expect("allowed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-ratelimit-remaining").unwrap(),
            expected_remaining
        );
    }

    let response = app
        .clone()
        .oneshot(revoke("admin:5", "10.1.1.1"))
        .await
        .expect("limited");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .expect("retry-after")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(read_json(response).await["code"], "rate_limited");

    // Body field and client IP are both part of the key.
    let response = app
        .clone()
        .oneshot(revoke("admin:6", "10.1.1.1"))
        .await
        .expect("other principal");
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .clone()
        .oneshot(revoke("admin:5", "10.2.2.2"))
        .await
        .expect("other ip");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn window_expiry_allows_again() {
    let harness = limited(1, Duration::from_millis(200)).await;
    let app = harness.router();
    let user = harness.add_principal(PrincipalId::user(3), false).await;

    let token = harness.token(user).await;
    let response = app
        .clone()
        .oneshot(from_ip(authed("POST", "/api/v1/sessions/revoke", &token), "10.9.9.9"))
        .await
        .expect("first");
    assert_eq!(response.status(), StatusCode::OK);

    let token = harness.token(user).await;
    let response = app
        .clone()
        .oneshot(from_ip(authed("POST", "/api/v1/sessions/revoke", &token), "10.9.9.9"))
        .await
        .expect("second");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = app
        .clone()
        .oneshot(from_ip(authed("POST", "/api/v1/sessions/revoke", &token), "10.9.9.9"))
        .await
        .expect("after window");
    assert_eq!(response.status(), StatusCode::OK);
}

struct BrokenCounters;

#[async_trait]
impl CounterStore for BrokenCounters {
    async fn incr_window(&self, _: &str, _: Duration) -> Result<WindowCount, CounterError> {
        Err(CounterError::Unavailable("counter backend down".to_string()))
    }
}

#[tokio::test]
async fn failing_counter_store_fails_closed() {
    let harness = Harness::with_options(HarnessOptions {
        counters: Some(Arc::new(BrokenCounters)),
        ..HarnessOptions::default()
    })
    .await;
    let user = harness.add_principal(PrincipalId::user(4), false).await;
    let token = harness.token(user).await;
    let response = harness
        .router()
        .oneshot(authed("POST", "/api/v1/sessions/revoke", &token))
        .await
        .expect("call");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["code"], "rate_limit_unavailable");
    assert!(!body["message"].as_str().unwrap().contains("counter backend down"));
}

#[tokio::test]
async fn unconfigured_limiter_allows() {
    let harness = Harness::with_options(HarnessOptions {
        counters: None,
        window: WindowConfig::new(Duration::from_secs(60), 1),
        ..HarnessOptions::default()
    })
    .await;
    let app = harness.router();
    let user = harness.add_principal(PrincipalId::user(5), false).await;
    for _ in 0..3 {
        let token = harness.token(user).await;
        let response = app
            .clone()
            .oneshot(authed("POST", "/api/v1/sessions/revoke", &token))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
}
