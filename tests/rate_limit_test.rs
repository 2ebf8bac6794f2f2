//! Per-class rate limiting through the full router

use axum::Router;
use serde_json::{Value, json};
use std::net::SocketAddr;

use hostbus::testing::{self, TestTenant, fixtures};
use hostbus::{App, Config, Rate, RateLimitConfig};

fn app_with(rate_limit: RateLimitConfig) -> (hostbus::AppState, Router) {
    let config = Config {
        rate_limit,
        ..Config::default()
    };
    let state = fixtures::test_state_with_config(config);
    let app = App::new(state.clone()).unwrap().router();
    (state, app)
}

fn bad_login() -> Value {
    json!({"username": "nobody", "password": "wrong-password"})
}

fn client(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([198, 51, 100, last_octet], 40000))
}

#[tokio::test]
async fn login_is_limited_per_ip() {
    let (_state, app) = app_with(RateLimitConfig::builder().login(Rate::per_minute(2)).build());

    for _ in 0..2 {
        testing::post(app.clone(), "/api/v1/auth/login")
            .from_addr(client(1))
            .json_body(&bad_login())
            .execute()
            .await
            .assert_unauthorized();
    }

    let response = testing::post(app.clone(), "/api/v1/auth/login")
        .from_addr(client(1))
        .json_body(&bad_login())
        .execute()
        .await
        .assert_too_many_requests();

    let retry_after: u64 = response
        .header_value("retry-after")
        .expect("retry-after header")
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    assert_eq!(response.header_value("x-ratelimit-remaining").as_deref(), Some("0"));

    let body: Value = response.json().await;
    assert_eq!(body["error"], "rate limit exceeded");
    assert_eq!(body["limit"], 2);
    assert_eq!(body["period"], "1m0s");
    assert_eq!(body["retry_after"], retry_after);
    assert!(body["reset_time"].is_string());

    // Another client still has its own budget
    testing::post(app, "/api/v1/auth/login")
        .from_addr(client(2))
        .json_body(&bad_login())
        .execute()
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn classes_have_separate_budgets() {
    let (state, app) = app_with(
        RateLimitConfig::builder()
            .login(Rate::per_minute(1))
            .general(Rate::per_minute(100))
            .build(),
    );
    let tenant = TestTenant::create(&state).await;

    for expected_ok in [true, false] {
        let response = testing::post(app.clone(), "/api/v1/auth/login")
            .from_addr(client(3))
            .json_body(&bad_login())
            .execute()
            .await;
        if expected_ok {
            response.assert_unauthorized();
        } else {
            response.assert_too_many_requests();
        }
    }

    testing::get(app, "/api/v1/hosts")
        .from_addr(client(3))
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok();
}

#[tokio::test]
async fn authenticated_routes_are_limited_per_key() {
    let (state, app) = app_with(RateLimitConfig::builder().general(Rate::per_minute(1)).build());
    let tenant = TestTenant::create(&state).await;
    let other = TestTenant::create(&state).await;

    testing::get(app.clone(), "/api/v1/hosts")
        .from_addr(client(4))
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok();

    testing::get(app.clone(), "/api/v1/hosts")
        .from_addr(client(4))
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_too_many_requests();

    // Same address, different key
    testing::get(app, "/api/v1/hosts")
        .from_addr(client(4))
        .api_key(&other.admin.api_key)
        .execute()
        .await
        .assert_ok();
}

#[tokio::test]
async fn limited_responses_carry_quota_headers() {
    let (state, app) = app_with(RateLimitConfig::default());
    let tenant = TestTenant::create(&state).await;

    testing::get(app.clone(), "/api/v1/hosts")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok()
        .assert_header("x-ratelimit-limit", "100");

    let response = testing::get(app, "/health").execute().await.assert_ok();
    assert!(response.header_value("x-ratelimit-limit").is_none());
}

#[tokio::test]
async fn forwarded_address_is_used_only_when_trusted() {
    let (_state, app) = app_with(
        RateLimitConfig::builder()
            .login(Rate::per_minute(1))
            .trust_proxy(true)
            .build(),
    );

    for forwarded in ["203.0.113.7", "203.0.113.8"] {
        testing::post(app.clone(), "/api/v1/auth/login")
            .from_addr(client(5))
            .header("x-forwarded-for", forwarded)
            .json_body(&bad_login())
            .execute()
            .await
            .assert_unauthorized();
    }

    let (_state, app) = app_with(RateLimitConfig::builder().login(Rate::per_minute(1)).build());
    testing::post(app.clone(), "/api/v1/auth/login")
        .from_addr(client(5))
        .header("x-forwarded-for", "203.0.113.7")
        .json_body(&bad_login())
        .execute()
        .await
        .assert_unauthorized();
    testing::post(app, "/api/v1/auth/login")
        .from_addr(client(5))
        .header("x-forwarded-for", "203.0.113.8")
        .json_body(&bad_login())
        .execute()
        .await
        .assert_too_many_requests();
}

#[tokio::test]
async fn disabled_limiting_never_rejects() {
    let (_state, app) = app_with(
        RateLimitConfig::builder()
            .enabled(false)
            .login(Rate::per_minute(1))
            .build(),
    );

    for _ in 0..3 {
        let response = testing::post(app.clone(), "/api/v1/auth/login")
            .json_body(&bad_login())
            .execute()
            .await
            .assert_unauthorized();
        assert!(response.header_value("x-ratelimit-limit").is_none());
    }
}
