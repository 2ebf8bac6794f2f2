//! Double-submit CSRF protection through the full router

use axum::Router;
use serde_json::json;

use hostbus::testing::{self, TestTenant, fixtures};
use hostbus::{App, AppState, Config, CsrfConfig};

async fn setup() -> (AppState, Router, TestTenant) {
    let state = fixtures::test_state();
    let tenant = TestTenant::create(&state).await;
    let app = App::new(state.clone()).unwrap().router();
    (state, app, tenant)
}

fn new_key() -> serde_json::Value {
    json!({"name": "ci"})
}

#[tokio::test]
async fn state_changing_request_without_header_is_forbidden() {
    let (_state, app, tenant) = setup().await;

    testing::post(app, "/api/v1/api-keys")
        .api_key(&tenant.admin.api_key)
        .cookie("csrf_token", "abc")
        .json_body(&new_key())
        .execute()
        .await
        .assert_forbidden()
        .assert_json_field("error", json!("CSRF token validation failed"))
        .await;
}

#[tokio::test]
async fn header_must_match_cookie() {
    let (_state, app, tenant) = setup().await;

    testing::post(app.clone(), "/api/v1/api-keys")
        .api_key(&tenant.admin.api_key)
        .cookie("csrf_token", "abc")
        .header("x-csrf-token", "abd")
        .json_body(&new_key())
        .execute()
        .await
        .assert_forbidden();

    testing::post(app, "/api/v1/api-keys")
        .api_key(&tenant.admin.api_key)
        .header("x-csrf-token", "abc")
        .json_body(&new_key())
        .execute()
        .await
        .assert_forbidden();
}

#[tokio::test]
async fn matching_token_passes() {
    let (_state, app, tenant) = setup().await;

    testing::post(app, "/api/v1/api-keys")
        .api_key(&tenant.admin.api_key)
        .csrf("abc")
        .json_body(&new_key())
        .execute()
        .await
        .assert_created();
}

#[tokio::test]
async fn reads_are_never_checked() {
    let (_state, app, tenant) = setup().await;

    testing::get(app, "/api/v1/hosts")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok();
}

#[tokio::test]
async fn every_response_carries_the_cookie() {
    let (_state, app, _tenant) = setup().await;

    let response = testing::get(app.clone(), "/health").execute().await.assert_ok();
    let issued = response.set_cookie("csrf_token").expect("csrf cookie issued");
    assert!(!issued.is_empty());

    // Errors get one too
    let response = testing::get(app.clone(), "/api/v1/hosts")
        .execute()
        .await
        .assert_unauthorized();
    assert!(response.set_cookie("csrf_token").is_some());

    // An existing cookie is reused
    let response = testing::get(app, "/health")
        .cookie("csrf_token", "kept-token")
        .execute()
        .await;
    assert_eq!(response.set_cookie("csrf_token").as_deref(), Some("kept-token"));
}

#[tokio::test]
async fn cookie_is_readable_by_scripts() {
    let (_state, app, _tenant) = setup().await;

    let raw = testing::get(app, "/health")
        .execute()
        .await
        .header_value("set-cookie")
        .expect("set-cookie header");

    assert!(raw.contains("SameSite=Lax"));
    assert!(raw.contains("Path=/"));
    assert!(!raw.contains("HttpOnly"));
    assert!(!raw.contains("Secure"));
}

#[tokio::test]
async fn pre_authentication_paths_are_exempt() {
    let (_state, app, tenant) = setup().await;

    testing::post(app, "/api/v1/auth/login")
        .json_body(&json!({
            "username": tenant.admin.user.username,
            "password": fixtures::TEST_PASSWORD
        }))
        .execute()
        .await
        .assert_ok();
}

#[tokio::test]
async fn removing_an_exemption_protects_the_path() {
    let csrf = CsrfConfig {
        exempt_paths: vec!["/api/v1/auth/register".to_string()],
        ..CsrfConfig::default()
    };
    let config = Config {
        csrf,
        ..Config::default()
    };
    let state = fixtures::test_state_with_config(config);
    let tenant = TestTenant::create(&state).await;
    let app = App::new(state).unwrap().router();

    testing::post(app, "/api/v1/auth/login")
        .json_body(&json!({
            "username": tenant.admin.user.username,
            "password": fixtures::TEST_PASSWORD
        }))
        .execute()
        .await
        .assert_forbidden();
}
