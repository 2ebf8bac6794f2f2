//! Authentication stage: key extraction, verification and user checks

use axum::Router;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use hostbus::credentials::{Credentials, PasswordConfig};
use hostbus::models::NewApiKey;
use hostbus::storage::ApiKeyStore;
use hostbus::testing::{self, TestTenant, fixtures};
use hostbus::{App, AppState, InMemoryStore};

struct Harness {
    store: Arc<InMemoryStore>,
    state: AppState,
    app: Router,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::builder()
        .with_storage(store.clone())
        .with_credentials(Credentials::new(PasswordConfig::fast()))
        .build();
    let app = App::new(state.clone()).unwrap().router();
    Harness { store, state, app }
}

/// Change one character of the secret part, keeping the prefix intact
fn tamper(key: &str) -> String {
    let mut chars: Vec<char> = key.chars().collect();
    chars[20] = if chars[20] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

#[tokio::test]
async fn missing_key_is_unauthorized() {
    let h = harness();

    let body: Value = testing::get(h.app, "/api/v1/hosts")
        .execute()
        .await
        .assert_unauthorized()
        .json()
        .await;

    assert_eq!(body["error"], "missing API key");
    assert_eq!(body["message"], "Please provide an API key in the X-API-Key header");
}

#[tokio::test]
async fn unknown_prefix_and_wrong_secret_look_the_same() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;

    let unknown: Value = testing::get(h.app.clone(), "/api/v1/hosts")
        .api_key("ZZZZZZZZ-not-a-real-key-at-all-0000000000000")
        .execute()
        .await
        .assert_unauthorized()
        .json()
        .await;

    let wrong_secret: Value = testing::get(h.app, "/api/v1/hosts")
        .api_key(&tamper(&tenant.admin.api_key))
        .execute()
        .await
        .assert_unauthorized()
        .json()
        .await;

    assert_eq!(unknown, wrong_secret);
    assert_eq!(unknown["error"], "invalid API key");
}

#[tokio::test]
async fn authorization_header_schemes() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;
    let key = &tenant.admin.api_key;

    testing::get(h.app.clone(), "/api/v1/auth/me")
        .bearer_token(key)
        .execute()
        .await
        .assert_ok();

    testing::get(h.app.clone(), "/api/v1/auth/me")
        .header("authorization", &format!("ApiKey {key}"))
        .execute()
        .await
        .assert_ok();

    testing::get(h.app, "/api/v1/auth/me")
        .header("authorization", &format!("Basic {key}"))
        .execute()
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn me_returns_the_key_owner_without_secrets() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;

    let body: Value = testing::get(h.app, "/api/v1/auth/me")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["id"], tenant.admin.id().to_string());
    assert_eq!(body["role"], "admin");
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn expired_key_is_rejected() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;

    let generated = h.state.credentials.generate_api_key().unwrap();
    h.store
        .create_api_key(NewApiKey {
            user_id: tenant.admin.id(),
            key_hash: generated.hash.clone(),
            key_prefix: generated.prefix.clone(),
            name: "old".into(),
            expires_at: Some(Utc::now() - Duration::hours(1)),
        })
        .await
        .unwrap();

    let body: Value = testing::get(h.app, "/api/v1/hosts")
        .api_key(generated.plaintext())
        .execute()
        .await
        .assert_unauthorized()
        .json()
        .await;
    assert_eq!(body["error"], "API key expired");
}

#[tokio::test]
async fn inactive_user_is_rejected() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;
    h.store.set_user_active(tenant.admin.id(), false).await.unwrap();

    let body: Value = testing::get(h.app, "/api/v1/hosts")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_unauthorized()
        .json()
        .await;
    assert_eq!(body["error"], "user account is inactive");
}

#[tokio::test]
async fn storage_outage_is_a_server_error() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;
    h.store.set_unavailable(true);

    testing::get(h.app, "/api/v1/hosts")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn successful_requests_record_last_use() {
    let h = harness();
    let tenant = TestTenant::create(&h.state).await;

    testing::get(h.app, "/api/v1/hosts")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok();

    h.state.recorder.shutdown().await;

    let keys = h.store.get_api_keys_by_user(tenant.admin.id()).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].last_used_at.is_some());
}

#[tokio::test]
async fn seeded_state_helper_authenticates() {
    let state = fixtures::test_state();
    let tenant = TestTenant::create(&state).await;
    let app = App::new(state).unwrap().router();

    testing::get(app, "/api/v1/api-keys")
        .api_key(&tenant.admin.api_key)
        .execute()
        .await
        .assert_ok()
        .assert_json_field("total", serde_json::json!(1))
        .await;
}
