//! Test fixtures for seeding organizations, users and keys
//!
//! Seeding goes straight to storage, bypassing HTTP, so a test can start
//! from "an editor of org A exists and holds this key" in one call.

use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::credentials::{Credentials, PasswordConfig};
use crate::models::{NewApiKey, NewUser, Organization, Role, User};
use crate::storage::{ApiKeyStore, InMemoryStore, NewOwner, OrganizationStore, UserStore};

/// Password given to every seeded user
pub const TEST_PASSWORD: &str = "password123";

/// Helper functions for generating fake test data
pub mod fake {
    use super::*;

    /// Generate a fake email address
    pub fn email() -> String {
        format!("test-{}@example.com", short_id())
    }

    /// Generate a fake username, always within the 3..=50 length bounds
    pub fn username() -> String {
        format!("user_{}", short_id())
    }

    /// Generate a fake organization name
    pub fn org_name() -> String {
        format!("org-{}", short_id())
    }

    /// Generate a fake host id
    pub fn host_id() -> String {
        format!("host-{}", short_id())
    }

    fn short_id() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }
}

/// State over a fresh in-memory store with fast hashing
pub fn test_state() -> AppState {
    test_state_with_config(Config::default())
}

pub fn test_state_with_config(config: Config) -> AppState {
    AppState::builder()
        .with_storage(Arc::new(InMemoryStore::new()))
        .with_credentials(Credentials::new(PasswordConfig::fast()))
        .with_config(config)
        .build()
}

/// A seeded user together with a working API key
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user: User,
    pub api_key: String,
}

impl TestUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn org_id(&self) -> Uuid {
        self.user.org_id
    }
}

/// An organization and its first admin
#[derive(Debug, Clone)]
pub struct TestTenant {
    pub org: Organization,
    pub admin: TestUser,
}

impl TestTenant {
    /// Register a new organization with an admin holding a key
    pub async fn create(state: &AppState) -> Self {
        let password_hash = state.credentials.hash_password(TEST_PASSWORD).unwrap();
        let (org, user) = state
            .storage
            .register_organization(
                &fake::org_name(),
                NewOwner {
                    username: fake::username(),
                    email: fake::email(),
                    password_hash,
                },
            )
            .await
            .unwrap();

        let api_key = issue_key(state, user.id).await;
        Self {
            org,
            admin: TestUser { user, api_key },
        }
    }

    /// Add a member with `role` and a key
    pub async fn member(&self, state: &AppState, role: Role) -> TestUser {
        let password_hash = state.credentials.hash_password(TEST_PASSWORD).unwrap();
        let user = state
            .storage
            .create_user(NewUser {
                username: fake::username(),
                email: fake::email(),
                password_hash,
                org_id: self.org.id,
                role,
            })
            .await
            .unwrap();

        let api_key = issue_key(state, user.id).await;
        TestUser { user, api_key }
    }
}

/// Store a fresh key for `user_id` and return its plaintext
pub async fn issue_key(state: &AppState, user_id: Uuid) -> String {
    let generated = state.credentials.generate_api_key().unwrap();
    state
        .storage
        .create_api_key(NewApiKey {
            user_id,
            key_hash: generated.hash.clone(),
            key_prefix: generated.prefix.clone(),
            name: "test key".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();
    generated.into_plaintext()
}

/// Ingest payload in the shape agents send
pub fn report_payload(host_id: &str, hostname: &str) -> Value {
    json!({
        "meta": {
            "host_id": host_id,
            "hostname": hostname,
            "collection_id": Uuid::new_v4().to_string(),
            "timestamp": "2024-05-01T12:00:00Z",
            "snail_version": "0.5.0"
        },
        "data": {
            "system": {
                "os": {
                    "name": "Ubuntu",
                    "version": "24.04",
                    "version_major": "24",
                    "version_minor": "04"
                }
            }
        },
        "errors": []
    })
}
