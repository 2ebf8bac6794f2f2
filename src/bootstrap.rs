//! First-run seeding of an administrator and their initial API key
//!
//! Backs the `create-admin` binary. Running it twice is harmless: an existing
//! username is left untouched.

use crate::app::AppState;
use crate::error::AppError;
use crate::models::{CreateApiKeyResponse, Organization, User};
use crate::routes::{api_keys::issue_key, blocking};
use crate::storage::{NewOwner, OrganizationStore, StorageError, UserStore};
use crate::utils::get_env_with_prefix;

/// Name of the key handed out with a seeded admin
pub const INITIAL_KEY_NAME: &str = "Initial Admin API Key";

/// Who to seed. Defaults suit a local first run only.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
    pub org_name: String,
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            email: "admin@localhost".to_string(),
            password: "change me".to_string(),
            org_name: "default".to_string(),
        }
    }
}

impl AdminSeed {
    /// Read `ADMIN_USERNAME`, `ADMIN_EMAIL`, `ADMIN_PASSWORD` and `ADMIN_ORG`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            username: get_env_with_prefix("ADMIN_USERNAME").unwrap_or(defaults.username),
            email: get_env_with_prefix("ADMIN_EMAIL").unwrap_or(defaults.email),
            password: get_env_with_prefix("ADMIN_PASSWORD").unwrap_or(defaults.password),
            org_name: get_env_with_prefix("ADMIN_ORG").unwrap_or(defaults.org_name),
        }
    }
}

#[derive(Debug)]
pub enum Bootstrap {
    /// The username was taken; nothing was written
    Skipped(User),
    Created {
        org: Organization,
        admin: User,
        api_key: CreateApiKeyResponse,
    },
}

/// Create an organization with `seed` as its admin, plus one API key.
pub async fn create_admin(state: &AppState, seed: AdminSeed) -> Result<Bootstrap, AppError> {
    match state.storage.get_user_by_username(&seed.username).await {
        Ok(existing) => {
            tracing::info!(username = %seed.username, "Admin user already exists, skipping creation");
            return Ok(Bootstrap::Skipped(existing));
        }
        Err(StorageError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    let credentials = state.credentials.clone();
    let password = seed.password;
    let password_hash = blocking(move || credentials.hash_password(&password)).await??;

    let (org, admin) = state
        .storage
        .register_organization(
            &seed.org_name,
            NewOwner {
                username: seed.username,
                email: seed.email,
                password_hash,
            },
        )
        .await?;
    tracing::info!(user_id = %admin.id, org_id = %org.id, "Admin user created");

    let api_key = issue_key(state, admin.id, INITIAL_KEY_NAME.to_string(), None).await?;

    Ok(Bootstrap::Created {
        org,
        admin,
        api_key,
    })
}
