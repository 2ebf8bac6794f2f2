//! Persistence boundary.
//!
//! Every tenant-scoped call takes the caller's `org_id` and must behave as
//! if a row outside that organization does not exist:
//!
//! - reads and deletes by id match on id *and* org, and a mismatch is
//!   [`StorageError::NotFound`], identical to a missing id
//! - lists never contain rows from another organization
//! - an upsert that would move a row to a different organization is
//!   rejected with [`StorageError::Conflict`]
//!
//! Two backends implement the contract: [`InMemoryStore`] and, with the
//! `database` feature, [`SeaOrmStore`].

mod memory;
#[cfg(feature = "database")]
mod sea_orm_store;

pub use memory::InMemoryStore;
#[cfg(feature = "database")]
pub use sea_orm_store::SeaOrmStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ApiKey, HostSummary, NewApiKey, NewUser, Organization, Report, Role, User,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Missing, or owned by another organization. Callers cannot tell which.
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Credentials for the first user of a new organization
#[derive(Debug, Clone)]
pub struct NewOwner {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Host reports, always scoped to an organization
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Insert or replace the report for `report.id`.
    ///
    /// Fails with `Conflict` when the host already belongs to another organization.
    async fn save_host(&self, report: &Report, org_id: Uuid, uploaded_by: Uuid) -> StorageResult<()>;

    async fn get_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<Report>;

    /// Summaries ordered by `last_seen`, newest first
    async fn list_hosts(&self, org_id: Uuid) -> StorageResult<Vec<HostSummary>>;

    async fn get_all_hosts(&self, org_id: Uuid) -> StorageResult<Vec<Report>>;

    async fn delete_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` on a duplicate username or email.
    async fn create_user(&self, user: NewUser) -> StorageResult<User>;

    async fn get_user_by_id(&self, user_id: Uuid) -> StorageResult<User>;

    async fn get_user_by_username(&self, username: &str) -> StorageResult<User>;

    async fn get_user_by_email(&self, email: &str) -> StorageResult<User>;

    async fn list_users_by_organization(&self, org_id: Uuid) -> StorageResult<Vec<User>>;

    async fn update_user_role(&self, user_id: Uuid, org_id: Uuid, role: Role) -> StorageResult<User>;

    /// Removes the user and every key they own.
    async fn delete_user(&self, user_id: Uuid, org_id: Uuid) -> StorageResult<()>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create_api_key(&self, key: NewApiKey) -> StorageResult<ApiKey>;

    /// Every key sharing `prefix`. Prefixes are not unique.
    async fn get_api_keys_by_prefix(&self, prefix: &str) -> StorageResult<Vec<ApiKey>>;

    async fn get_api_keys_by_user(&self, user_id: Uuid) -> StorageResult<Vec<ApiKey>>;

    /// Delete a key owned by `user_id`; any other key id is `NotFound`.
    async fn delete_api_key(&self, key_id: Uuid, user_id: Uuid) -> StorageResult<()>;

    /// Record a use. Idempotent, and a no-op for keys that no longer exist.
    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> StorageResult<()>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    async fn create_organization(&self, name: &str) -> StorageResult<Organization>;

    async fn get_organization_by_id(&self, org_id: Uuid) -> StorageResult<Organization>;

    async fn get_organization_by_name(&self, name: &str) -> StorageResult<Organization>;

    async fn count_users_in_organization(&self, org_id: Uuid) -> StorageResult<u64>;

    /// Create an organization together with its first admin, atomically.
    async fn register_organization(
        &self,
        org_name: &str,
        owner: NewOwner,
    ) -> StorageResult<(Organization, User)>;
}

/// Everything the service persists
#[async_trait]
pub trait Storage: HostStore + UserStore + ApiKeyStore + OrganizationStore {
    /// Cheap liveness probe for health checks
    async fn ping(&self) -> StorageResult<()>;
}
