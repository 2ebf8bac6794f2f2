use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ApiKeyStore, HostStore, NewOwner, OrganizationStore, Storage, StorageError, StorageResult,
    UserStore,
};
use crate::models::{
    ApiKey, HostSummary, NewApiKey, NewUser, Organization, Report, Role, User,
};

#[derive(Clone)]
struct StoredHost {
    report: Report,
    org_id: Uuid,
    uploaded_by: Uuid,
}

#[derive(Default)]
struct State {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    api_keys: HashMap<Uuid, ApiKey>,
    hosts: HashMap<String, StoredHost>,
}

impl State {
    fn username_or_email_taken(&self, username: &str, email: &str) -> Option<StorageError> {
        self.users.values().find_map(|user| {
            if user.username == username {
                Some(StorageError::Conflict("username already exists".into()))
            } else if user.email == email {
                Some(StorageError::Conflict("email already exists".into()))
            } else {
                None
            }
        })
    }

    fn new_organization(&mut self, name: &str) -> StorageResult<Organization> {
        if self.organizations.values().any(|org| org.name == name) {
            return Err(StorageError::Conflict("organization name already exists".into()));
        }

        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.organizations.insert(org.id, org.clone());
        Ok(org)
    }

    fn new_user(&mut self, new: NewUser) -> StorageResult<User> {
        if let Some(conflict) = self.username_or_email_taken(&new.username, &new.email) {
            return Err(conflict);
        }
        if !self.organizations.contains_key(&new.org_id) {
            return Err(StorageError::Conflict("organization does not exist".into()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_active: true,
            org_id: new.org_id,
            role: new.role,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// Process-local store behind a single async lock
///
/// Used by the test-suite and by the server when no database is configured.
/// Data does not survive a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a backend error, to exercise failure paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Mark a user active or inactive
    pub async fn set_user_active(&self, user_id: Uuid, active: bool) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(StorageError::NotFound)?;
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(())
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Backend("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HostStore for InMemoryStore {
    async fn save_host(&self, report: &Report, org_id: Uuid, uploaded_by: Uuid) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;

        if let Some(existing) = state.hosts.get(&report.id) {
            if existing.org_id != org_id {
                tracing::warn!(
                    host_id = %report.id,
                    org_id = %org_id,
                    "Rejected upsert of a host owned by another organization"
                );
                return Err(StorageError::Conflict(
                    "host is registered to a different organization".into(),
                ));
            }
        }

        state.hosts.insert(
            report.id.clone(),
            StoredHost {
                report: report.clone(),
                org_id,
                uploaded_by,
            },
        );
        Ok(())
    }

    async fn get_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<Report> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .hosts
            .get(host_id)
            .filter(|host| host.org_id == org_id)
            .map(|host| host.report.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn list_hosts(&self, org_id: Uuid) -> StorageResult<Vec<HostSummary>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut hosts: Vec<HostSummary> = state
            .hosts
            .values()
            .filter(|host| host.org_id == org_id)
            .map(|host| HostSummary::from_report(&host.report, host.org_id, host.uploaded_by))
            .collect();
        hosts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(hosts)
    }

    async fn get_all_hosts(&self, org_id: Uuid) -> StorageResult<Vec<Report>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut reports: Vec<Report> = state
            .hosts
            .values()
            .filter(|host| host.org_id == org_id)
            .map(|host| host.report.clone())
            .collect();
        reports.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(reports)
    }

    async fn delete_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.hosts.get(host_id) {
            Some(host) if host.org_id == org_id => {
                state.hosts.remove(host_id);
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        self.check_available()?;
        self.state.write().await.new_user(user)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> StorageResult<User> {
        self.check_available()?;
        let state = self.state.read().await;
        state.users.get(&user_id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<User> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<User> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_users_by_organization(&self, org_id: Uuid) -> StorageResult<Vec<User>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| user.org_id == org_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn update_user_role(&self, user_id: Uuid, org_id: Uuid, role: Role) -> StorageResult<User> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|user| user.org_id == org_id)
            .ok_or(StorageError::NotFound)?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: Uuid, org_id: Uuid) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.users.get(&user_id) {
            Some(user) if user.org_id == org_id => {
                state.users.remove(&user_id);
                state.api_keys.retain(|_, key| key.user_id != user_id);
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn create_api_key(&self, new: NewApiKey) -> StorageResult<ApiKey> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&new.user_id) {
            return Err(StorageError::Conflict("user does not exist".into()));
        }

        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            key_hash: new.key_hash,
            key_prefix: new.key_prefix,
            name: new.name,
            expires_at: new.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        state.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_api_keys_by_prefix(&self, prefix: &str) -> StorageResult<Vec<ApiKey>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .values()
            .filter(|key| key.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn get_api_keys_by_user(&self, user_id: Uuid) -> StorageResult<Vec<ApiKey>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut keys: Vec<ApiKey> = state
            .api_keys
            .values()
            .filter(|key| key.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn delete_api_key(&self, key_id: Uuid, user_id: Uuid) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.api_keys.get(&key_id) {
            Some(key) if key.user_id == user_id => {
                state.api_keys.remove(&key_id);
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }

    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(key) = state.api_keys.get_mut(&key_id) {
            // Out-of-order touches never move the timestamp backwards
            if key.last_used_at.is_none_or(|previous| previous < used_at) {
                key.last_used_at = Some(used_at);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrganizationStore for InMemoryStore {
    async fn create_organization(&self, name: &str) -> StorageResult<Organization> {
        self.check_available()?;
        self.state.write().await.new_organization(name)
    }

    async fn get_organization_by_id(&self, org_id: Uuid) -> StorageResult<Organization> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .organizations
            .get(&org_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_organization_by_name(&self, name: &str) -> StorageResult<Organization> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .organizations
            .values()
            .find(|org| org.name == name)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn count_users_in_organization(&self, org_id: Uuid) -> StorageResult<u64> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.users.values().filter(|user| user.org_id == org_id).count() as u64)
    }

    async fn register_organization(
        &self,
        org_name: &str,
        owner: NewOwner,
    ) -> StorageResult<(Organization, User)> {
        self.check_available()?;
        let mut state = self.state.write().await;

        // Check the user first so a conflict leaves no orphan organization
        if let Some(conflict) = state.username_or_email_taken(&owner.username, &owner.email) {
            return Err(conflict);
        }
        let org = state.new_organization(org_name)?;
        let user = state.new_user(NewUser {
            username: owner.username,
            email: owner.email,
            password_hash: owner.password_hash,
            org_id: org.id,
            role: Role::Admin,
        })?;

        Ok((org, user))
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn ping(&self) -> StorageResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportMeta;
    use serde_json::json;

    fn report(host_id: &str, hostname: &str) -> Report {
        Report {
            id: host_id.to_string(),
            received_at: Utc::now(),
            meta: ReportMeta {
                host_id: host_id.to_string(),
                hostname: hostname.to_string(),
                collection_id: "col-1".into(),
                timestamp: "2024-01-01T00:00:00Z".into(),
                snail_version: "1.0.0".into(),
            },
            data: json!({"system": {"os": {"name": "Debian"}}}),
            errors: vec![],
        }
    }

    async fn org_with_admin(store: &InMemoryStore, name: &str) -> (Organization, User) {
        store
            .register_organization(
                name,
                NewOwner {
                    username: format!("{}-admin", name),
                    email: format!("admin@{}.test", name),
                    password_hash: "hash".into(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn host_reads_are_tenant_scoped() {
        let store = InMemoryStore::new();
        let (org_a, admin_a) = org_with_admin(&store, "a").await;
        let (org_b, _) = org_with_admin(&store, "b").await;

        store.save_host(&report("h1", "web"), org_a.id, admin_a.id).await.unwrap();

        assert_eq!(store.get_host("h1", org_a.id).await.unwrap().meta.hostname, "web");
        assert_eq!(store.get_host("h1", org_b.id).await, Err(StorageError::NotFound));
        assert_eq!(store.get_host("missing", org_b.id).await, Err(StorageError::NotFound));
        assert!(store.list_hosts(org_b.id).await.unwrap().is_empty());
        assert!(store.get_all_hosts(org_b.id).await.unwrap().is_empty());
        assert_eq!(store.delete_host("h1", org_b.id).await, Err(StorageError::NotFound));

        // Still there for the owner
        assert_eq!(store.list_hosts(org_a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cross_tenant_upsert_is_a_conflict() {
        let store = InMemoryStore::new();
        let (org_a, admin_a) = org_with_admin(&store, "a").await;
        let (org_b, admin_b) = org_with_admin(&store, "b").await;

        store.save_host(&report("h1", "web"), org_a.id, admin_a.id).await.unwrap();
        let err = store
            .save_host(&report("h1", "stolen"), org_b.id, admin_b.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // Owner is unchanged
        assert_eq!(store.get_host("h1", org_a.id).await.unwrap().meta.hostname, "web");
    }

    #[tokio::test]
    async fn same_tenant_upsert_replaces_report() {
        let store = InMemoryStore::new();
        let (org, admin) = org_with_admin(&store, "a").await;

        store.save_host(&report("h1", "old"), org.id, admin.id).await.unwrap();
        store.save_host(&report("h1", "new"), org.id, admin.id).await.unwrap();

        let hosts = store.list_hosts(org.id).await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "new");
    }

    #[tokio::test]
    async fn list_hosts_is_newest_first() {
        let store = InMemoryStore::new();
        let (org, admin) = org_with_admin(&store, "a").await;

        let mut older = report("h1", "older");
        older.received_at = Utc::now() - chrono::Duration::hours(1);
        store.save_host(&older, org.id, admin.id).await.unwrap();
        store.save_host(&report("h2", "newer"), org.id, admin.id).await.unwrap();

        let names: Vec<String> = store
            .list_hosts(org.id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.hostname)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn duplicate_users_and_orgs_conflict() {
        let store = InMemoryStore::new();
        let (org, admin) = org_with_admin(&store, "a").await;

        let dup_username = store
            .create_user(NewUser {
                username: admin.username.clone(),
                email: "other@example.com".into(),
                password_hash: "hash".into(),
                org_id: org.id,
                role: Role::Viewer,
            })
            .await;
        assert_eq!(
            dup_username,
            Err(StorageError::Conflict("username already exists".into()))
        );

        let dup_org = store.create_organization("a").await;
        assert!(matches!(dup_org, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn failed_registration_leaves_no_orphan_org() {
        let store = InMemoryStore::new();
        let (_, admin) = org_with_admin(&store, "a").await;

        let result = store
            .register_organization(
                "fresh",
                NewOwner {
                    username: admin.username.clone(),
                    email: "x@example.com".into(),
                    password_hash: "hash".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(
            store.get_organization_by_name("fresh").await,
            Err(StorageError::NotFound)
        );
    }

    #[tokio::test]
    async fn user_admin_is_tenant_scoped() {
        let store = InMemoryStore::new();
        let (org_a, admin_a) = org_with_admin(&store, "a").await;
        let (org_b, _) = org_with_admin(&store, "b").await;

        assert_eq!(
            store.update_user_role(admin_a.id, org_b.id, Role::Viewer).await,
            Err(StorageError::NotFound)
        );
        assert_eq!(
            store.delete_user(admin_a.id, org_b.id).await,
            Err(StorageError::NotFound)
        );
        assert_eq!(store.count_users_in_organization(org_a.id).await.unwrap(), 1);
        assert_eq!(store.list_users_by_organization(org_b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_keys_share_prefixes_and_touch_is_idempotent() {
        let store = InMemoryStore::new();
        let (_, admin) = org_with_admin(&store, "a").await;

        for name in ["one", "two"] {
            store
                .create_api_key(NewApiKey {
                    user_id: admin.id,
                    key_hash: format!("hash-{}", name),
                    key_prefix: "samepref".into(),
                    name: name.into(),
                    expires_at: None,
                })
                .await
                .unwrap();
        }

        let keys = store.get_api_keys_by_prefix("samepref").await.unwrap();
        assert_eq!(keys.len(), 2);

        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(10);
        store.touch_api_key(keys[0].id, later).await.unwrap();
        store.touch_api_key(keys[0].id, later).await.unwrap();
        store.touch_api_key(keys[0].id, earlier).await.unwrap();
        store.touch_api_key(Uuid::new_v4(), later).await.unwrap();

        let touched = store.get_api_keys_by_user(admin.id).await.unwrap();
        let touched = touched.iter().find(|k| k.id == keys[0].id).unwrap();
        assert_eq!(touched.last_used_at, Some(later));
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_keys() {
        let store = InMemoryStore::new();
        let (org, admin) = org_with_admin(&store, "a").await;
        let viewer = store
            .create_user(NewUser {
                username: "viewer".into(),
                email: "viewer@example.com".into(),
                password_hash: "hash".into(),
                org_id: org.id,
                role: Role::Viewer,
            })
            .await
            .unwrap();
        store
            .create_api_key(NewApiKey {
                user_id: viewer.id,
                key_hash: "hash".into(),
                key_prefix: "viewerpr".into(),
                name: "k".into(),
                expires_at: None,
            })
            .await
            .unwrap();

        store.delete_user(viewer.id, org.id).await.unwrap();
        assert!(store.get_api_keys_by_prefix("viewerpr").await.unwrap().is_empty());
        assert_eq!(store.get_user_by_id(viewer.id).await, Err(StorageError::NotFound));
        assert!(store.get_user_by_id(admin.id).await.is_ok());
    }

    #[tokio::test]
    async fn api_key_deletion_is_owner_scoped() {
        let store = InMemoryStore::new();
        let (_, admin_a) = org_with_admin(&store, "a").await;
        let (_, admin_b) = org_with_admin(&store, "b").await;

        let key = store
            .create_api_key(NewApiKey {
                user_id: admin_a.id,
                key_hash: "hash".into(),
                key_prefix: "prefixaa".into(),
                name: "k".into(),
                expires_at: None,
            })
            .await
            .unwrap();

        assert_eq!(
            store.delete_api_key(key.id, admin_b.id).await,
            Err(StorageError::NotFound)
        );
        store.delete_api_key(key.id, admin_a.id).await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_store_reports_backend_errors() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StorageError::Backend(_))));
        assert!(matches!(
            store.get_api_keys_by_prefix("x").await,
            Err(StorageError::Backend(_))
        ));
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
