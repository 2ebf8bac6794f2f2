//! PostgreSQL storage through SeaORM.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE organizations (
//!     id UUID PRIMARY KEY,
//!     name VARCHAR(255) UNIQUE NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY,
//!     username VARCHAR(50) UNIQUE NOT NULL,
//!     email VARCHAR(255) UNIQUE NOT NULL,
//!     password_hash TEXT NOT NULL,
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     org_id UUID NOT NULL REFERENCES organizations(id),
//!     role VARCHAR(10) NOT NULL CHECK (role IN ('admin', 'editor', 'viewer')),
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE api_keys (
//!     id UUID PRIMARY KEY,
//!     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
//!     key_hash TEXT NOT NULL,
//!     key_prefix VARCHAR(8) NOT NULL,
//!     name VARCHAR(255) NOT NULL,
//!     expires_at TIMESTAMPTZ,
//!     last_used_at TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE INDEX idx_api_keys_prefix ON api_keys(key_prefix);
//!
//! CREATE TABLE hosts (
//!     host_id TEXT PRIMARY KEY,
//!     org_id UUID NOT NULL REFERENCES organizations(id),
//!     uploaded_by_user_id UUID NOT NULL,
//!     hostname TEXT NOT NULL,
//!     received_at TIMESTAMPTZ NOT NULL,
//!     meta JSONB NOT NULL,
//!     data JSONB NOT NULL,
//!     errors JSONB NOT NULL
//! );
//!
//! CREATE INDEX idx_hosts_org ON hosts(org_id, received_at DESC);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;

use super::{
    ApiKeyStore, HostStore, NewOwner, OrganizationStore, Storage, StorageError, StorageResult,
    UserStore,
};
use crate::models::{
    ApiKey, HostSummary, NewApiKey, NewUser, Organization, Report, ReportMeta, Role, User,
};

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    pub mod organization {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "organizations")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            #[sea_orm(unique)]
            pub name: String,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod user {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "users")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            #[sea_orm(unique)]
            pub username: String,
            #[sea_orm(unique)]
            pub email: String,
            pub password_hash: String,
            pub is_active: bool,
            pub org_id: Uuid,
            pub role: String,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod api_key {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "api_keys")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            pub user_id: Uuid,
            pub key_hash: String,
            pub key_prefix: String,
            pub name: String,
            pub expires_at: Option<DateTimeUtc>,
            pub last_used_at: Option<DateTimeUtc>,
            pub created_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod host {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "hosts")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub host_id: String,
            pub org_id: Uuid,
            pub uploaded_by_user_id: Uuid,
            pub hostname: String,
            pub received_at: DateTimeUtc,
            pub meta: Json,
            pub data: Json,
            pub errors: Json,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{api_key, host, organization, user};

// =============================================================================
// Conversions
// =============================================================================

// Constraint details name columns and values, so they only go to the log
fn db_err(e: DbErr) -> StorageError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            tracing::debug!(detail = %detail, "unique constraint violation");
            StorageError::Conflict("resource already exists".into())
        }
        _ => StorageError::Backend(e.to_string()),
    }
}

/// Like [`db_err`], reporting unique violations with a fixed message
fn db_err_conflict(message: &'static str) -> impl Fn(DbErr) -> StorageError {
    move |e| replace_conflict(db_err(e), message)
}

fn replace_conflict(err: StorageError, message: &str) -> StorageError {
    match err {
        StorageError::Conflict(_) => StorageError::Conflict(message.to_string()),
        other => other,
    }
}

fn model_to_org(m: organization::Model) -> Organization {
    Organization {
        id: m.id,
        name: m.name,
        created_at: m.created_at,
        updated_at: m.updated_at,
    }
}

fn model_to_user(m: user::Model) -> StorageResult<User> {
    let role: Role = m
        .role
        .parse()
        .map_err(|e: crate::models::ParseRoleError| StorageError::Backend(e.to_string()))?;

    Ok(User {
        id: m.id,
        username: m.username,
        email: m.email,
        password_hash: m.password_hash,
        is_active: m.is_active,
        org_id: m.org_id,
        role,
        created_at: m.created_at,
        updated_at: m.updated_at,
    })
}

fn model_to_api_key(m: api_key::Model) -> ApiKey {
    ApiKey {
        id: m.id,
        user_id: m.user_id,
        key_hash: m.key_hash,
        key_prefix: m.key_prefix,
        name: m.name,
        expires_at: m.expires_at,
        last_used_at: m.last_used_at,
        created_at: m.created_at,
    }
}

fn model_to_report(m: host::Model) -> StorageResult<Report> {
    let meta: ReportMeta =
        serde_json::from_value(m.meta).map_err(|e| StorageError::Backend(e.to_string()))?;
    let errors: Vec<String> =
        serde_json::from_value(m.errors).map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(Report {
        id: m.host_id,
        received_at: m.received_at,
        meta,
        data: m.data,
        errors,
    })
}

fn new_user_model(new: NewUser, now: DateTime<Utc>) -> user::ActiveModel {
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(new.username),
        email: Set(new.email),
        password_hash: Set(new.password_hash),
        is_active: Set(true),
        org_id: Set(new.org_id),
        role: Set(new.role.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

// =============================================================================
// Store
// =============================================================================

/// SeaORM-backed [`Storage`]
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn username_or_email_taken<C: sea_orm::ConnectionTrait>(
        conn: &C,
        username: &str,
        email: &str,
    ) -> StorageResult<Option<StorageError>> {
        let existing = user::Entity::find()
            .filter(
                Condition::any()
                    .add(user::Column::Username.eq(username))
                    .add(user::Column::Email.eq(email)),
            )
            .one(conn)
            .await
            .map_err(db_err)?;

        Ok(existing.map(|m| {
            if m.username == username {
                StorageError::Conflict("username already exists".into())
            } else {
                StorageError::Conflict("email already exists".into())
            }
        }))
    }
}

#[async_trait]
impl HostStore for SeaOrmStore {
    async fn save_host(&self, report: &Report, org_id: Uuid, uploaded_by: Uuid) -> StorageResult<()> {
        tracing::debug!(host_id = %report.id, org_id = %org_id, "saving host report");

        let meta = serde_json::to_value(&report.meta).map_err(|e| StorageError::Backend(e.to_string()))?;
        let errors = serde_json::to_value(&report.errors).map_err(|e| StorageError::Backend(e.to_string()))?;

        let txn = self.db.begin().await.map_err(db_err)?;

        let existing = host::Entity::find_by_id(report.id.clone())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(db_err)?;

        let model = host::ActiveModel {
            host_id: Set(report.id.clone()),
            org_id: Set(org_id),
            uploaded_by_user_id: Set(uploaded_by),
            hostname: Set(report.meta.hostname.clone()),
            received_at: Set(report.received_at),
            meta: Set(meta),
            data: Set(report.data.clone()),
            errors: Set(errors),
        };

        match existing {
            Some(row) if row.org_id != org_id => {
                tracing::warn!(
                    host_id = %report.id,
                    org_id = %org_id,
                    "Rejected upsert of a host owned by another organization"
                );
                return Err(StorageError::Conflict(
                    "host is registered to a different organization".into(),
                ));
            }
            Some(_) => {
                host::Entity::update(model).exec(&txn).await.map_err(db_err)?;
            }
            None => {
                // A concurrent insert from another tenant surfaces as a unique violation
                host::Entity::insert(model)
                    .exec(&txn)
                    .await
                    .map_err(db_err_conflict("host is registered to a different organization"))?;
            }
        }

        txn.commit().await.map_err(db_err)
    }

    async fn get_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<Report> {
        let row = host::Entity::find()
            .filter(host::Column::HostId.eq(host_id))
            .filter(host::Column::OrgId.eq(org_id))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        model_to_report(row)
    }

    async fn list_hosts(&self, org_id: Uuid) -> StorageResult<Vec<HostSummary>> {
        let rows = host::Entity::find()
            .filter(host::Column::OrgId.eq(org_id))
            .order_by_desc(host::Column::ReceivedAt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let (org, uploader) = (row.org_id, row.uploaded_by_user_id);
                model_to_report(row).map(|report| HostSummary::from_report(&report, org, uploader))
            })
            .collect()
    }

    async fn get_all_hosts(&self, org_id: Uuid) -> StorageResult<Vec<Report>> {
        let rows = host::Entity::find()
            .filter(host::Column::OrgId.eq(org_id))
            .order_by_desc(host::Column::ReceivedAt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(model_to_report).collect()
    }

    async fn delete_host(&self, host_id: &str, org_id: Uuid) -> StorageResult<()> {
        let result = host::Entity::delete_many()
            .filter(host::Column::HostId.eq(host_id))
            .filter(host::Column::OrgId.eq(org_id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for SeaOrmStore {
    async fn create_user(&self, new: NewUser) -> StorageResult<User> {
        tracing::debug!(username = %new.username, org_id = %new.org_id, "creating user");

        if let Some(conflict) =
            Self::username_or_email_taken(&self.db, &new.username, &new.email).await?
        {
            return Err(conflict);
        }

        let model = user::Entity::insert(new_user_model(new, Utc::now()))
            .exec_with_returning(&self.db)
            .await
            .map_err(db_err_conflict("username or email already exists"))?;

        model_to_user(model)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> StorageResult<User> {
        let model = user::Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        model_to_user(model)
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<User> {
        let model = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        model_to_user(model)
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<User> {
        let model = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        model_to_user(model)
    }

    async fn list_users_by_organization(&self, org_id: Uuid) -> StorageResult<Vec<User>> {
        user::Entity::find()
            .filter(user::Column::OrgId.eq(org_id))
            .order_by_asc(user::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_user)
            .collect()
    }

    async fn update_user_role(&self, user_id: Uuid, org_id: Uuid, role: Role) -> StorageResult<User> {
        let result = user::Entity::update_many()
            .col_expr(user::Column::Role, Expr::value(role.as_str()))
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::OrgId.eq(org_id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        self.get_user_by_id(user_id).await
    }

    async fn delete_user(&self, user_id: Uuid, org_id: Uuid) -> StorageResult<()> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let owned = user::Entity::find()
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::OrgId.eq(org_id))
            .one(&txn)
            .await
            .map_err(db_err)?;
        if owned.is_none() {
            return Err(StorageError::NotFound);
        }

        api_key::Entity::delete_many()
            .filter(api_key::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        user::Entity::delete_by_id(user_id)
            .exec(&txn)
            .await
            .map_err(db_err)?;

        txn.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl ApiKeyStore for SeaOrmStore {
    async fn create_api_key(&self, new: NewApiKey) -> StorageResult<ApiKey> {
        tracing::debug!(user_id = %new.user_id, prefix = %new.key_prefix, "creating API key");

        let model = api_key::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            key_hash: Set(new.key_hash),
            key_prefix: Set(new.key_prefix),
            name: Set(new.name),
            expires_at: Set(new.expires_at),
            last_used_at: Set(None),
            created_at: Set(Utc::now()),
        };

        let model = api_key::Entity::insert(model)
            .exec_with_returning(&self.db)
            .await
            .map_err(db_err_conflict("API key already exists"))?;
        Ok(model_to_api_key(model))
    }

    async fn get_api_keys_by_prefix(&self, prefix: &str) -> StorageResult<Vec<ApiKey>> {
        Ok(api_key::Entity::find()
            .filter(api_key::Column::KeyPrefix.eq(prefix))
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_api_key)
            .collect())
    }

    async fn get_api_keys_by_user(&self, user_id: Uuid) -> StorageResult<Vec<ApiKey>> {
        Ok(api_key::Entity::find()
            .filter(api_key::Column::UserId.eq(user_id))
            .order_by_desc(api_key::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_api_key)
            .collect())
    }

    async fn delete_api_key(&self, key_id: Uuid, user_id: Uuid) -> StorageResult<()> {
        let result = api_key::Entity::delete_many()
            .filter(api_key::Column::Id.eq(key_id))
            .filter(api_key::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> StorageResult<()> {
        api_key::Entity::update_many()
            .col_expr(api_key::Column::LastUsedAt, Expr::value(used_at))
            .filter(api_key::Column::Id.eq(key_id))
            .filter(
                Condition::any()
                    .add(api_key::Column::LastUsedAt.is_null())
                    .add(api_key::Column::LastUsedAt.lt(used_at)),
            )
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl OrganizationStore for SeaOrmStore {
    async fn create_organization(&self, name: &str) -> StorageResult<Organization> {
        let now = Utc::now();
        let model = organization::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = organization::Entity::insert(model)
            .exec_with_returning(&self.db)
            .await
            .map_err(db_err_conflict("organization name already exists"))?;
        Ok(model_to_org(model))
    }

    async fn get_organization_by_id(&self, org_id: Uuid) -> StorageResult<Organization> {
        organization::Entity::find_by_id(org_id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(model_to_org)
            .ok_or(StorageError::NotFound)
    }

    async fn get_organization_by_name(&self, name: &str) -> StorageResult<Organization> {
        organization::Entity::find()
            .filter(organization::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(model_to_org)
            .ok_or(StorageError::NotFound)
    }

    async fn count_users_in_organization(&self, org_id: Uuid) -> StorageResult<u64> {
        user::Entity::find()
            .filter(user::Column::OrgId.eq(org_id))
            .count(&self.db)
            .await
            .map_err(db_err)
    }

    async fn register_organization(
        &self,
        org_name: &str,
        owner: NewOwner,
    ) -> StorageResult<(Organization, User)> {
        tracing::debug!(org_name = %org_name, username = %owner.username, "registering organization");

        let txn = self.db.begin().await.map_err(db_err)?;

        if let Some(conflict) =
            Self::username_or_email_taken(&txn, &owner.username, &owner.email).await?
        {
            return Err(conflict);
        }
        let name_taken = organization::Entity::find()
            .filter(organization::Column::Name.eq(org_name))
            .one(&txn)
            .await
            .map_err(db_err)?;
        if name_taken.is_some() {
            return Err(StorageError::Conflict("organization name already exists".into()));
        }

        let now = Utc::now();
        let org = organization::Entity::insert(organization::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(org_name.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .exec_with_returning(&txn)
        .await
        .map_err(db_err_conflict("organization name already exists"))?;

        let new_user = NewUser {
            username: owner.username,
            email: owner.email,
            password_hash: owner.password_hash,
            org_id: org.id,
            role: Role::Admin,
        };
        let user = user::Entity::insert(new_user_model(new_user, now))
            .exec_with_returning(&txn)
            .await
            .map_err(db_err_conflict("username or email already exists"))?;

        txn.commit().await.map_err(db_err)?;

        tracing::info!(org_id = %org.id, user_id = %user.id, "organization registered");
        Ok((model_to_org(org), model_to_user(user)?))
    }
}

#[async_trait]
impl Storage for SeaOrmStore {
    async fn ping(&self) -> StorageResult<()> {
        self.db.ping().await.map_err(db_err)
    }
}
