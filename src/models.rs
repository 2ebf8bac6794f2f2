//! Domain records and request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// A user's role inside their organization
///
/// Roles are flat: no role implies another. Every protected route lists the
/// roles it admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Editor, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role '{0}': must be one of admin, editor, viewer")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub is_active: bool,
    pub org_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub org_id: Uuid,
    pub role: Role,
}

/// A stored API key. Hash and prefix never leave the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip)]
    pub key_hash: String,
    #[serde(skip)]
    pub key_prefix: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: Uuid,
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, alias = "agent_version")]
    pub snail_version: String,
}

/// Latest collection report for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// The reporting host's id; one report is kept per host
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub meta: ReportMeta,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSummary {
    pub host_id: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version_major: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version_minor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version_patch: Option<String>,
    pub org_id: Uuid,
    pub uploaded_by_user_id: Uuid,
    pub last_seen: DateTime<Utc>,
}

impl HostSummary {
    /// Project a stored report into its summary, reading OS details from `data.system.os`.
    pub fn from_report(report: &Report, org_id: Uuid, uploaded_by: Uuid) -> Self {
        let os = report.data.get("system").and_then(|system| system.get("os"));
        let field = |name: &str| {
            os.and_then(|os| os.get(name))
                .and_then(|value| value.as_str())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            host_id: report.id.clone(),
            hostname: report.meta.hostname.clone(),
            os_name: field("name"),
            os_version: field("version"),
            os_version_major: field("version_major"),
            os_version_minor: field("version_minor"),
            os_version_patch: field("version_patch"),
            org_id,
            uploaded_by_user_id: uploaded_by,
            last_seen: report.received_at,
        }
    }
}

// Request and response bodies

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[validate(length(min = 1, max = 255))]
    pub org_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: User,
    /// A session API key, usable as `X-API-Key`
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issue a key by presenting username and password instead of an existing key
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CredentialsKeyRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned once, when a key is created. `key` is the only copy of the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub meta: ReportMeta,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub report_id: String,
    pub received_at: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_round_trips_through_strings() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(role.to_string(), role.as_str());
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert_eq!(
            "superuser".parse::<Role>(),
            Err(ParseRoleError("superuser".into()))
        );
        assert!("Admin".parse::<Role>().is_err());
        assert!(serde_json::from_value::<Role>(json!("owner")).is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Editor).unwrap(), json!("editor"));
    }

    #[test]
    fn user_json_never_contains_password_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            is_active: true,
            org_id: Uuid::new_v4(),
            role: Role::Admin,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("password_hash"));
    }

    #[test]
    fn api_key_json_hides_hash_and_prefix() {
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            key_hash: "$argon2id$hash".into(),
            key_prefix: "abcdefgh".into(),
            name: "ci".into(),
            expires_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&key).unwrap();
        assert!(value.get("key_hash").is_none());
        assert!(value.get("key_prefix").is_none());
        assert_eq!(value["name"], "ci");
    }

    #[test]
    fn summary_reads_os_details() {
        let report = Report {
            id: "host-1".into(),
            received_at: Utc::now(),
            meta: ReportMeta {
                host_id: "host-1".into(),
                hostname: "web-01".into(),
                collection_id: "c1".into(),
                timestamp: "2024-01-01T00:00:00Z".into(),
                snail_version: "1.0.0".into(),
            },
            data: json!({"system": {"os": {"name": "Fedora", "version": "40", "version_major": "40", "version_minor": ""}}}),
            errors: vec![],
        };

        let summary = HostSummary::from_report(&report, Uuid::nil(), Uuid::nil());
        assert_eq!(summary.hostname, "web-01");
        assert_eq!(summary.os_name.as_deref(), Some("Fedora"));
        assert_eq!(summary.os_version_major.as_deref(), Some("40"));
        assert_eq!(summary.os_version_minor, None);
        assert_eq!(summary.os_version_patch, None);
    }

    #[test]
    fn agent_version_is_read_as_snail_version() {
        let meta: ReportMeta = serde_json::from_value(json!({
            "host_id": "h", "hostname": "n", "agent_version": "0.9"
        }))
        .unwrap();
        assert_eq!(meta.snail_version, "0.9");

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["snail_version"], "0.9");
        assert!(value.get("agent_version").is_none());
    }

    #[test]
    fn register_request_validation() {
        let ok = RegisterRequest {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "password123".into(),
            org_name: "Acme".into(),
        };
        assert!(ok.validate().is_ok());

        let short = RegisterRequest {
            username: "al".into(),
            password: "short".into(),
            ..ok
        };
        let errors = short.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("username"));
        assert!(errors.field_errors().contains_key("password"));
    }
}
