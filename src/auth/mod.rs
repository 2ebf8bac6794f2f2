//! Request authentication and authorization.
//!
//! Protected routes stack three stages, outermost first:
//!
//! 1. [`RequireApiKey`] resolves the presented API key to an active user
//! 2. [`OrgContextStage`] publishes the user's organization and role
//! 3. [`RequireRole`] admits only the listed roles
//!
//! Handlers read the results through [`CurrentUser`], [`CurrentUserId`],
//! [`CurrentOrgId`] and [`CurrentRole`].

pub mod context;
pub mod last_used;
pub mod middleware;
pub mod rbac;
pub mod token;

pub use context::{
    AuthContext, CurrentOrgId, CurrentRole, CurrentUser, CurrentUserId, OrgContext,
    OrgContextStage,
};
pub use last_used::{LastUsedRecorder, LastUsedWorker};
pub use middleware::RequireApiKey;
pub use rbac::RequireRole;
pub use token::{API_KEY_HEADER, ApiKeyExtractor};
