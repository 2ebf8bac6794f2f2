//! Testing utilities for hostbus
//!
//! - [`Scenario`]: drive the router in-process, no server needed
//! - [`fixtures`]: seed organizations, users and keys straight into storage
//!
//! # Example
//!
//! ```rust,ignore
//! use hostbus::{App, testing::{self, fixtures}};
//!
//! #[tokio::test]
//! async fn me_returns_the_key_owner() {
//!     let state = fixtures::test_state();
//!     let tenant = fixtures::TestTenant::create(&state).await;
//!     let app = App::new(state).unwrap().router();
//!
//!     testing::get(app, "/api/v1/auth/me")
//!         .api_key(&tenant.admin.api_key)
//!         .execute()
//!         .await
//!         .assert_ok();
//! }
//! ```

pub mod fixtures;
mod scenario;

pub use fixtures::{TestTenant, TestUser, fake};
pub use scenario::{Scenario, ScenarioAssert, delete, get, post, put};
