//! HTTP handlers and route groups.
//!
//! Handlers stay thin: decode, call storage, shape the response. Access
//! control is applied here, per group, outermost first:
//!
//! rate limit -> [`RequireApiKey`] -> [`OrgContextStage`] -> [`VerifyCsrfToken`] -> [`RequireRole`] -> handler
//!
//! Routes are registered with their full paths rather than nested, so every
//! middleware sees the same path the client sent.

pub mod api_keys;
pub mod auth;
pub mod hosts;
pub mod ingest;
pub mod users;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::MethodRouter,
};
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::{OrgContextStage, RequireApiKey, RequireRole};
use crate::csrf::VerifyCsrfToken;
use crate::error::AppError;
use crate::models::Role;
use crate::ratelimit::{KeyScope, RateLimitLayer, RateLimitStore, RateLimitStores};
use crate::storage::StorageError;

/// Every `/api/v1` route, with its guards applied
pub fn api_router(state: &AppState, limiter: Option<&RateLimitStores>) -> Router<AppState> {
    let guards = Guards::new(state, limiter);

    let register = guards.public(auth::register_routes(), |stores| &stores.register);
    let login = guards.public(auth::login_routes(), |stores| &stores.login);

    let general = Router::new()
        .merge(auth::routes())
        .merge(api_keys::routes())
        .merge(hosts::routes())
        .merge(users::routes());
    let general = guards.protected(general, |stores| &stores.general);
    let ingest = guards.protected(ingest::routes(), |stores| &stores.ingest);

    Router::new()
        .merge(register)
        .merge(login)
        .merge(general)
        .merge(ingest)
}

/// Restrict a method router to the given roles
pub(crate) fn restrict(
    method_router: MethodRouter<AppState>,
    roles: impl IntoIterator<Item = Role>,
) -> MethodRouter<AppState> {
    method_router.route_layer(from_fn_with_state(
        RequireRole::any(roles),
        RequireRole::middleware,
    ))
}

struct Guards {
    state: AppState,
    limiter: Option<RateLimitStores>,
    trust_proxy: bool,
}

impl Guards {
    fn new(state: &AppState, limiter: Option<&RateLimitStores>) -> Self {
        Self {
            state: state.clone(),
            limiter: limiter.cloned(),
            trust_proxy: state.config.rate_limit.trust_proxy,
        }
    }

    /// Pre-authentication routes: limited per IP, CSRF-checked unless exempt
    fn public(
        &self,
        router: Router<AppState>,
        class: fn(&RateLimitStores) -> &Arc<dyn RateLimitStore>,
    ) -> Router<AppState> {
        let router = router.route_layer(from_fn_with_state(
            Arc::new(self.state.config.csrf.clone()),
            VerifyCsrfToken::middleware,
        ));
        self.limited(router, class, KeyScope::Ip)
    }

    /// Authenticated routes, limited per API key
    fn protected(
        &self,
        router: Router<AppState>,
        class: fn(&RateLimitStores) -> &Arc<dyn RateLimitStore>,
    ) -> Router<AppState> {
        let router = router
            .route_layer(from_fn_with_state(
                Arc::new(self.state.config.csrf.clone()),
                VerifyCsrfToken::middleware,
            ))
            .route_layer(from_fn(OrgContextStage::middleware))
            .route_layer(from_fn_with_state(
                self.state.clone(),
                RequireApiKey::middleware,
            ));
        self.limited(router, class, KeyScope::ApiKeyOrIp)
    }

    fn limited(
        &self,
        router: Router<AppState>,
        class: fn(&RateLimitStores) -> &Arc<dyn RateLimitStore>,
        scope: KeyScope,
    ) -> Router<AppState> {
        match &self.limiter {
            Some(stores) => router.route_layer(RateLimitLayer::new(
                class(stores).clone(),
                scope,
                self.trust_proxy,
            )),
            None => router,
        }
    }
}

/// Map storage failures, naming the missing resource on `NotFound`
pub(crate) fn storage_error(resource: &'static str) -> impl FnOnce(StorageError) -> AppError {
    move |e| match e {
        StorageError::NotFound => AppError::not_found(format!("{resource} not found")),
        other => other.into(),
    }
}

/// Run CPU-heavy credential work off the async workers
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::internal(format!("blocking task failed: {e}")))
}
