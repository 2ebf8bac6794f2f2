use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::{
    app::AppState,
    csrf::IssueCsrfToken,
    error::AppError,
    health::health_handler,
    middleware::{MakeRequestUuid, limit_request_size},
    ratelimit::{RateLimitStoreError, RateLimitStores},
    routes,
    security::build_security_headers_layer,
};

/// The hostbus HTTP application
pub struct App {
    state: AppState,
    limiter: Option<RateLimitStores>,
}

impl App {
    /// Build the application around `state`.
    ///
    /// Rate limiting uses in-process stores unless disabled in the config.
    pub fn new(state: AppState) -> Result<Self, RateLimitStoreError> {
        let limiter = if state.config.rate_limit.enabled {
            Some(RateLimitStores::in_memory(&state.config.rate_limit)?)
        } else {
            tracing::warn!("Rate limiting is disabled");
            None
        };

        Ok(Self { state, limiter })
    }

    /// Replace the rate limit backend, e.g. with a store shared between instances
    pub fn with_rate_limit_stores(mut self, stores: RateLimitStores) -> Self {
        self.limiter = Some(stores);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The complete router with every middleware applied.
    ///
    /// Tests drive this directly with `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        let config = &self.state.config;

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .merge(routes::api_router(&self.state, self.limiter.as_ref()))
            .fallback(|| async { AppError::not_found("not found") })
            // 1. CSRF cookie on every response
            .layer(from_fn_with_state(
                Arc::new(config.csrf.clone()),
                IssueCsrfToken::middleware,
            ))
            // 2. Per-class request size limits
            .layer(from_fn_with_state(
                Arc::new(config.limits.clone()),
                limit_request_size,
            ))
            // 3. Ceiling for extractors, which default to 2 MB
            .layer(DefaultBodyLimit::max(config.limits.ingest));

        // 4. Security headers
        if let Some(security_layer) = build_security_headers_layer(&config.security) {
            router = router.layer(security_layer);
        }

        // 5. Request IDs around tracing, so spans and responses carry them
        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .with_state(self.state.clone())
    }

    /// Start the application server.
    ///
    /// Stops on Ctrl-C or SIGTERM, then flushes pending last-used updates.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let addr = self
            .state
            .config
            .server
            .addr()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(
            mode = %self.state.config.server.mode,
            "Server starting on http://{}",
            addr
        );
        tracing::info!("Health check available at http://{}/health", addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.state.recorder.shutdown().await;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
