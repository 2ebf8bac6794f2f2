//! Rate limiting middleware.
//!
//! Each endpoint class (general, registration, login, ingest) has its own
//! [`Rate`] and its own [`RateLimitStore`]. Registration and login are
//! limited per client IP; everything else per API key, falling back to
//! the IP for anonymous callers.

mod config;
mod layer;
mod store;

pub use config::{Rate, RateLimitConfig, RateLimitConfigBuilder, RateParseError};
pub use layer::{KeyScope, RateLimitLayer, RateLimitService, client_ip};
pub use store::{
    GovernorStore, RateLimitDecision, RateLimitStore, RateLimitStoreError, RateLimitStores,
};
