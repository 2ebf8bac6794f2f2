//! Counter storage behind the rate limit layer.
//!
//! [`RateLimitStore`] is the seam for swapping the in-process
//! [`GovernorStore`] for a shared backend. The in-process store is not
//! distributed: each instance of the service enforces its own budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DashMapStateStore,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::config::{Rate, RateLimitConfig};

/// Shrink the keyed state store every N requests to prevent unbounded memory growth.
const SHRINK_INTERVAL: u64 = 1000;

/// Outcome of counting one request against a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the key's budget is fully restored (allowed) or the next
    /// request will be admitted (rejected)
    pub reset_at: DateTime<Utc>,
    /// Zero when allowed
    pub retry_after: Duration,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limit store error: {0}")]
pub struct RateLimitStoreError(pub String);

/// Counts requests per key against a single [`Rate`]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    fn rate(&self) -> Rate;

    /// Count one request for `key` and report whether it fits the budget.
    async fn hit(&self, key: &str) -> Result<RateLimitDecision, RateLimitStoreError>;
}

type KeyedLimiter =
    RateLimiter<String, DashMapStateStore<String>, DefaultClock, StateInformationMiddleware>;

/// In-process GCRA limiter keyed by string
///
/// A burst of `limit` requests is admitted at once; capacity is restored
/// one request every `period / limit`.
pub struct GovernorStore {
    rate: Rate,
    limiter: KeyedLimiter,
    clock: DefaultClock,
    /// Time to restore one unit of capacity
    replenish: Duration,
    request_count: AtomicU64,
}

impl GovernorStore {
    pub fn new(rate: Rate) -> Result<Self, RateLimitStoreError> {
        let burst = NonZeroU32::new(rate.limit)
            .ok_or_else(|| RateLimitStoreError(format!("rate {rate} has a zero limit")))?;
        let replenish = rate.period / rate.limit;
        let quota = Quota::with_period(replenish)
            .ok_or_else(|| RateLimitStoreError(format!("rate {rate} has a zero period")))?
            .allow_burst(burst);

        Ok(Self {
            rate,
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            clock: DefaultClock::default(),
            replenish,
            request_count: AtomicU64::new(0),
        })
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }

    fn prune(&self) {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count % SHRINK_INTERVAL == 0 && count > 0 {
            self.limiter.retain_recent();
            self.limiter.shrink_to_fit();
        }
    }
}

/// Wait rounded up to whole seconds, never below one
pub(crate) fn whole_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl RateLimitStore for GovernorStore {
    fn rate(&self) -> Rate {
        self.rate
    }

    async fn hit(&self, key: &str) -> Result<RateLimitDecision, RateLimitStoreError> {
        self.prune();
        let now = Utc::now();

        match self.limiter.check_key(&key.to_string()) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                let used = self.rate.limit.saturating_sub(remaining);
                let reset_at = now
                    + chrono::Duration::from_std(self.replenish * used)
                        .map_err(|e| RateLimitStoreError(e.to_string()))?;

                Ok(RateLimitDecision {
                    allowed: true,
                    limit: self.rate.limit,
                    remaining,
                    reset_at,
                    retry_after: Duration::ZERO,
                })
            }
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                let retry_after = Duration::from_secs(whole_seconds(wait));
                let reset_at = now
                    + chrono::Duration::from_std(retry_after)
                        .map_err(|e| RateLimitStoreError(e.to_string()))?;

                Ok(RateLimitDecision {
                    allowed: false,
                    limit: self.rate.limit,
                    remaining: 0,
                    reset_at,
                    retry_after,
                })
            }
        }
    }
}

/// One store per endpoint class
#[derive(Clone)]
pub struct RateLimitStores {
    pub general: Arc<dyn RateLimitStore>,
    pub register: Arc<dyn RateLimitStore>,
    pub login: Arc<dyn RateLimitStore>,
    pub ingest: Arc<dyn RateLimitStore>,
}

impl RateLimitStores {
    /// In-process stores for each configured rate
    pub fn in_memory(config: &RateLimitConfig) -> Result<Self, RateLimitStoreError> {
        Ok(Self {
            general: Arc::new(GovernorStore::new(config.general)?),
            register: Arc::new(GovernorStore::new(config.register)?),
            login: Arc::new(GovernorStore::new(config.login)?),
            ingest: Arc::new(GovernorStore::new(config.ingest)?),
        })
    }
}
