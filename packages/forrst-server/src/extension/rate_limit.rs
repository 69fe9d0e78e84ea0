//! Per-caller rate limiting on a keyed GCRA limiter.
//!
//! Every caller gets a burst of `limit` requests that refills evenly over
//! `window`. Callers whose budget has fully refilled are dropped from the key
//! store every [`PRUNE_INTERVAL`] checks, so the store only holds callers seen
//! within roughly one window.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use forrst_core::urn::extensions;
use forrst_core::{ForrstError, ProtocolDuration, ResponseEnvelope};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::{NoOpMiddleware, StateInformationMiddleware};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{duration_value, Event, EventKind, Extension, ExtensionError, Subscription};

/// Checks between two sweeps of idle callers.
pub const PRUNE_INTERVAL: u64 = 1_024;

type CallerLimiter =
    RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Burst size; a `limit` of zero is treated as one.
    pub limit: u32,
    /// Time for a spent budget to refill completely.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.limit).unwrap_or(NonZeroU32::MIN);
        let period = (Duration::from_millis(self.window_ms) / burst.get()).max(Duration::from_nanos(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}

/// Global extension that rejects callers exceeding their budget.
///
/// Callers are keyed by [`RequestEnvelope::caller`](forrst_core::RequestEnvelope::caller),
/// so every request without a `caller_id` shares the anonymous budget.
pub struct RateLimitExtension {
    config: RateLimitConfig,
    clock: DefaultClock,
    limiter: CallerLimiter,
    checks: AtomicU64,
}

impl RateLimitExtension {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let clock = DefaultClock::default();
        let limiter = RateLimiter::<_, _, _, NoOpMiddleware<_>>::new(
            config.quota(),
            DefaultKeyedStateStore::default(),
            clock.clone(),
        )
        .with_middleware::<StateInformationMiddleware>();
        Self {
            config,
            clock,
            limiter,
            checks: AtomicU64::new(0),
        }
    }

    /// Takes one request from `caller`'s budget. Returns what is left of the
    /// burst, or how long until the next request would be admitted.
    fn acquire(&self, caller: &str) -> Result<u32, Duration> {
        let outcome = self
            .limiter
            .check_key(&caller.to_string())
            .map(|snapshot| snapshot.remaining_burst_capacity())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()));
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_INTERVAL == PRUNE_INTERVAL - 1 {
            self.prune();
        }
        outcome
    }

    /// Forgets callers whose budget has fully refilled.
    pub fn prune(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(before, after = self.limiter.len(), "rate limit keys pruned");
    }

    /// Number of callers currently holding limiter state.
    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.limiter.len()
    }

    fn check(&self, event: &mut Event<'_>) {
        let request = event.request();
        let caller = request.caller();
        match self.acquire(caller) {
            Ok(remaining) => {
                request
                    .metadata()
                    .insert(extensions::RATE_LIMIT, json!({ "remaining": remaining }));
            }
            Err(wait) => {
                debug!(caller, limit = self.config.limit, "rate limit exceeded");
                let retry_after = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
                let mut details = Map::new();
                details.insert("limit".to_string(), json!(self.config.limit));
                details.insert("window".to_string(), duration_value(self.config.window_ms));
                details.insert(
                    "retry_after".to_string(),
                    ProtocolDuration::seconds(retry_after).to_value(),
                );
                let error = ForrstError::RateLimited {
                    message: format!(
                        "more than {} requests in {}ms",
                        self.config.limit, self.config.window_ms
                    ),
                    details,
                };
                event.short_circuit(ResponseEnvelope::from_error(
                    request.id.clone(),
                    error.to_error_entry(),
                ));
            }
        }
    }

    fn report(&self, event: &mut Event<'_>) {
        let remaining = event
            .request()
            .metadata()
            .get(extensions::RATE_LIMIT)
            .and_then(|state| state["remaining"].as_u64());
        let Some(remaining) = remaining else {
            return;
        };
        let data = json!({
            "limit": self.config.limit,
            "remaining": remaining,
            "window": duration_value(self.config.window_ms),
        });
        if let Some(response) = event.response_mut() {
            response.push_extension(extensions::RATE_LIMIT, data);
        }
    }
}

#[async_trait]
impl Extension for RateLimitExtension {
    fn urn(&self) -> &str {
        extensions::RATE_LIMIT
    }

    fn is_global(&self) -> bool {
        true
    }

    fn subscribed_events(&self) -> Vec<Subscription> {
        vec![
            Subscription::new(EventKind::RequestValidated, 90),
            Subscription::new(EventKind::FunctionExecuted, 0),
        ]
    }

    fn capability_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("limit".to_string(), json!(self.config.limit));
        meta.insert("window".to_string(), duration_value(self.config.window_ms));
        meta
    }

    async fn handle(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        match event.kind() {
            EventKind::RequestValidated => self.check(event),
            EventKind::FunctionExecuted => self.report(event),
            _ => {}
        }
        Ok(())
    }
}
