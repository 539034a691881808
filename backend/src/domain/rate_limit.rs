//! Fixed-window per-client rate limiting for the public confirmation link.
//!
//! Windows are whole UTC minutes. Each client key gets `limit` attempts per
//! window; counts from earlier windows are pruned when a new window opens.
//! At most `max_tracked_keys` keys are counted per window: once full, keys
//! not yet seen are refused until the window rolls over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mockable::Clock;
use tracing::{debug, warn};

const WINDOW_SECS: i64 = 60;

/// Default cap on distinct keys counted in one window.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Result of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Default)]
struct Windows {
    current: i64,
    counts: HashMap<String, u32>,
}

/// Per-key attempt counter.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use erasure_engine::domain::RateLimiter;
/// use mockable::DefaultClock;
///
/// let limiter = RateLimiter::per_minute(2, Arc::new(DefaultClock));
/// assert!(limiter.check("203.0.113.1").is_allowed());
/// assert!(limiter.check("203.0.113.1").is_allowed());
/// assert!(!limiter.check("203.0.113.1").is_allowed());
/// ```
pub struct RateLimiter {
    limit: u32,
    max_tracked_keys: usize,
    clock: Arc<dyn Clock>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    /// Allow `limit` attempts per key per minute; zero is treated as one.
    pub fn per_minute(limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: limit.max(1),
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            clock,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Cap the distinct keys counted per window; zero is treated as one.
    #[must_use]
    pub fn with_max_tracked_keys(mut self, max_tracked_keys: usize) -> Self {
        self.max_tracked_keys = max_tracked_keys.max(1);
        self
    }

    /// Distinct keys counted in the current window.
    pub fn tracked_keys(&self) -> usize {
        match self.windows.lock() {
            Ok(guard) => guard.counts.len(),
            Err(poisoned) => poisoned.into_inner().counts.len(),
        }
    }

    /// Count one attempt for `key` and report whether it may proceed.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.utc().timestamp();
        let bucket = now.div_euclid(WINDOW_SECS);
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.current != bucket {
            let stale = windows.counts.len();
            windows.counts.clear();
            windows.current = bucket;
            if stale > 0 {
                debug!(stale, "pruned rate-limit window");
            }
        }

        let retry_after_secs =
            u64::try_from(((bucket + 1) * WINDOW_SECS - now).max(1)).unwrap_or(1);
        if !windows.counts.contains_key(key) && windows.counts.len() >= self.max_tracked_keys {
            warn!(
                tracked_keys = windows.counts.len(),
                max_tracked_keys = self.max_tracked_keys,
                "rate-limit key table full, refusing new key"
            );
            return RateDecision::Limited { retry_after_secs };
        }

        let count = windows.counts.entry(key.to_owned()).or_insert(0);
        if *count >= self.limit {
            return RateDecision::Limited { retry_after_secs };
        }
        *count += 1;
        RateDecision::Allowed {
            remaining: self.limit - *count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MutableClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn clock_at(secs: u32) -> Arc<MutableClock> {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, secs)
            .single()
            .expect("valid timestamp");
        Arc::new(MutableClock::new(start))
    }

    #[rstest]
    fn limits_each_key_independently() {
        let limiter = RateLimiter::per_minute(2, clock_at(0));

        assert_eq!(limiter.check("a"), RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("a"), RateDecision::Allowed { remaining: 0 });
        assert!(!limiter.check("a").is_allowed());
        assert!(limiter.check("b").is_allowed());
    }

    #[rstest]
    fn new_window_resets_counts() {
        let clock = clock_at(50);
        let limiter = RateLimiter::per_minute(1, clock.clone());

        assert!(limiter.check("a").is_allowed());
        assert_eq!(
            limiter.check("a"),
            RateDecision::Limited {
                retry_after_secs: 10
            }
        );

        clock.advance_seconds(10);
        assert!(limiter.check("a").is_allowed());
    }

    #[rstest]
    fn full_key_table_refuses_unseen_keys() {
        let clock = clock_at(30);
        let limiter = RateLimiter::per_minute(5, clock.clone()).with_max_tracked_keys(2);

        assert!(limiter.check("198.51.100.1").is_allowed());
        assert!(limiter.check("198.51.100.2").is_allowed());
        for spoofed in 3..50 {
            assert_eq!(
                limiter.check(&format!("198.51.100.{spoofed}")),
                RateDecision::Limited {
                    retry_after_secs: 30
                }
            );
        }
        assert_eq!(limiter.tracked_keys(), 2);
        assert!(limiter.check("198.51.100.1").is_allowed());

        clock.advance_seconds(30);
        assert!(limiter.check("198.51.100.3").is_allowed());
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[rstest]
    fn zero_limit_still_allows_one_attempt() {
        let limiter = RateLimiter::per_minute(0, clock_at(0));
        assert!(limiter.check("a").is_allowed());
        assert!(!limiter.check("a").is_allowed());
    }
}
