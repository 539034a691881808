//! Runtime helpers used by the delivery retry loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::{BackoffJitter, DispatchSleeper};

/// Sleep and jitter implementations injected into the dispatcher.
#[derive(Clone)]
pub struct DispatcherRuntime {
    pub sleeper: Arc<dyn DispatchSleeper>,
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for DispatcherRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl DispatchSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds up to a quarter of the base delay, uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(400))]
    #[case(Duration::from_millis(0))]
    fn random_jitter_stays_within_a_quarter(#[case] base: Duration) {
        let jitter = RandomJitter;
        for attempt in 1..=20 {
            let delay = jitter.jittered_delay(base, attempt);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis((base.as_millis() as u64 / 4).max(1)));
        }
    }
}
