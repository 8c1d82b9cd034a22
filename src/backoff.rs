//! Full-jitter bounded-retry backoff used for partition discovery
//! (spec §4.3.1 step 2). Modeled on the teacher's
//! `RetryStrategy::ExponentialWithJitter`.

use std::time::Duration;

/// Base/cap/attempt-bound backoff policy. `retry` calls `attempt` until
/// it returns `Some`, or `max_attempts` tries are exhausted.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// The policy spec §4.3.1 step 2 mandates: base 3ms, cap 300ms,
    /// at least 3 attempts.
    pub const fn partition_discovery() -> Self {
        Self {
            base: Duration::from_millis(3),
            cap: Duration::from_millis(300),
            max_attempts: 3,
        }
    }

    /// Full-jitter delay for a zero-indexed attempt number: a uniform
    /// random duration in `[0, min(cap, base * 2^attempt))`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_ms = (self.base.as_millis() as f64) * 2f64.powi(attempt as i32);
        let capped_ms = exp_ms.min(self.cap.as_millis() as f64);
        let jittered_ms = rand::random::<f64>() * capped_ms;
        Duration::from_millis(jittered_ms as u64)
    }

    /// Retry `op` until it returns `Some`, sleeping a full-jitter delay
    /// between attempts, up to `max_attempts` total calls.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Option<T>>,
    {
        for attempt in 0..self.max_attempts {
            if let Some(value) = op().await {
                return Some(value);
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.delay_for_attempt(attempt)).await;
            }
        }
        None
    }
}
