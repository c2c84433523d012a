//! Staggered dispatch of backend calls according to a rate-limit policy.

use std::future::Future;
use std::time::Duration;

use sweep_primitives::{ModelId, RateLimitPolicy, RateLimitTable};
use tokio::task::JoinHandle;
use tracing::debug;

/// Decides when the Nth call to a model may be sent.
///
/// With a batch size of one every call is awaited in turn. Otherwise calls are
/// spawned immediately and call `k` sleeps `cooldown * (k / batch_size)` before
/// dispatching, so batch 0 goes out at once and each later batch waits one more
/// cooldown. The delay depends only on the call's absolute index, never on when
/// earlier calls finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
}

impl RateLimiter {
    /// Creates a limiter for the supplied policy.
    #[must_use]
    pub const fn new(policy: RateLimitPolicy) -> Self {
        Self { policy }
    }

    /// Creates a limiter for `model`, using the table's default when unlisted.
    #[must_use]
    pub fn for_model(table: &RateLimitTable, model: &ModelId) -> Self {
        Self::new(table.policy_for(model))
    }

    /// Returns the underlying policy.
    #[must_use]
    pub const fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Returns `true` when calls are dispatched concurrently.
    #[must_use]
    pub const fn is_concurrent(&self) -> bool {
        self.policy.is_concurrent()
    }

    /// Returns the batch that call number `query_index` belongs to.
    #[must_use]
    pub const fn batch_of(&self, query_index: usize) -> usize {
        query_index / self.policy.batch_size().get()
    }

    /// Returns how long call number `query_index` waits before dispatch.
    #[must_use]
    pub fn delay_for(&self, query_index: usize) -> Duration {
        if !self.is_concurrent() {
            return Duration::ZERO;
        }
        let batch = u32::try_from(self.batch_of(query_index)).unwrap_or(u32::MAX);
        self.policy.cooldown().saturating_mul(batch)
    }

    /// Spawns `call` as its own task, delayed by [`delay_for`](Self::delay_for).
    pub fn spawn<F, T>(&self, query_index: usize, call: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let delay = self.delay_for(query_index);
        debug!(
            query_index,
            batch = self.batch_of(query_index),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling backend call"
        );
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            call.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn sequential_policy_never_waits() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_concurrent());
        assert_eq!(limiter.delay_for(0), Duration::ZERO);
        assert_eq!(limiter.delay_for(57), Duration::ZERO);
    }

    #[test]
    fn delay_grows_per_batch() {
        let limiter = RateLimiter::new(RateLimitPolicy::from_parts(3, 10.0).unwrap());
        let delays: Vec<u64> = (0..7).map(|i| limiter.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![0, 0, 0, 10, 10, 10, 20]);
        assert_eq!(limiter.batch_of(6), 2);
    }

    #[test]
    fn unlisted_model_uses_default() {
        let table = RateLimitTable::new();
        let limiter = RateLimiter::for_model(&table, &ModelId::new("anything").unwrap());
        assert_eq!(limiter.policy(), RateLimitPolicy::SEQUENTIAL);
    }

    #[tokio::test]
    async fn later_batches_start_after_cooldown() {
        let limiter = RateLimiter::new(RateLimitPolicy::from_parts(2, 0.05).unwrap());
        let started = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|index| {
                let starts = Arc::clone(&starts);
                limiter.spawn(index, async move {
                    starts.lock().unwrap().push((index, started.elapsed()));
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        for (index, elapsed) in starts.iter() {
            if *index >= 2 {
                assert!(*elapsed >= Duration::from_millis(50), "call {index} started after {elapsed:?}");
            }
        }
        assert_eq!(starts.len(), 4);
    }
}
