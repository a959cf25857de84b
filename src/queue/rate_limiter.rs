use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
///
/// Each key keeps its own failure count until it is [forgotten](Self::forget),
/// so a hot key backs off without slowing down unrelated keys.
#[derive(Debug)]
pub struct ItemExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Clone + Eq + Hash> ItemExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Returns the delay for the next insertion of `key` and records the attempt.
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Clears the failure history of `key`.
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_failure_until_capped() {
        let mut limiter =
            ItemExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(10));
        let delays: Vec<_> = (0..6).map(|_| limiter.when(&"a")).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 10, 10].map(Duration::from_millis).to_vec()
        );
        assert_eq!(limiter.num_requeues(&"a"), 6);
    }

    #[test]
    fn keys_back_off_independently() {
        let mut limiter =
            ItemExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(10));
        limiter.when(&"a");
        limiter.when(&"a");
        assert_eq!(limiter.when(&"b"), Duration::from_millis(1));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(4));
    }

    #[test]
    fn forget_resets_to_base_delay() {
        let mut limiter =
            ItemExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(10));
        limiter.when(&"a");
        limiter.when(&"a");
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(1));
    }

    #[test]
    fn huge_failure_counts_saturate_at_max() {
        let mut limiter =
            ItemExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(10));
        for _ in 0..100 {
            limiter.when(&"a");
        }
        assert_eq!(limiter.when(&"a"), Duration::from_secs(10));
    }
}
