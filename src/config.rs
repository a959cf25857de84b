use std::time::Duration;

/// Label naming the rollout a pod belongs to.
pub const DEFAULT_ASSOCIATION_LABEL: &str = "rollout-stable-label.io/rollout";
/// Label mirroring the owning rollout's `status.stableRS`.
pub const DEFAULT_STABLE_LABEL: &str = "rollouts-pod-template-hash";

/// Parameters for [`Controller`](crate::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub labels: Labels,
    /// Delay of the first rate-limited insertion of a key.
    pub backoff_base: Duration,
    /// Upper bound of the per-key backoff.
    pub backoff_max: Duration,
    /// Number of concurrent pod reconciliation loops.
    pub pod_workers: usize,
    /// Number of concurrent rollout reconciliation loops.
    pub rollout_workers: usize,
    /// Interval at which every cached pod and rollout is requeued; zero disables it.
    pub resync_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub association: String,
    pub stable: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            association: DEFAULT_ASSOCIATION_LABEL.to_owned(),
            stable: DEFAULT_STABLE_LABEL.to_owned(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labels: Labels::default(),
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_secs(10),
            pod_workers: 1,
            rollout_workers: 1,
            resync_period: Duration::from_secs(30 * 60),
        }
    }
}

impl Config {
    pub fn labels(mut self, association: impl Into<String>, stable: impl Into<String>) -> Self {
        self.labels = Labels {
            association: association.into(),
            stable: stable.into(),
        };
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Sets the loop counts per queue; zero is raised to one.
    pub fn workers(mut self, pod_workers: usize, rollout_workers: usize) -> Self {
        self.pod_workers = pod_workers.max(1);
        self.rollout_workers = rollout_workers.max(1);
        self
    }

    pub fn resync(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }
}
