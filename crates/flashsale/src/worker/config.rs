use crate::QueueConfig;
use core::time::Duration;

/// Settings of one [`FulfillmentWorker`](crate::FulfillmentWorker).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub queue: QueueConfig,
    /// Consumer name inside the group. One live worker per name.
    pub consumer: String,
    /// Longest wait for new entries, and the longest gap between pending
    /// list re-scans.
    pub block: Duration,
    /// Expiry of the per-claimant lock.
    pub lock_ttl: Duration,
    /// Entries requested per read.
    pub batch_size: usize,
    /// Pause after a batch with failed entries, before the pending drain.
    pub error_backoff: Duration,
    /// On startup, take over entries other consumers left pending for at
    /// least this long. `None` leaves them alone.
    pub reclaim_idle: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            consumer: "c1".to_owned(),
            block: Duration::from_secs(2),
            lock_ttl: Duration::from_secs(10),
            batch_size: 1,
            error_backoff: Duration::from_millis(20),
            reclaim_idle: None,
        }
    }
}
