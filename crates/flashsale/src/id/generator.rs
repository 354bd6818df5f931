use crate::{
    Error, IdGenerator, KeyValueStore, ORDER_EPOCH, OrderId, OrderIdParts, Result, SystemClock,
    TimeSource,
};
use chrono::{DateTime, Utc};

/// [`IdGenerator`] backed by an atomic counter in the shared fast store.
///
/// Each call increments `icr:{namespace}:{yyyy:MM:dd}` (UTC date) and packs
/// the result with the seconds elapsed since [`ORDER_EPOCH`] as described by
/// [`OrderIdParts`]. Because the counter never resets within a day, two calls
/// in the same second always receive distinct counts, no matter which process
/// issued them.
///
/// # Example
///
/// ```
/// use flashsale::{IdGenerator, ManualClock, MemoryStore, OrderIdParts, StoreIdGenerator};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> flashsale::Result<()> {
/// // 2024-01-01T00:01:40Z
/// let clock = ManualClock::new(1_704_067_300_000);
/// let ids = StoreIdGenerator::with_clock(MemoryStore::new(), clock);
///
/// let id = ids.next_id("order").await?;
/// assert_eq!(
///     OrderIdParts::from_id(id),
///     OrderIdParts { timestamp: 100, count: 1 }
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct StoreIdGenerator<S, T = SystemClock> {
    store: S,
    clock: T,
}

impl<S> StoreIdGenerator<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, T> StoreIdGenerator<S, T> {
    pub fn with_clock(store: S, clock: T) -> Self {
        Self { store, clock }
    }
}

/// Counter key for `namespace` on the UTC day containing `millis`.
pub fn counter_key(namespace: &str, millis: u64) -> String {
    format!("icr:{namespace}:{}", day_stamp(millis))
}

fn day_stamp(millis: u64) -> String {
    let millis = i64::try_from(millis).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .format("%Y:%m:%d")
        .to_string()
}

impl<S, T> IdGenerator for StoreIdGenerator<S, T>
where
    S: KeyValueStore,
    T: TimeSource + Send + Sync,
{
    async fn next_id(&self, namespace: &str) -> Result<OrderId> {
        let now = self.clock.current_millis();
        let timestamp = (now / 1_000).saturating_sub(ORDER_EPOCH.as_secs());

        let key = counter_key(namespace, now);
        let count = self.store.incr(&key).await?;
        let count = u32::try_from(count).map_err(|_| Error::SequenceExhausted {
            namespace: namespace.to_owned(),
            date: day_stamp(now),
        })?;

        Ok(OrderIdParts { timestamp, count }.to_id())
    }
}
