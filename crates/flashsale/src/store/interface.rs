use crate::{Fields, GroupStart, PendingEntry, ReadCursor, StoreError, StreamEntry, StreamId};
use core::{future::Future, time::Duration};

/// Plain key/value commands of the shared fast store.
///
/// Each call is a single command executed atomically by the store. Nothing in
/// this crate relies on process-local locking for correctness: any
/// read-check-write sequence that must be indivisible is expressed as one
/// command (see [`KeyValueStore::set_nx_px`],
/// [`KeyValueStore::compare_and_delete`] and [`AdmissionScript`]).
pub trait KeyValueStore: Send + Sync {
    /// Returns the string stored at `key`, if any.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the key holds a non-string value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Stores `value` at `key`, replacing any previous value and expiry.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes `key`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    fn del(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Atomically increments the integer at `key` by one and returns the new
    /// value. A missing key counts as `0`.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the value is not an integer.
    fn incr(&self, key: &str) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Sets `key` to `value` with an expiry of `ttl`, only if the key does not
    /// already exist. Returns `true` if the value was set.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Deletes `key` only if it currently holds exactly `expected`. Returns
    /// `true` if the key was deleted.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns `true` if `member` belongs to the set stored at `key`.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the key holds a non-set value.
    fn sismember(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Verdict of the scripted admission step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionVerdict {
    /// Stock was decremented and the marker was recorded.
    Admitted,
    /// The counter was at or below zero; nothing changed.
    OutOfStock,
    /// The marker already contained the member; nothing changed.
    Duplicate,
}

/// The single scripted operation the Admission Gate relies on.
pub trait AdmissionScript: Send + Sync {
    /// Indivisibly, with respect to every other command on the store:
    ///
    /// 1. If `member` is in the set at `marker_key`, return
    ///    [`AdmissionVerdict::Duplicate`].
    /// 2. If the integer at `stock_key` is `<= 0`, return
    ///    [`AdmissionVerdict::OutOfStock`].
    /// 3. Decrement `stock_key`, add `member` to `marker_key`, return
    ///    [`AdmissionVerdict::Admitted`].
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable, `stock_key` is missing or not an
    /// integer, or `marker_key` is not a set. On error no state has changed.
    fn eval_admission(
        &self,
        stock_key: &str,
        marker_key: &str,
        member: &str,
    ) -> impl Future<Output = Result<AdmissionVerdict, StoreError>> + Send;
}

/// Append-only log with consumer groups.
///
/// Within one stream, entries are delivered in append order. Inside a group an
/// entry is owned by exactly one consumer at a time and stays on that
/// consumer's pending list until it is acknowledged or claimed by another
/// consumer.
pub trait StreamStore: Send + Sync {
    /// Appends an entry and returns its id. Creates the stream if needed.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or `key` holds a non-stream value.
    fn xadd(
        &self,
        key: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<StreamId, StoreError>> + Send;

    /// Creates `group` positioned at `start`. When `mkstream` is set, a
    /// missing stream is created empty. Returns `false` if the group already
    /// exists.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the stream is missing and
    /// `mkstream` is not set.
    fn xgroup_create(
        &self,
        key: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Destroys `group` together with its pending lists. Returns `true` if it
    /// existed.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    fn xgroup_destroy(
        &self,
        key: &str,
        group: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Reads up to `count` entries for `consumer`.
    ///
    /// With [`ReadCursor::New`], never-delivered entries are handed to the
    /// consumer and added to its pending list; if none are available and
    /// `block` is set, the call waits up to `block` for an append. With
    /// [`ReadCursor::Pending`], the consumer's own pending entries after the
    /// given id are redelivered immediately, oldest first.
    ///
    /// Every delivery increments the entry's delivery count.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the stream or group is missing.
    fn xreadgroup(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<StreamEntry>, StoreError>> + Send;

    /// Acknowledges entries, removing them from the group's pending lists.
    /// Returns how many were pending.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the stream or group is missing.
    fn xack(
        &self,
        key: &str,
        group: &str,
        ids: &[StreamId],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Lists pending entries of the group, optionally restricted to one
    /// consumer, oldest first.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the stream or group is missing.
    fn xpending(
        &self,
        key: &str,
        group: &str,
        consumer: Option<&str>,
    ) -> impl Future<Output = Result<Vec<PendingEntry>, StoreError>> + Send;

    /// Transfers ownership of pending entries idle for at least `min_idle` to
    /// `consumer` and returns them. Entries that are not pending, or not idle
    /// long enough, are skipped.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the stream or group is missing.
    fn xclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> impl Future<Output = Result<Vec<StreamEntry>, StoreError>> + Send;

    /// Number of entries in the stream; `0` if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or `key` holds a non-stream value.
    fn xlen(&self, key: &str) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// Everything the flash-sale pipeline needs from one shared fast store.
///
/// Blanket-implemented for any cloneable backend implementing the three
/// command families.
pub trait SharedStore:
    KeyValueStore + AdmissionScript + StreamStore + Clone + Send + Sync + 'static
{
}

impl<S> SharedStore for S where
    S: KeyValueStore + AdmissionScript + StreamStore + Clone + Send + Sync + 'static
{
}
