use crate::{
    Claim, GroupStart, PendingEntry, QueueConfig, QueueEntry, ReadCursor, StoreError, StreamId,
    StreamStore, wire,
};
use core::time::Duration;

/// Typed view of the claim stream and its consumer group.
///
/// Producers call [`ClaimQueue::enqueue`]; the single active consumer of a
/// partition reads with [`ClaimQueue::read_new`] and
/// [`ClaimQueue::read_pending`], and settles each entry with
/// [`ClaimQueue::ack`] or [`ClaimQueue::dead_letter`]. Anything delivered but
/// not settled stays on the consumer's pending list.
#[derive(Clone, Debug)]
pub struct ClaimQueue<S> {
    store: S,
    config: QueueConfig,
}

impl<S: StreamStore> ClaimQueue<S> {
    pub fn new(store: S, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Creates the consumer group at the current tail if it does not exist,
    /// creating the stream as well. Returns `true` if the group was created.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn ensure_group(&self) -> Result<bool, StoreError> {
        let created = self
            .store
            .xgroup_create(&self.config.stream, &self.config.group, GroupStart::Tail, true)
            .await?;
        if created {
            tracing::info!(
                stream = %self.config.stream,
                group = %self.config.group,
                "created consumer group at stream tail"
            );
        }
        Ok(created)
    }

    /// Appends `claim` to the stream.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable. The claim may or may not have been
    /// appended in that case.
    pub async fn enqueue(&self, claim: &Claim) -> Result<StreamId, StoreError> {
        self.store
            .xadd(&self.config.stream, claim.to_fields())
            .await
    }

    /// Hands up to `count` never-delivered entries to `consumer`, waiting up
    /// to `block` when none are available.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the group is missing.
    pub async fn read_new(
        &self,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        self.read(consumer, ReadCursor::New, count, block).await
    }

    /// Redelivers up to `count` of `consumer`'s own pending entries with an id
    /// greater than `after`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the group is missing.
    pub async fn read_pending(
        &self,
        consumer: &str,
        after: StreamId,
        count: usize,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        self.read(consumer, ReadCursor::Pending { after }, count, None)
            .await
    }

    async fn read(
        &self,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let entries = self
            .store
            .xreadgroup(
                &self.config.stream,
                &self.config.group,
                consumer,
                cursor,
                count,
                block,
            )
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| QueueEntry::delivered(entry, consumer))
            .collect())
    }

    /// Acknowledges one entry. Returns `false` if it was not pending.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the group is missing.
    pub async fn ack(&self, id: StreamId) -> Result<bool, StoreError> {
        let acked = self
            .store
            .xack(&self.config.stream, &self.config.group, &[id])
            .await?;
        Ok(acked > 0)
    }

    /// Copies `entry` to the dead-letter stream with `reason` and its source
    /// id attached, then acknowledges it. Returns the dead-letter entry id.
    ///
    /// # Errors
    ///
    /// Fails if either step fails. If only the acknowledgement failed, the
    /// entry is redelivered and may be dead-lettered twice.
    pub async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<StreamId, StoreError> {
        let mut fields = entry.fields.clone();
        fields.push((wire::REASON.to_owned(), reason.to_owned()));
        fields.push((wire::SOURCE_ID.to_owned(), entry.id.to_string()));

        let dlq_id = self
            .store
            .xadd(&self.config.dead_letter_stream(), fields)
            .await?;
        self.ack(entry.id).await?;
        Ok(dlq_id)
    }

    /// Pending entries of `consumer`, or of the whole group.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the group is missing.
    pub async fn pending(&self, consumer: Option<&str>) -> Result<Vec<PendingEntry>, StoreError> {
        self.store
            .xpending(&self.config.stream, &self.config.group, consumer)
            .await
    }

    /// Moves up to `count` entries that other consumers left pending for at
    /// least `min_idle` onto `consumer`'s pending list and returns them.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::NoGroup`] if the group is missing.
    pub async fn reclaim(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let ids: Vec<_> = self
            .pending(None)
            .await?
            .into_iter()
            .filter(|p| p.consumer != consumer && p.idle >= min_idle)
            .take(count)
            .map(|p| p.id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = self
            .store
            .xclaim(
                &self.config.stream,
                &self.config.group,
                consumer,
                min_idle,
                &ids,
            )
            .await?;
        tracing::info!(
            stream = %self.config.stream,
            consumer,
            reclaimed = claimed.len(),
            "reclaimed idle pending entries"
        );
        Ok(claimed
            .into_iter()
            .map(|entry| QueueEntry::delivered(entry, consumer))
            .collect())
    }

    /// Entries currently held by the dead-letter stream.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn dead_letter_len(&self) -> Result<usize, StoreError> {
        self.store.xlen(&self.config.dead_letter_stream()).await
    }
}
