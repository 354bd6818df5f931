//! The Fulfillment Worker: turns queued claims into persisted orders.
//!
//! One worker is the single active consumer of its queue partition. Each
//! delivered entry walks through
//!
//! ```text
//! DELIVERED ─┬─ lock held ──┬─ order written ─────────────► PERSISTED (ack)
//!            │              ├─ same order already written ─► PERSISTED (ack)
//!            │              └─ durable check failed ───────► dead-lettered (ack)
//!            └─ lock contended ─► left pending, redelivered later
//! ```
//!
//! Every entry that is not acknowledged stays on this consumer's pending list.
//! The worker drains that list on startup, after any batch with a failed entry,
//! whenever a blocking read times out, and at least once per `block` while new
//! entries keep arriving. A crash at any point between delivery and
//! acknowledgement therefore leads to redelivery rather than loss.

use crate::{
    ClaimQueue, DistributedLock, Disposition, Fulfillment, HolderToken, Order, OrderRepository,
    QueueEntry, ReconcileReason, RepositoryError, Result, SharedStore, StoreError, StreamId,
    SystemClock, TimeSource, WorkerConfig, WorkerStats, claimant_lock_key,
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Consumes the claim queue and writes orders through an [`OrderRepository`].
pub struct FulfillmentWorker<S, R, T = SystemClock> {
    queue: ClaimQueue<S>,
    lock: DistributedLock<S>,
    repository: R,
    clock: T,
    config: WorkerConfig,
    holder: HolderToken,
    stats: Arc<WorkerStats>,
}

impl<S, R> FulfillmentWorker<S, R, SystemClock>
where
    S: SharedStore,
    R: OrderRepository,
{
    pub fn new(store: S, repository: R, config: WorkerConfig) -> Self {
        Self::with_clock(store, repository, config, SystemClock)
    }
}

impl<S, R, T> FulfillmentWorker<S, R, T>
where
    S: SharedStore,
    R: OrderRepository,
    T: TimeSource + Send + Sync,
{
    pub fn with_clock(store: S, repository: R, config: WorkerConfig, clock: T) -> Self {
        Self {
            queue: ClaimQueue::new(store.clone(), config.queue.clone()),
            lock: DistributedLock::new(store),
            holder: HolderToken::for_local(&config.consumer),
            repository,
            clock,
            config,
            stats: Arc::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared handle to the running totals.
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Startup makes sure the consumer group exists, optionally reclaims idle
    /// entries of other consumers, and drains this consumer's pending list.
    /// Failures of single entries are logged and never end the loop; a
    /// missing group is recreated at the stream tail.
    ///
    /// # Errors
    ///
    /// Returns when the queue itself fails for any reason other than a
    /// missing group. The caller should restart the worker with backoff.
    #[tracing::instrument(skip_all, fields(consumer = %self.config.consumer))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.queue.ensure_group().await?;
        if let Some(min_idle) = self.config.reclaim_idle {
            let adopted = self
                .queue
                .reclaim(&self.config.consumer, min_idle, usize::MAX)
                .await?;
            tracing::info!(adopted = adopted.len(), "adopted idle entries");
        }
        self.rescan_pending().await?;
        let mut last_drain = Instant::now();
        tracing::info!("fulfillment worker started");

        loop {
            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                read = self.queue.read_new(
                    &self.config.consumer,
                    self.config.batch_size,
                    Some(self.config.block),
                ) => read,
            };

            let drain_due = match read {
                // Idle: look for entries left behind by failed attempts.
                Ok(entries) if entries.is_empty() => true,
                Ok(entries) => {
                    let mut failed = false;
                    for entry in &entries {
                        failed |= self.handle(entry).await.is_err();
                    }
                    if failed {
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                    // Contended entries only come back through the drain, so
                    // a busy stream still gets one every `block`.
                    failed || last_drain.elapsed() >= self.config.block
                }
                Err(err) if err.is_no_group() => {
                    self.recreate_group(&err).await?;
                    false
                }
                Err(err) => {
                    tracing::error!(error = %err, "claim queue unavailable; stopping worker");
                    return Err(err.into());
                }
            };
            if drain_due {
                self.rescan_pending().await?;
                last_drain = Instant::now();
            }
        }

        tracing::info!(stats = ?self.stats.snapshot(), "fulfillment worker stopped");
        Ok(())
    }

    async fn recreate_group(&self, cause: &StoreError) -> Result<(), StoreError> {
        tracing::warn!(error = %cause, "consumer group missing; recreating at stream tail");
        self.queue.ensure_group().await?;
        Ok(())
    }

    async fn rescan_pending(&self) -> Result<(), StoreError> {
        match self.drain_pending().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_group() => self.recreate_group(&err).await,
            Err(err) => Err(err),
        }
    }

    /// Makes one pass over this consumer's pending list, oldest first, and
    /// returns how many entries it visited.
    ///
    /// Entries that stay pending (contended, or failed again) are not
    /// revisited within the same pass.
    ///
    /// # Errors
    ///
    /// Fails only if the pending list cannot be read.
    pub async fn drain_pending(&self) -> Result<usize, StoreError> {
        let mut after = StreamId::ZERO;
        let mut visited = 0;
        loop {
            let batch = self
                .queue
                .read_pending(&self.config.consumer, after, self.config.batch_size.max(1))
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.id;
            for entry in &batch {
                // Failures are logged by `handle`; the entry stays pending.
                let _ = self.handle(entry).await;
            }
            visited += batch.len();
        }
        if visited > 0 {
            tracing::info!(visited, "drained pending entries");
        }
        Ok(visited)
    }

    async fn handle(&self, entry: &QueueEntry) -> Result<Disposition> {
        match self.process(entry).await {
            Ok(disposition) => {
                self.stats.record(&disposition);
                Ok(disposition)
            }
            Err(err) => {
                self.stats.record_failure();
                tracing::error!(
                    entry = %entry.id,
                    deliveries = entry.delivery_count,
                    error = %err,
                    "failed to process claim; leaving it pending"
                );
                Err(err)
            }
        }
    }

    /// Settles one delivered entry.
    ///
    /// # Errors
    ///
    /// Fails if the store or the repository fails. The entry then stays
    /// pending and is retried by the next drain.
    pub async fn process(&self, entry: &QueueEntry) -> Result<Disposition> {
        let claim = match entry.claim() {
            Ok(claim) => claim,
            Err(err) => return self.reconcile(entry, None, ReconcileReason::Undecodable(err)).await,
        };
        let order = Order {
            id: claim.order_id,
            promotion: claim.promotion,
            claimant: claim.claimant,
            submitted_at: claim.submitted_at,
        };

        let now = self.clock.current_millis();
        let Some(token) = self
            .lock
            .try_acquire(
                &claimant_lock_key(claim.claimant),
                &self.holder,
                self.config.lock_ttl,
                now,
            )
            .await?
        else {
            return Ok(Disposition::LockContended);
        };

        let result = self.fulfill(entry, &order).await;
        if let Err(err) = self.lock.release(token).await {
            // The TTL frees the lock eventually.
            tracing::warn!(claimant = claim.claimant, error = %err, "failed to release lock");
        }
        result
    }

    async fn fulfill(&self, entry: &QueueEntry, order: &Order) -> Result<Disposition> {
        if let Some(existing) = self
            .repository
            .find_order(order.claimant, order.promotion)
            .await?
        {
            return self.settle_existing(entry, order, existing).await;
        }

        match self.repository.fulfill(order).await {
            Ok(Fulfillment::Persisted) => {
                self.ack(entry).await?;
                tracing::debug!(
                    order_id = order.id,
                    promotion = order.promotion,
                    claimant = order.claimant,
                    "order persisted"
                );
                Ok(Disposition::Persisted)
            }
            Ok(Fulfillment::StockExhausted) => {
                self.reconcile(entry, Some(order), ReconcileReason::DurableStockExhausted)
                    .await
            }
            // Written concurrently since the lookup above.
            Err(RepositoryError::UniqueViolation { .. }) => {
                match self
                    .repository
                    .find_order(order.claimant, order.promotion)
                    .await?
                {
                    Some(existing) => self.settle_existing(entry, order, existing).await,
                    None => Err(RepositoryError::UniqueViolation {
                        claimant: order.claimant,
                        promotion: order.promotion,
                    }
                    .into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn settle_existing(
        &self,
        entry: &QueueEntry,
        order: &Order,
        existing: Order,
    ) -> Result<Disposition> {
        if existing.id == order.id {
            self.ack(entry).await?;
            tracing::debug!(order_id = order.id, "order already persisted; acknowledged redelivery");
            return Ok(Disposition::AlreadyPersisted);
        }
        self.reconcile(
            entry,
            Some(order),
            ReconcileReason::ConflictingOrder {
                existing: existing.id,
            },
        )
        .await
    }

    async fn reconcile(
        &self,
        entry: &QueueEntry,
        order: Option<&Order>,
        reason: ReconcileReason,
    ) -> Result<Disposition> {
        tracing::error!(
            entry = %entry.id,
            order_id = order.map(|o| o.id),
            promotion = order.map(|o| o.promotion),
            claimant = order.map(|o| o.claimant),
            %reason,
            "claim needs reconciliation; dead-lettering"
        );
        self.queue.dead_letter(entry, &reason.to_string()).await?;
        Ok(Disposition::Reconciled(reason))
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        if !self.queue.ack(entry.id).await? {
            tracing::warn!(entry = %entry.id, "entry was no longer pending at acknowledgement");
        }
        Ok(())
    }
}
