//! The Admission Gate: the latency-sensitive decision step of a flash sale.
//!
//! An admission runs in three phases:
//!
//! 1. A window check against (possibly slightly stale) promotion metadata.
//! 2. One atomic scripted step in the shared fast store that checks the
//!    idempotency marker, checks stock, then decrements stock and records the
//!    marker.
//! 3. For admitted claims only, an append to the claim queue.
//!
//! Phase 3 runs after phase 2 has committed. If it fails, the claimant is
//! admitted but the claim is not queued; the gate logs that case and returns
//! the error so the caller can investigate with
//! [`AdmissionGate::is_admitted`].

use crate::{
    AdmissionScript, AdmissionVerdict, Claim, ClaimQueue, ClaimantId, Error, IdGenerator,
    KeyValueStore, ORDER_ID_NAMESPACE, OrderId, Promotion, PromotionCatalog, PromotionId,
    QueueConfig, Result, SharedStore, SystemClock, TimeSource, WindowStatus, marker_key,
    stock_key,
};

/// What happened to one admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionOutcome {
    /// One unit was reserved and the claim was queued for fulfillment.
    Ok,
    /// The promotion window has not opened yet.
    NotStarted,
    /// The promotion window has closed.
    Ended,
    /// No stock is left.
    OutOfStock,
    /// The claimant was already admitted to this promotion.
    Duplicate,
}

impl AdmissionOutcome {
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of [`AdmissionGate::admit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Admission {
    /// The id the order will be persisted under; `0` unless the outcome is
    /// [`AdmissionOutcome::Ok`].
    pub order_id: OrderId,
    pub outcome: AdmissionOutcome,
}

impl Admission {
    const fn rejected(outcome: AdmissionOutcome) -> Self {
        Self {
            order_id: 0,
            outcome,
        }
    }
}

/// Arbitrates limited stock between any number of concurrent claimants.
///
/// The gate holds no process-local lock: the only serialization point is the
/// scripted step executed by the shared store, so any number of gates in any
/// number of processes may run against the same store.
pub struct AdmissionGate<S, C, I, T = SystemClock> {
    store: S,
    catalog: C,
    ids: I,
    queue: ClaimQueue<S>,
    clock: T,
}

impl<S, C, I> AdmissionGate<S, C, I, SystemClock>
where
    S: SharedStore,
{
    pub fn new(store: S, catalog: C, ids: I, queue: QueueConfig) -> Self {
        Self::with_clock(store, catalog, ids, queue, SystemClock)
    }
}

impl<S, C, I, T> AdmissionGate<S, C, I, T>
where
    S: SharedStore,
{
    pub fn with_clock(store: S, catalog: C, ids: I, queue: QueueConfig, clock: T) -> Self {
        Self {
            queue: ClaimQueue::new(store.clone(), queue),
            store,
            catalog,
            ids,
            clock,
        }
    }

    pub fn queue(&self) -> &ClaimQueue<S> {
        &self.queue
    }
}

impl<S, C, I, T> AdmissionGate<S, C, I, T>
where
    S: SharedStore,
    C: PromotionCatalog,
    I: IdGenerator,
    T: TimeSource + Send + Sync,
{
    /// Seeds the fast-store stock counter of `promotion` and makes sure the
    /// claim queue's consumer group exists.
    ///
    /// Run once when the promotion is set up. Existing idempotency markers are
    /// left in place.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn prepare(&self, promotion: &Promotion) -> Result<()> {
        self.store
            .set(&stock_key(promotion.id), &promotion.stock.to_string())
            .await?;
        self.queue.ensure_group().await?;
        tracing::info!(
            promotion = promotion.id,
            stock = promotion.stock,
            "prepared promotion"
        );
        Ok(())
    }

    /// Attempts to reserve one unit of `promotion` for `claimant`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PromotionNotFound`] if the catalog does not know the
    /// promotion. Infrastructure failures ([`Error::is_retryable`]) leave the
    /// outcome unknown: the reservation may have committed. Check
    /// [`AdmissionGate::is_admitted`] before retrying.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn admit(&self, promotion: PromotionId, claimant: ClaimantId) -> Result<Admission> {
        let window = self
            .catalog
            .window(promotion)
            .await?
            .ok_or(Error::PromotionNotFound(promotion))?;

        let now = self.clock.current_millis();
        match window.status_at(now) {
            WindowStatus::NotStarted => return Ok(Admission::rejected(AdmissionOutcome::NotStarted)),
            WindowStatus::Ended => return Ok(Admission::rejected(AdmissionOutcome::Ended)),
            WindowStatus::Open => {}
        }

        let order_id = self.ids.next_id(ORDER_ID_NAMESPACE).await?;
        let verdict = self
            .store
            .eval_admission(
                &stock_key(promotion),
                &marker_key(promotion),
                &claimant.to_string(),
            )
            .await?;

        let outcome = match verdict {
            AdmissionVerdict::Admitted => AdmissionOutcome::Ok,
            AdmissionVerdict::OutOfStock => AdmissionOutcome::OutOfStock,
            AdmissionVerdict::Duplicate => AdmissionOutcome::Duplicate,
        };
        tracing::debug!(promotion, claimant, ?outcome, "admission decided");
        if !outcome.is_ok() {
            return Ok(Admission::rejected(outcome));
        }

        let claim = Claim {
            order_id,
            promotion,
            claimant,
            submitted_at: now,
        };
        if let Err(err) = self.queue.enqueue(&claim).await {
            tracing::error!(
                promotion,
                claimant,
                order_id,
                error = %err,
                "claim admitted but not queued; needs reconciliation"
            );
            return Err(err.into());
        }

        Ok(Admission { order_id, outcome })
    }

    /// Returns `true` if `claimant` holds the idempotency marker of
    /// `promotion`, i.e. an earlier admission committed.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn is_admitted(&self, promotion: PromotionId, claimant: ClaimantId) -> Result<bool> {
        Ok(self
            .store
            .sismember(&marker_key(promotion), &claimant.to_string())
            .await?)
    }
}
