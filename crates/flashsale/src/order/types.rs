use crate::{ClaimantId, OrderId, PromotionId};

/// A persisted, immutable order. At most one exists per
/// `(claimant, promotion)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Order {
    pub id: OrderId,
    pub promotion: PromotionId,
    pub claimant: ClaimantId,
    /// When the claim was admitted, milliseconds since the Unix epoch.
    pub submitted_at: u64,
}

/// Result of [`OrderRepository::fulfill`](crate::OrderRepository::fulfill).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fulfillment {
    /// The durable stock was decremented and the order written.
    Persisted,
    /// The durable stock was already exhausted; nothing was written.
    StockExhausted,
}
