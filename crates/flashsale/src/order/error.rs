use crate::{ClaimantId, PromotionId};

/// Errors raised by the persisted-order store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RepositoryError {
    /// An order for the pair already exists.
    #[error("order for claimant {claimant} on promotion {promotion} already exists")]
    UniqueViolation {
        claimant: ClaimantId,
        promotion: PromotionId,
    },

    /// The durable stock of the promotion was never seeded.
    #[error("no durable stock for promotion {promotion}")]
    UnknownPromotion { promotion: PromotionId },

    /// The store could not be reached.
    #[error("order store unavailable: {reason}")]
    Unavailable { reason: String },
}
