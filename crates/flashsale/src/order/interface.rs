use crate::{ClaimantId, Fulfillment, Order, PromotionId, RepositoryError};
use core::future::Future;

/// Write contract of the relational order store.
///
/// The store keeps a durable stock counter per promotion that is independent
/// of the fast-store counter used for admission.
pub trait OrderRepository: Send + Sync {
    /// Looks up the order of `claimant` on `promotion`.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be reached.
    fn find_order(
        &self,
        claimant: ClaimantId,
        promotion: PromotionId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// In one transaction: check that durable stock remains, insert `order`,
    /// and decrement the durable stock. Either all of it happens or none.
    ///
    /// # Errors
    ///
    /// Fails with [`RepositoryError::UniqueViolation`] if an order already
    /// exists for the pair, and with [`RepositoryError::Unavailable`] if the
    /// store cannot be reached.
    fn fulfill(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<Fulfillment, RepositoryError>> + Send;
}
