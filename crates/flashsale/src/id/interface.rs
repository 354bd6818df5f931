use crate::{OrderId, Result};
use core::future::Future;

/// Produces globally unique, roughly time-ordered identifiers.
pub trait IdGenerator: Send + Sync {
    /// Returns the next id for `namespace`.
    ///
    /// Ids from a later second compare greater than every id from an earlier
    /// second; ids within the same second are ordered by the shared counter.
    ///
    /// # Errors
    ///
    /// Propagates any failure of the shared counter. Implementations must not
    /// synthesize ids locally when the counter is unreachable, since that would
    /// break the non-overlap guarantee of the day-scoped counter.
    fn next_id(&self, namespace: &str) -> impl Future<Output = Result<OrderId>> + Send;
}
