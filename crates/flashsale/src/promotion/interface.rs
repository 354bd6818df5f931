use crate::{PromotionId, PromotionWindow, Result};
use core::future::Future;

/// Read-only promotion metadata provider.
///
/// Answers may be slightly stale; the Admission Gate only uses them for the
/// coarse window check that runs before the atomic step.
pub trait PromotionCatalog: Send + Sync {
    /// Returns the admission window of `promotion`, or `None` if the provider
    /// does not know it.
    ///
    /// # Errors
    ///
    /// Fails if the provider cannot be reached.
    fn window(
        &self,
        promotion: PromotionId,
    ) -> impl Future<Output = Result<Option<PromotionWindow>>> + Send;
}
