use crate::{ClaimantId, HolderToken, KeyValueStore, StoreError};
use core::time::Duration;

/// Lock key guarding fulfillment for one claimant.
pub fn claimant_lock_key(claimant: ClaimantId) -> String {
    format!("lock:order:{claimant}")
}

/// A lock held in the shared fast store.
///
/// Returned by [`DistributedLock::try_acquire`]. Dropping it does not release
/// the lock; call [`DistributedLock::release`] or let the TTL lapse.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use = "a held lock should be released"]
pub struct LockToken {
    pub resource_key: String,
    pub holder: HolderToken,
    /// Expiry in milliseconds since the Unix epoch, as seen by the acquirer.
    pub expires_at: u64,
}

/// Token-guarded mutual exclusion over the shared fast store.
///
/// Acquisition is a single set-if-absent with expiry; there is no waiting and
/// no internal retry. Release deletes the key only while it still holds the
/// caller's token, so a holder whose TTL lapsed can never free a lock that
/// was since granted to someone else.
#[derive(Clone, Debug)]
pub struct DistributedLock<S> {
    store: S,
}

impl<S: KeyValueStore> DistributedLock<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Makes one attempt to take `resource_key` for `holder` for `ttl`.
    /// Returns `None` if someone else holds it.
    ///
    /// `now_ms` only feeds [`LockToken::expires_at`]; expiry itself is
    /// enforced by the store.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn try_acquire(
        &self,
        resource_key: &str,
        holder: &HolderToken,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<Option<LockToken>, StoreError> {
        let acquired = self
            .store
            .set_nx_px(resource_key, holder.as_str(), ttl)
            .await?;
        if !acquired {
            tracing::debug!(resource_key, %holder, "lock contended");
            return Ok(None);
        }
        Ok(Some(LockToken {
            resource_key: resource_key.to_owned(),
            holder: holder.clone(),
            expires_at: now_ms + ttl.as_millis() as u64,
        }))
    }

    /// Releases `token`. Returns `false` if the lock had already expired or
    /// been taken over.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn release(&self, token: LockToken) -> Result<bool, StoreError> {
        let released = self
            .store
            .compare_and_delete(&token.resource_key, token.holder.as_str())
            .await?;
        if !released {
            tracing::warn!(
                resource_key = %token.resource_key,
                holder = %token.holder,
                "lock was no longer ours at release"
            );
        }
        Ok(released)
    }
}
