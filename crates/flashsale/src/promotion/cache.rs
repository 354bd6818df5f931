use crate::{PromotionCatalog, PromotionId, PromotionWindow, Result, SystemClock, TimeSource};
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Settings for [`CachedCatalog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Longest time an answer is served without asking the inner catalog.
    pub freshness: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Cached {
    window: Option<PromotionWindow>,
    fetched_at: u64,
}

/// Freshness-bounded cache in front of another [`PromotionCatalog`].
///
/// Misses are cached as well, so a burst of requests for an unknown promotion
/// does not fall through to the inner catalog. Fetch errors are returned to
/// the caller and leave the cached answer untouched.
pub struct CachedCatalog<P, T = SystemClock> {
    inner: P,
    clock: T,
    config: CacheConfig,
    entries: RwLock<HashMap<PromotionId, Cached>>,
}

impl<P> CachedCatalog<P, SystemClock> {
    pub fn new(inner: P, config: CacheConfig) -> Self {
        Self::with_clock(inner, config, SystemClock)
    }
}

impl<P, T> CachedCatalog<P, T> {
    pub fn with_clock(inner: P, config: CacheConfig, clock: T) -> Self {
        Self {
            inner,
            clock,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drops the cached answer for `promotion`, forcing the next lookup
    /// through to the inner catalog.
    pub fn invalidate(&self, promotion: PromotionId) {
        self.entries.write().remove(&promotion);
    }
}

impl<P, T> PromotionCatalog for CachedCatalog<P, T>
where
    P: PromotionCatalog,
    T: TimeSource + Send + Sync,
{
    async fn window(&self, promotion: PromotionId) -> Result<Option<PromotionWindow>> {
        let now = self.clock.current_millis();
        let freshness = self.config.freshness.as_millis() as u64;

        let cached = self.entries.read().get(&promotion).copied();
        if let Some(cached) = cached {
            if now.saturating_sub(cached.fetched_at) < freshness {
                return Ok(cached.window);
            }
        }

        let window = self.inner.window(promotion).await?;
        tracing::trace!(promotion, found = window.is_some(), "refreshed promotion window");
        self.entries.write().insert(
            promotion,
            Cached {
                window,
                fetched_at: now,
            },
        );
        Ok(window)
    }
}
