use crate::{Promotion, PromotionCatalog, PromotionId, PromotionWindow, Result};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// In-process [`PromotionCatalog`]. Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    windows: Arc<RwLock<HashMap<PromotionId, PromotionWindow>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes (or replaces) the window of `promotion`.
    pub fn insert(&self, promotion: &Promotion) {
        self.windows.write().insert(promotion.id, promotion.window());
    }

    pub fn remove(&self, promotion: PromotionId) -> Option<PromotionWindow> {
        self.windows.write().remove(&promotion)
    }
}

impl PromotionCatalog for MemoryCatalog {
    async fn window(&self, promotion: PromotionId) -> Result<Option<PromotionWindow>> {
        Ok(self.windows.read().get(&promotion).copied())
    }
}
