use crate::{ClaimantId, Fulfillment, Order, OrderRepository, PromotionId, RepositoryError};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Default)]
struct Tables {
    stock: HashMap<PromotionId, u64>,
    orders: HashMap<(ClaimantId, PromotionId), Order>,
}

/// In-process [`OrderRepository`] with transactional semantics.
///
/// Clones share the same tables. The unique index on
/// `(claimant, promotion)` is enforced by [`MemoryRepository::insert`] and
/// [`OrderRepository::fulfill`] alike.
#[derive(Clone, Debug, Default)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durable stock of `promotion`.
    pub fn seed_stock(&self, promotion: PromotionId, stock: u64) {
        self.tables.lock().stock.insert(promotion, stock);
    }

    pub fn stock(&self, promotion: PromotionId) -> Option<u64> {
        self.tables.lock().stock.get(&promotion).copied()
    }

    /// All orders, sorted by id.
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.tables.lock().orders.values().copied().collect();
        orders.sort_unstable_by_key(|o| o.id);
        orders
    }

    /// Inserts `order` without touching stock.
    ///
    /// # Errors
    ///
    /// Fails with [`RepositoryError::UniqueViolation`] if the pair already has
    /// an order.
    pub fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock();
        Self::insert_into(&mut tables, order)
    }

    fn insert_into(tables: &mut Tables, order: Order) -> Result<(), RepositoryError> {
        let key = (order.claimant, order.promotion);
        if tables.orders.contains_key(&key) {
            return Err(RepositoryError::UniqueViolation {
                claimant: order.claimant,
                promotion: order.promotion,
            });
        }
        tables.orders.insert(key, order);
        Ok(())
    }
}

impl OrderRepository for MemoryRepository {
    async fn find_order(
        &self,
        claimant: ClaimantId,
        promotion: PromotionId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.lock().orders.get(&(claimant, promotion)).copied())
    }

    async fn fulfill(&self, order: &Order) -> Result<Fulfillment, RepositoryError> {
        let mut tables = self.tables.lock();
        let remaining = *tables
            .stock
            .get(&order.promotion)
            .ok_or(RepositoryError::UnknownPromotion {
                promotion: order.promotion,
            })?;
        if remaining == 0 {
            return Ok(Fulfillment::StockExhausted);
        }
        Self::insert_into(&mut tables, *order)?;
        tables.stock.insert(order.promotion, remaining - 1);
        Ok(Fulfillment::Persisted)
    }
}
