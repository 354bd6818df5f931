use crate::PromotionId;

/// Namespace of the day-scoped counter that order ids are drawn from.
pub const ORDER_ID_NAMESPACE: &str = "order";

/// Fast-store stock counter of `promotion`.
pub fn stock_key(promotion: PromotionId) -> String {
    format!("seckill:stock:{promotion}")
}

/// Idempotency marker set of `promotion`; members are claimant ids.
pub fn marker_key(promotion: PromotionId) -> String {
    format!("seckill:order:{promotion}")
}
