/// Identifier of a promotion (a limited-stock voucher on sale).
pub type PromotionId = u64;

/// Identifier of the party claiming inventory. Always passed explicitly.
pub type ClaimantId = u64;

/// Globally unique order identifier produced by [`IdGenerator`](crate::IdGenerator).
pub type OrderId = i64;

/// Bit layout of an [`OrderId`].
///
/// ```text
///  Bit Index:  63           32 31             0
///              +--------------+---------------+
///  Field:      | timestamp    | day counter   |
///              +--------------+---------------+
///              |<-- MSB -- 64 bits -- LSB --->|
/// ```
///
/// The timestamp counts whole seconds since [`ORDER_EPOCH`](crate::ORDER_EPOCH);
/// the counter comes from a shared increment scoped to one namespace and one
/// calendar day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderIdParts {
    pub timestamp: u64,
    pub count: u32,
}

impl OrderIdParts {
    /// Width of the counter field.
    pub const COUNT_BITS: u32 = 32;

    /// Packs the parts into an id. Timestamps wider than 31 bits are masked so
    /// the result stays non-negative.
    pub const fn to_id(self) -> OrderId {
        let timestamp = self.timestamp & (i64::MAX as u64 >> Self::COUNT_BITS);
        ((timestamp << Self::COUNT_BITS) | self.count as u64) as OrderId
    }

    /// Splits an id back into its parts.
    pub const fn from_id(id: OrderId) -> Self {
        let raw = id as u64;
        Self {
            timestamp: raw >> Self::COUNT_BITS,
            count: raw as u32,
        }
    }
}
