use crate::{ClaimantId, Fields, OrderId, PromotionId, StreamEntry, StreamId};
use core::str::FromStr;

/// Field names of the queue wire entry.
pub mod wire {
    pub const ORDER_ID: &str = "orderId";
    pub const PROMOTION_ID: &str = "promotionId";
    pub const CLAIMANT_ID: &str = "claimantId";
    pub const SUBMITTED_AT: &str = "submittedAt";
    /// Added to dead-lettered entries.
    pub const REASON: &str = "reason";
    /// Added to dead-lettered entries: id of the entry in the source stream.
    pub const SOURCE_ID: &str = "sourceId";
}

/// An admitted claim on one unit of inventory, waiting for fulfillment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Claim {
    pub order_id: OrderId,
    pub promotion: PromotionId,
    pub claimant: ClaimantId,
    /// Admission time, milliseconds since the Unix epoch.
    pub submitted_at: u64,
}

/// A queue entry that does not carry a well-formed [`Claim`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` has invalid value `{value}`")]
    Invalid { field: &'static str, value: String },
}

impl Claim {
    /// Encodes the claim as the flat wire field set.
    pub fn to_fields(&self) -> Fields {
        vec![
            (wire::ORDER_ID.to_owned(), self.order_id.to_string()),
            (wire::PROMOTION_ID.to_owned(), self.promotion.to_string()),
            (wire::CLAIMANT_ID.to_owned(), self.claimant.to_string()),
            (wire::SUBMITTED_AT.to_owned(), self.submitted_at.to_string()),
        ]
    }

    /// Decodes a claim from wire fields. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Fails if a field is missing or not a base-10 integer of the right
    /// width.
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, DecodeError> {
        Ok(Self {
            order_id: parse(fields, wire::ORDER_ID)?,
            promotion: parse(fields, wire::PROMOTION_ID)?,
            claimant: parse(fields, wire::CLAIMANT_ID)?,
            submitted_at: parse(fields, wire::SUBMITTED_AT)?,
        })
    }
}

fn parse<N: FromStr>(fields: &[(String, String)], name: &'static str) -> Result<N, DecodeError> {
    let raw = fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or(DecodeError::Missing(name))?;
    raw.parse().map_err(|_| DecodeError::Invalid {
        field: name,
        value: raw.to_owned(),
    })
}

/// A delivered queue entry: the raw fields plus delivery metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: StreamId,
    /// Deliveries so far, this one included.
    pub delivery_count: u64,
    /// The consumer currently owning the entry.
    pub consumer: String,
    pub fields: Fields,
}

impl QueueEntry {
    pub(crate) fn delivered(entry: StreamEntry, consumer: &str) -> Self {
        Self {
            id: entry.id,
            delivery_count: entry.delivery_count,
            consumer: consumer.to_owned(),
            fields: entry.fields,
        }
    }

    /// Decodes the carried claim.
    ///
    /// # Errors
    ///
    /// See [`Claim::from_fields`].
    pub fn claim(&self) -> Result<Claim, DecodeError> {
        Claim::from_fields(&self.fields)
    }
}
