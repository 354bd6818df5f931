use core::{fmt, time::Duration};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Flat field/value pairs of a stream entry, in insertion order.
pub type Fields = Vec<(String, String)>;

/// Identifier of a stream entry: append time in milliseconds plus a sequence
/// number that breaks ties within one millisecond.
///
/// Ids are strictly increasing within a stream, so ordering by id is ordering
/// by append.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    /// Sorts before every real entry.
    pub const ZERO: Self = Self::new(0, 0);

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// A delivered stream entry together with its delivery metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Fields,
    /// How many times the entry has been handed to a consumer, this delivery
    /// included.
    pub delivery_count: u64,
}

impl StreamEntry {
    /// Returns the first value recorded under `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Where a newly created consumer group starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupStart {
    /// Deliver every entry already in the stream (`0`).
    Head,
    /// Deliver only entries appended after creation (`$`).
    Tail,
}

/// Which entries a group read returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// The reading consumer's own pending entries with an id greater than
    /// `after`. Use [`StreamId::ZERO`] to start from the beginning.
    Pending { after: StreamId },
}

/// Summary of one delivered-but-unacknowledged entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    pub consumer: String,
    pub delivery_count: u64,
    /// Time since the last delivery.
    pub idle: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) consumer: String,
    pub(crate) count: u64,
    pub(crate) delivered_at: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Group {
    pub(crate) last_delivered: StreamId,
    pub(crate) pending: BTreeMap<StreamId, Delivery>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Stream {
    pub(crate) entries: BTreeMap<StreamId, Fields>,
    pub(crate) last_id: StreamId,
    pub(crate) groups: HashMap<String, Group>,
}

impl Stream {
    /// Id the next append at `now` millis would receive. Never
    /// [`StreamId::ZERO`], which sorts before every entry.
    pub(crate) fn next_id(&self, now: u64) -> StreamId {
        if now > self.last_id.millis {
            StreamId::new(now, 0)
        } else {
            StreamId::new(self.last_id.millis, self.last_id.seq + 1)
        }
    }

    pub(crate) fn insert(&mut self, id: StreamId, fields: Fields) {
        if id > self.last_id {
            self.last_id = id;
        }
        self.entries.insert(id, fields);
    }

    /// Ids of entries after the group cursor, up to `count`.
    pub(crate) fn undelivered(&self, group: &Group, count: usize) -> Vec<StreamId> {
        use core::ops::Bound::{Excluded, Unbounded};
        self.entries
            .range((Excluded(group.last_delivered), Unbounded))
            .take(count)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Builds the delivered view of `id` after its delivery was recorded.
    pub(crate) fn view(&self, group: &Group, id: StreamId) -> Option<StreamEntry> {
        let fields = self.entries.get(&id)?;
        let delivery_count = group.pending.get(&id).map_or(0, |d| d.count);
        Some(StreamEntry {
            id,
            fields: fields.clone(),
            delivery_count,
        })
    }
}

impl Group {
    pub(crate) fn starting_at(last_delivered: StreamId) -> Self {
        Self {
            last_delivered,
            pending: BTreeMap::new(),
        }
    }

    /// Records that `id` was handed to `consumer` at `at` millis. New entries
    /// advance the group cursor; redeliveries and claims bump the count and
    /// move ownership.
    pub(crate) fn record_delivery(&mut self, id: StreamId, consumer: &str, at: u64) {
        if id > self.last_delivered {
            self.last_delivered = id;
        }
        let delivery = self.pending.entry(id).or_insert_with(|| Delivery {
            consumer: consumer.to_owned(),
            count: 0,
            delivered_at: at,
        });
        delivery.consumer.clear();
        delivery.consumer.push_str(consumer);
        delivery.count += 1;
        delivery.delivered_at = at;
    }

    /// Pending ids owned by `consumer` with an id greater than `after`.
    pub(crate) fn pending_of(&self, consumer: &str, after: StreamId, count: usize) -> Vec<StreamId> {
        use core::ops::Bound::{Excluded, Unbounded};
        self.pending
            .range((Excluded(after), Unbounded))
            .filter(|(_, d)| d.consumer == consumer)
            .take(count)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn ack(&mut self, ids: &[StreamId]) -> usize {
        ids.iter()
            .filter(|id| self.pending.remove(*id).is_some())
            .count()
    }
}
