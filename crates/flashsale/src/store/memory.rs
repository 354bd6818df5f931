use crate::{
    AdmissionScript, AdmissionVerdict, Fields, GroupStart, KeyValueStore, PendingEntry,
    ReadCursor, StoreError, StreamEntry, StreamId, StreamStore, SystemClock, TimeSource,
    store::{
        journal::{Journal, Record},
        stream::{Delivery, Group, Stream},
    },
};
use core::time::Duration;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Notify;

/// Embedded reference backend for the shared fast store.
///
/// All commands on one store instance are serialized through a single state
/// lock, standing in for the single-threaded command execution of an external
/// store server. Clones share the same keyspace, so a `MemoryStore` can be
/// handed to any number of gates and workers in one process.
///
/// Opened with [`MemoryStore::open`], every mutation is first appended to a
/// journal and synced; reopening the same path rebuilds stock counters,
/// markers, streams, group cursors and pending lists. Keys carrying an expiry
/// are evicted lazily against the store's clock.
///
/// # Example
///
/// ```
/// use flashsale::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// assert_eq!(store.incr("icr:order:2025:01:01").await.unwrap(), 1);
/// assert_eq!(store.incr("icr:order:2025:01:01").await.unwrap(), 2);
/// # }
/// ```
pub struct MemoryStore<T = SystemClock> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State>,
    clock: T,
    appended: Notify,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore<SystemClock> {
    /// Creates an empty, non-durable store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Opens a journaled store at `path`, replaying any existing journal.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be read or written, or holds a corrupted
    /// record before its final line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, SystemClock)
    }
}

impl<T: TimeSource> MemoryStore<T> {
    /// Creates an empty, non-durable store on `clock`.
    pub fn with_clock(clock: T) -> Self {
        Self::from_state(State::default(), clock)
    }

    /// Opens a journaled store at `path` on `clock`.
    ///
    /// # Errors
    ///
    /// See [`MemoryStore::open`].
    pub fn open_with_clock(path: impl AsRef<Path>, clock: T) -> Result<Self, StoreError> {
        let (journal, records) = Journal::open(path)?;
        let mut state = State::default();
        let replayed = records.len();
        for record in records {
            state.apply(record);
        }
        tracing::debug!(
            path = %journal.path().display(),
            replayed,
            "replayed store journal"
        );
        state.journal = Some(journal);
        Ok(Self::from_state(state, clock))
    }

    fn from_state(state: State, clock: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                clock,
                appended: Notify::new(),
            }),
        }
    }

    /// Path of the backing journal, if the store is durable.
    pub fn journal_path(&self) -> Option<PathBuf> {
        let state = self.inner.state.lock();
        state.journal.as_ref().map(|j| j.path().to_path_buf())
    }

    /// Rewrites the journal so that it holds only what rebuilds the current
    /// state, and returns the number of records kept. A non-durable store has
    /// nothing to compact and returns `0`.
    ///
    /// Every other command waits while the rewrite runs.
    ///
    /// # Errors
    ///
    /// Fails if the new journal cannot be written. The old journal then
    /// stays in place.
    pub fn compact(&self) -> Result<usize, StoreError> {
        self.with_state(|state, now| {
            let records = state.snapshot(now);
            let Some(journal) = state.journal.as_mut() else {
                return Ok(0);
            };
            journal.rewrite(&records)?;
            tracing::info!(
                path = %journal.path().display(),
                records = records.len(),
                "compacted store journal"
            );
            Ok(records.len())
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State, u64) -> R) -> R {
        let now = self.inner.clock.current_millis();
        let mut state = self.inner.state.lock();
        f(&mut state, now)
    }
}

enum Value {
    Str(String),
    Set(HashSet<String>),
    Stream(Stream),
}

struct Slot {
    value: Value,
    expires_at: Option<u64>,
}

impl Slot {
    const fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct State {
    keys: HashMap<String, Slot>,
    journal: Option<Journal>,
}

fn stream_snapshot(key: &str, stream: &Stream, records: &mut Vec<Record>) {
    records.extend(stream.entries.iter().map(|(id, fields)| Record::XAdd {
        key: key.to_owned(),
        id: *id,
        fields: fields.clone(),
    }));
    let mut groups: Vec<_> = stream.groups.iter().collect();
    groups.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    for (name, group) in groups {
        records.push(Record::GroupCreate {
            key: key.to_owned(),
            group: name.clone(),
            last_delivered: group.last_delivered,
        });
        records.extend(group.pending.iter().map(|(id, d)| Record::Pending {
            key: key.to_owned(),
            group: name.clone(),
            id: *id,
            consumer: d.consumer.clone(),
            count: d.count,
            delivered_at: d.delivered_at,
        }));
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
    }
}

fn no_group(stream: &str, group: &str) -> StoreError {
    StoreError::NoGroup {
        stream: stream.to_owned(),
        group: group.to_owned(),
    }
}

impl State {
    fn slot(&mut self, key: &str, now: u64) -> Option<&Slot> {
        if self.keys.get(key).is_some_and(|slot| slot.expired(now)) {
            self.keys.remove(key);
        }
        self.keys.get(key)
    }

    fn string(&mut self, key: &str, now: u64) -> Result<Option<&String>, StoreError> {
        match self.slot(key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn integer(&mut self, key: &str, now: u64) -> Result<Option<i64>, StoreError> {
        match self.string(key, now)? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_owned(),
                }),
        }
    }

    fn set_members(&mut self, key: &str, now: u64) -> Result<Option<&HashSet<String>>, StoreError> {
        match self.slot(key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn stream(&mut self, key: &str, now: u64) -> Result<Option<&Stream>, StoreError> {
        match self.slot(key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Stream(stream),
                ..
            }) => Ok(Some(stream)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn group(&mut self, key: &str, group: &str, now: u64) -> Result<(&Stream, &Group), StoreError> {
        let stream = self.stream(key, now)?.ok_or_else(|| no_group(key, group))?;
        let found = stream.groups.get(group).ok_or_else(|| no_group(key, group))?;
        Ok((stream, found))
    }

    /// Journals `record`, then applies it. Nothing is applied if the journal
    /// write fails.
    fn commit(&mut self, record: Record) -> Result<(), StoreError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&record)?;
        }
        self.apply(record);
        Ok(())
    }

    fn stream_entry(&mut self, key: String) -> Option<&mut Stream> {
        let slot = self
            .keys
            .entry(key)
            .or_insert_with(|| Slot::new(Value::Stream(Stream::default())));
        match &mut slot.value {
            Value::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    fn incr_by(&mut self, key: String, by: i64) {
        let slot = self
            .keys
            .entry(key)
            .or_insert_with(|| Slot::new(Value::Str("0".to_owned())));
        if let Value::Str(raw) = &mut slot.value {
            let current = raw.parse::<i64>().unwrap_or(0);
            *raw = (current + by).to_string();
        }
    }

    /// Applies a validated mutation. Records are only produced after their
    /// preconditions were checked, so application itself cannot fail; during
    /// replay, records that no longer fit the keyspace are skipped.
    fn apply(&mut self, record: Record) {
        match record {
            Record::Set {
                key,
                value,
                expires_at,
            } => {
                self.keys.insert(
                    key,
                    Slot {
                        value: Value::Str(value),
                        expires_at,
                    },
                );
            }
            Record::Del { key } => {
                self.keys.remove(&key);
            }
            Record::IncrBy { key, by } => self.incr_by(key, by),
            Record::Admit {
                stock_key,
                marker_key,
                member,
            } => {
                self.incr_by(stock_key, -1);
                let slot = self
                    .keys
                    .entry(marker_key)
                    .or_insert_with(|| Slot::new(Value::Set(HashSet::new())));
                if let Value::Set(members) = &mut slot.value {
                    members.insert(member);
                }
            }
            Record::XAdd { key, id, fields } => {
                if let Some(stream) = self.stream_entry(key) {
                    stream.insert(id, fields);
                }
            }
            Record::GroupCreate {
                key,
                group,
                last_delivered,
            } => {
                if let Some(stream) = self.stream_entry(key) {
                    stream
                        .groups
                        .entry(group)
                        .or_insert_with(|| Group::starting_at(last_delivered));
                }
            }
            Record::GroupDestroy { key, group } => {
                if let Some(Slot {
                    value: Value::Stream(stream),
                    ..
                }) = self.keys.get_mut(&key)
                {
                    stream.groups.remove(&group);
                }
            }
            Record::Deliver {
                key,
                group,
                consumer,
                ids,
                at,
            } => {
                if let Some(Slot {
                    value: Value::Stream(stream),
                    ..
                }) = self.keys.get_mut(&key)
                {
                    if let Some(group) = stream.groups.get_mut(&group) {
                        for id in ids {
                            group.record_delivery(id, &consumer, at);
                        }
                    }
                }
            }
            Record::Ack { key, group, ids } => {
                if let Some(Slot {
                    value: Value::Stream(stream),
                    ..
                }) = self.keys.get_mut(&key)
                {
                    if let Some(group) = stream.groups.get_mut(&group) {
                        group.ack(&ids);
                    }
                }
            }
            Record::SetMembers { key, members } => {
                self.keys
                    .insert(key, Slot::new(Value::Set(members.into_iter().collect())));
            }
            Record::Pending {
                key,
                group,
                id,
                consumer,
                count,
                delivered_at,
            } => {
                if let Some(Slot {
                    value: Value::Stream(stream),
                    ..
                }) = self.keys.get_mut(&key)
                {
                    if let Some(group) = stream.groups.get_mut(&group) {
                        group.pending.insert(
                            id,
                            Delivery {
                                consumer,
                                count,
                                delivered_at,
                            },
                        );
                    }
                }
            }
        }
    }

    /// The shortest command list that rebuilds the live keyspace. Expired
    /// keys are left out.
    fn snapshot(&self, now: u64) -> Vec<Record> {
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .filter(|(_, slot)| !slot.expired(now))
            .collect();
        keys.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        let mut records = Vec::new();
        for (key, slot) in keys {
            match &slot.value {
                Value::Str(value) => records.push(Record::Set {
                    key: key.clone(),
                    value: value.clone(),
                    expires_at: slot.expires_at,
                }),
                Value::Set(members) => {
                    let mut members: Vec<_> = members.iter().cloned().collect();
                    members.sort_unstable();
                    records.push(Record::SetMembers {
                        key: key.clone(),
                        members,
                    });
                }
                Value::Stream(stream) => stream_snapshot(key, stream, &mut records),
            }
        }
        records
    }

    fn deliver(
        &mut self,
        key: &str,
        group: &str,
        consumer: &str,
        ids: Vec<StreamId>,
        now: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(Record::Deliver {
            key: key.to_owned(),
            group: group.to_owned(),
            consumer: consumer.to_owned(),
            ids: ids.clone(),
            at: now,
        })?;
        let (stream, found) = self.group(key, group, now)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| stream.view(found, id))
            .collect())
    }

    fn read_group(
        &mut self,
        key: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        now: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let ids = {
            let (stream, found) = self.group(key, group, now)?;
            match cursor {
                ReadCursor::New => stream.undelivered(found, count),
                ReadCursor::Pending { after } => found.pending_of(consumer, after, count),
            }
        };
        self.deliver(key, group, consumer, ids, now)
    }
}

impl<T> KeyValueStore for MemoryStore<T>
where
    T: TimeSource + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state, now| Ok(state.string(key, now)?.cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_state(|state, _| {
            state.commit(Record::Set {
                key: key.to_owned(),
                value: value.to_owned(),
                expires_at: None,
            })
        })
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            if state.slot(key, now).is_none() {
                return Ok(false);
            }
            state.commit(Record::Del {
                key: key.to_owned(),
            })?;
            Ok(true)
        })
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.with_state(|state, now| {
            let current = state.integer(key, now)?.unwrap_or(0);
            let next = current
                .checked_add(1)
                .ok_or_else(|| StoreError::NotAnInteger {
                    key: key.to_owned(),
                })?;
            state.commit(Record::IncrBy {
                key: key.to_owned(),
                by: 1,
            })?;
            Ok(next)
        })
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            if state.slot(key, now).is_some() {
                return Ok(false);
            }
            state.commit(Record::Set {
                key: key.to_owned(),
                value: value.to_owned(),
                expires_at: Some(now + ttl.as_millis() as u64),
            })?;
            Ok(true)
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            match state.slot(key, now) {
                Some(Slot {
                    value: Value::Str(current),
                    ..
                }) if current == expected => {}
                _ => return Ok(false),
            }
            state.commit(Record::Del {
                key: key.to_owned(),
            })?;
            Ok(true)
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            Ok(state
                .set_members(key, now)?
                .is_some_and(|members| members.contains(member)))
        })
    }
}

impl<T> AdmissionScript for MemoryStore<T>
where
    T: TimeSource + Send + Sync,
{
    async fn eval_admission(
        &self,
        stock_key: &str,
        marker_key: &str,
        member: &str,
    ) -> Result<AdmissionVerdict, StoreError> {
        self.with_state(|state, now| {
            if state
                .set_members(marker_key, now)?
                .is_some_and(|members| members.contains(member))
            {
                return Ok(AdmissionVerdict::Duplicate);
            }

            let stock = state
                .integer(stock_key, now)?
                .ok_or_else(|| StoreError::MissingKey {
                    key: stock_key.to_owned(),
                })?;
            if stock <= 0 {
                return Ok(AdmissionVerdict::OutOfStock);
            }

            state.commit(Record::Admit {
                stock_key: stock_key.to_owned(),
                marker_key: marker_key.to_owned(),
                member: member.to_owned(),
            })?;
            Ok(AdmissionVerdict::Admitted)
        })
    }
}

impl<T> StreamStore for MemoryStore<T>
where
    T: TimeSource + Send + Sync,
{
    async fn xadd(&self, key: &str, fields: Fields) -> Result<StreamId, StoreError> {
        let id = self.with_state(|state, now| {
            let id = match state.stream(key, now)? {
                Some(stream) => stream.next_id(now),
                None => Stream::default().next_id(now),
            };
            state.commit(Record::XAdd {
                key: key.to_owned(),
                id,
                fields,
            })?;
            Ok::<_, StoreError>(id)
        })?;
        self.inner.appended.notify_waiters();
        Ok(id)
    }

    async fn xgroup_create(
        &self,
        key: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            let last_delivered = match state.stream(key, now)? {
                Some(stream) if stream.groups.contains_key(group) => return Ok(false),
                Some(stream) => match start {
                    GroupStart::Head => StreamId::ZERO,
                    GroupStart::Tail => stream.last_id,
                },
                None if mkstream => StreamId::ZERO,
                None => return Err(no_group(key, group)),
            };
            state.commit(Record::GroupCreate {
                key: key.to_owned(),
                group: group.to_owned(),
                last_delivered,
            })?;
            Ok(true)
        })
    }

    async fn xgroup_destroy(&self, key: &str, group: &str) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            let exists = state
                .stream(key, now)?
                .is_some_and(|stream| stream.groups.contains_key(group));
            if exists {
                state.commit(Record::GroupDestroy {
                    key: key.to_owned(),
                    group: group.to_owned(),
                })?;
            }
            Ok(exists)
        })
    }

    async fn xreadgroup(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = block.map(|block| tokio::time::Instant::now() + block);
        loop {
            // Register interest before looking, so an append racing with the
            // read below still wakes us.
            let mut appended = core::pin::pin!(self.inner.appended.notified());
            appended.as_mut().enable();

            let entries = self.with_state(|state, now| {
                state.read_group(key, group, consumer, cursor, count, now)
            })?;

            let deadline = match (cursor, deadline) {
                (ReadCursor::New, Some(deadline)) if entries.is_empty() => deadline,
                _ => return Ok(entries),
            };
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn xack(&self, key: &str, group: &str, ids: &[StreamId]) -> Result<usize, StoreError> {
        self.with_state(|state, now| {
            let acked = {
                let (_, found) = state.group(key, group, now)?;
                ids.iter().filter(|id| found.pending.contains_key(*id)).count()
            };
            if acked > 0 {
                state.commit(Record::Ack {
                    key: key.to_owned(),
                    group: group.to_owned(),
                    ids: ids.to_vec(),
                })?;
            }
            Ok(acked)
        })
    }

    async fn xpending(
        &self,
        key: &str,
        group: &str,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        self.with_state(|state, now| {
            let (_, found) = state.group(key, group, now)?;
            Ok(found
                .pending
                .iter()
                .filter(|(_, d)| consumer.is_none_or(|c| d.consumer == c))
                .map(|(id, d)| PendingEntry {
                    id: *id,
                    consumer: d.consumer.clone(),
                    delivery_count: d.count,
                    idle: Duration::from_millis(now.saturating_sub(d.delivered_at)),
                })
                .collect())
        })
    }

    async fn xclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let min_idle = min_idle.as_millis() as u64;
        self.with_state(|state, now| {
            let claimable = {
                let (_, found) = state.group(key, group, now)?;
                ids.iter()
                    .copied()
                    .filter(|id| {
                        found
                            .pending
                            .get(id)
                            .is_some_and(|d| now.saturating_sub(d.delivered_at) >= min_idle)
                    })
                    .collect()
            };
            state.deliver(key, group, consumer, claimable, now)
        })
    }

    async fn xlen(&self, key: &str) -> Result<usize, StoreError> {
        self.with_state(|state, now| Ok(state.stream(key, now)?.map_or(0, |s| s.entries.len())))
    }
}
