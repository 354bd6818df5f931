//! Test doubles shared by the module test suites.

use crate::{
    AdmissionScript, AdmissionVerdict, Fields, GroupStart, KeyValueStore, ManualClock,
    MemoryStore, PendingEntry, ReadCursor, StoreError, StreamEntry, StreamId, StreamStore,
};
use core::time::Duration;
use portable_atomic::{AtomicBool, Ordering};
use std::{io, sync::Arc};

/// A [`MemoryStore`] whose stream appends and group reads can be made to fail.
#[derive(Clone)]
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryStore<ManualClock>,
    fail_appends: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

fn refused() -> StoreError {
    io::Error::from(io::ErrorKind::ConnectionRefused).into()
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryStore<ManualClock>) -> Self {
        Self {
            inner,
            fail_appends: Arc::default(),
            fail_reads: Arc::default(),
        }
    }

    pub(crate) fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Release);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }
}

impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.del(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.incr(key).await
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.set_nx_px(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.sismember(key, member).await
    }
}

impl AdmissionScript for FlakyStore {
    async fn eval_admission(
        &self,
        stock_key: &str,
        marker_key: &str,
        member: &str,
    ) -> Result<AdmissionVerdict, StoreError> {
        self.inner
            .eval_admission(stock_key, marker_key, member)
            .await
    }
}

impl StreamStore for FlakyStore {
    async fn xadd(&self, key: &str, fields: Fields) -> Result<StreamId, StoreError> {
        if self.fail_appends.load(Ordering::Acquire) {
            return Err(refused());
        }
        self.inner.xadd(key, fields).await
    }

    async fn xgroup_create(
        &self,
        key: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<bool, StoreError> {
        self.inner.xgroup_create(key, group, start, mkstream).await
    }

    async fn xgroup_destroy(&self, key: &str, group: &str) -> Result<bool, StoreError> {
        self.inner.xgroup_destroy(key, group).await
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
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(refused());
        }
        self.inner
            .xreadgroup(key, group, consumer, cursor, count, block)
            .await
    }

    async fn xack(&self, key: &str, group: &str, ids: &[StreamId]) -> Result<usize, StoreError> {
        self.inner.xack(key, group, ids).await
    }

    async fn xpending(
        &self,
        key: &str,
        group: &str,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        self.inner.xpending(key, group, consumer).await
    }

    async fn xclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        self.inner.xclaim(key, group, consumer, min_idle, ids).await
    }

    async fn xlen(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.xlen(key).await
    }
}
