use crate::Disposition;
use portable_atomic::{AtomicU64, Ordering};

/// Running totals of a worker, readable while it runs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    persisted: AtomicU64,
    already_persisted: AtomicU64,
    contended: AtomicU64,
    reconciled: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time copy of [`WorkerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub persisted: u64,
    pub already_persisted: u64,
    pub contended: u64,
    pub reconciled: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub(crate) fn record(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Persisted => &self.persisted,
            Disposition::AlreadyPersisted => &self.already_persisted,
            Disposition::LockContended => &self.contended,
            Disposition::Reconciled(_) => &self.reconciled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            already_persisted: self.already_persisted.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
