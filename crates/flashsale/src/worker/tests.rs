use crate::{
    AdmissionGate, Claim, ClaimQueue, Disposition, DistributedLock, Error, Fulfillment,
    FulfillmentWorker, HolderToken, ManualClock, MemoryCatalog, MemoryRepository, MemoryStore,
    Order, OrderRepository, Promotion, QueueConfig, ReconcileReason, RepositoryError, SharedStore,
    StatsSnapshot, StoreIdGenerator, StreamStore, WorkerConfig, WorkerStats,
    claimant_lock_key, testing::FlakyStore,
};
use core::time::Duration;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const PROMO: Promotion = Promotion {
    id: 10,
    stock: 3,
    begin_ms: 0,
    end_ms: u64::MAX,
};

fn config() -> WorkerConfig {
    WorkerConfig {
        block: Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

fn claim(order_id: i64, claimant: u64) -> Claim {
    Claim {
        order_id,
        promotion: PROMO.id,
        claimant,
        submitted_at: 1_000,
    }
}

fn order_of(claim: Claim) -> Order {
    Order {
        id: claim.order_id,
        promotion: claim.promotion,
        claimant: claim.claimant,
        submitted_at: claim.submitted_at,
    }
}

fn repository(durable_stock: u64) -> MemoryRepository {
    let repo = MemoryRepository::new();
    repo.seed_stock(PROMO.id, durable_stock);
    repo
}

/// Queue with its group created and `claims` enqueued.
async fn queue_with<S: SharedStore>(store: &S, claims: &[Claim]) -> ClaimQueue<S> {
    let queue = ClaimQueue::new(store.clone(), QueueConfig::default());
    queue.ensure_group().await.unwrap();
    for claim in claims {
        queue.enqueue(claim).await.unwrap();
    }
    queue
}

async fn wait_for(stats: &WorkerStats, done: impl Fn(StatsSnapshot) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(stats.snapshot()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn delivered_claim_becomes_an_order() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let repo = repository(3);
    let worker = FulfillmentWorker::new(store.clone(), repo.clone(), config());

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    assert_eq!(worker.process(&entry).await.unwrap(), Disposition::Persisted);

    assert_eq!(repo.orders(), vec![order_of(claim(100, 1))]);
    assert_eq!(repo.stock(PROMO.id), Some(2));
    assert!(queue.pending(None).await.unwrap().is_empty());
    // The claimant lock was released.
    assert!(
        DistributedLock::new(store)
            .try_acquire(&claimant_lock_key(1), &HolderToken::from_raw("x"), config().lock_ttl, 0)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn admitted_claims_end_as_exactly_matching_orders() {
    let store = MemoryStore::new();
    let catalog = MemoryCatalog::new();
    catalog.insert(&PROMO);
    let gate = AdmissionGate::new(
        store.clone(),
        catalog,
        StoreIdGenerator::new(store.clone()),
        QueueConfig::default(),
    );
    gate.prepare(&PROMO).await.unwrap();
    let repo = repository(PROMO.stock);

    let mut admitted = Vec::new();
    for claimant in 1..=10 {
        let admission = gate.admit(PROMO.id, claimant).await.unwrap();
        if admission.outcome.is_ok() {
            admitted.push((admission.order_id, claimant));
        }
    }
    assert_eq!(admitted.len(), 3);

    let worker = Arc::new(FulfillmentWorker::new(store.clone(), repo.clone(), config()));
    let stats = worker.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    wait_for(&stats, |s| s.persisted == 3).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    let mut persisted: Vec<_> = repo.orders().iter().map(|o| (o.id, o.claimant)).collect();
    persisted.sort_unstable();
    admitted.sort_unstable();
    assert_eq!(persisted, admitted);
    assert_eq!(repo.stock(PROMO.id), Some(0));
    assert!(gate.queue().pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn crash_before_ack_is_recovered_from_the_journal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.journal");
    let repo = repository(3);

    {
        let store = MemoryStore::open(&path).unwrap();
        let queue = queue_with(&store, &[claim(100, 1)]).await;
        // Delivered to c1, then the process dies before acknowledging.
        let delivered = queue.read_new("c1", 1, None).await.unwrap();
        assert_eq!(delivered.len(), 1);
    }

    let store = MemoryStore::open(&path).unwrap();
    let worker = Arc::new(FulfillmentWorker::new(store.clone(), repo.clone(), config()));
    let stats = worker.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    wait_for(&stats, |s| s.persisted == 1).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(repo.orders(), vec![order_of(claim(100, 1))]);
    assert_eq!(repo.stock(PROMO.id), Some(2));
    let queue = ClaimQueue::new(store, QueueConfig::default());
    assert!(queue.pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivery_after_persist_does_not_write_twice() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let repo = repository(3);
    let worker = FulfillmentWorker::new(store.clone(), repo.clone(), config());

    // Crash between persist and ack: the order exists, the entry is pending.
    queue.read_new("c1", 1, None).await.unwrap();
    assert_eq!(
        repo.fulfill(&order_of(claim(100, 1))).await.unwrap(),
        Fulfillment::Persisted
    );

    assert_eq!(worker.drain_pending().await.unwrap(), 1);
    assert_eq!(worker.stats().snapshot().already_persisted, 1);
    assert_eq!(repo.orders().len(), 1);
    assert_eq!(repo.stock(PROMO.id), Some(2));
    assert!(queue.pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn contended_lock_leaves_the_entry_for_redelivery() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let repo = repository(3);
    let worker = FulfillmentWorker::new(store.clone(), repo.clone(), config());

    let other = DistributedLock::new(store.clone());
    let held = other
        .try_acquire(
            &claimant_lock_key(1),
            &HolderToken::from_raw("someone-else"),
            Duration::from_secs(10),
            0,
        )
        .await
        .unwrap()
        .unwrap();

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    assert_eq!(
        worker.process(&entry).await.unwrap(),
        Disposition::LockContended
    );
    assert!(repo.orders().is_empty());
    assert_eq!(queue.pending(Some("c1")).await.unwrap().len(), 1);

    assert!(other.release(held).await.unwrap());
    worker.drain_pending().await.unwrap();
    assert_eq!(repo.orders().len(), 1);
    assert_eq!(
        worker.stats().snapshot(),
        StatsSnapshot {
            persisted: 1,
            ..StatsSnapshot::default()
        }
    );
}

#[tokio::test]
async fn contended_claim_is_retried_while_new_claims_keep_arriving() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[]).await;
    let repo = repository(500);

    let other = DistributedLock::new(store.clone());
    let held = other
        .try_acquire(
            &claimant_lock_key(1),
            &HolderToken::from_raw("someone-else"),
            Duration::from_secs(10),
            0,
        )
        .await
        .unwrap()
        .unwrap();

    let worker = Arc::new(FulfillmentWorker::new(store.clone(), repo.clone(), config()));
    let stats = worker.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    queue.enqueue(&claim(100, 1)).await.unwrap();
    wait_for(&stats, |s| s.contended == 1).await;
    assert!(other.release(held).await.unwrap());

    // New entries arrive well inside every blocking read.
    let mut retried = false;
    for i in 0..200 {
        queue.enqueue(&claim(1_000 + i, 100 + i as u64)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        if repo.orders().iter().any(|order| order.claimant == 1) {
            retried = true;
            break;
        }
    }
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert!(retried);
}

#[tokio::test]
async fn durable_shortfall_is_dead_lettered_without_an_order() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let repo = repository(0);
    let worker = FulfillmentWorker::new(store.clone(), repo.clone(), config());

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    assert_eq!(
        worker.process(&entry).await.unwrap(),
        Disposition::Reconciled(ReconcileReason::DurableStockExhausted)
    );
    assert!(repo.orders().is_empty());
    assert!(queue.pending(None).await.unwrap().is_empty());
    assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
}

#[tokio::test]
async fn conflicting_order_is_dead_lettered() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let repo = repository(3);
    repo.insert(order_of(claim(55, 1))).unwrap();
    let worker = FulfillmentWorker::new(store.clone(), repo.clone(), config());

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    assert_eq!(
        worker.process(&entry).await.unwrap(),
        Disposition::Reconciled(ReconcileReason::ConflictingOrder { existing: 55 })
    );
    assert_eq!(repo.orders(), vec![order_of(claim(55, 1))]);
    assert_eq!(repo.stock(PROMO.id), Some(3));
    assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
}

#[tokio::test]
async fn undecodable_entry_is_dead_lettered() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[]).await;
    store
        .xadd("stream.orders", vec![("orderId".to_owned(), "oops".to_owned())])
        .await
        .unwrap();
    let worker = FulfillmentWorker::new(store.clone(), repository(3), config());

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    let disposition = worker.process(&entry).await.unwrap();
    assert!(matches!(
        disposition,
        Disposition::Reconciled(ReconcileReason::Undecodable(_))
    ));
    assert!(queue.pending(None).await.unwrap().is_empty());
    assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
}

struct DownRepository;

impl OrderRepository for DownRepository {
    async fn find_order(&self, _: u64, _: u64) -> Result<Option<Order>, RepositoryError> {
        Err(RepositoryError::Unavailable {
            reason: "connection reset".to_owned(),
        })
    }

    async fn fulfill(&self, _: &Order) -> Result<Fulfillment, RepositoryError> {
        Err(RepositoryError::Unavailable {
            reason: "connection reset".to_owned(),
        })
    }
}

#[tokio::test]
async fn repository_failure_keeps_the_entry_pending_and_frees_the_lock() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    let worker = FulfillmentWorker::new(store.clone(), DownRepository, config());

    let entry = queue.read_new("c1", 1, None).await.unwrap().remove(0);
    let err = worker.process(&entry).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Repository(RepositoryError::Unavailable { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(queue.pending(Some("c1")).await.unwrap().len(), 1);

    // A drain visits it once more and counts the failure.
    assert_eq!(worker.drain_pending().await.unwrap(), 1);
    assert_eq!(worker.stats().snapshot().failed, 1);
    assert_eq!(queue.pending(Some("c1")).await.unwrap().len(), 1);
    assert!(
        DistributedLock::new(store)
            .try_acquire(&claimant_lock_key(1), &HolderToken::from_raw("x"), config().lock_ttl, 0)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn lost_group_is_recreated_and_consumption_resumes() {
    let store = MemoryStore::new();
    let queue = queue_with(&store, &[]).await;
    let repo = repository(3);
    let worker = Arc::new(FulfillmentWorker::new(store.clone(), repo.clone(), config()));
    let stats = worker.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.xgroup_destroy("stream.orders", "g1").await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.pending(None).await.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    queue.enqueue(&claim(100, 1)).await.unwrap();
    wait_for(&stats, |s| s.persisted == 1).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert_eq!(repo.orders().len(), 1);
}

#[tokio::test]
async fn unreadable_queue_stops_the_worker() {
    let store = FlakyStore::new(MemoryStore::with_clock(ManualClock::new(0)));
    queue_with(&store, &[]).await;
    store.fail_reads(true);

    let worker = FulfillmentWorker::new(store, repository(3), config());
    let err = worker.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn cancellation_stops_an_idle_worker() {
    let store = MemoryStore::new();
    let worker = FulfillmentWorker::new(
        store,
        repository(3),
        WorkerConfig {
            block: Duration::from_secs(30),
            ..WorkerConfig::default()
        },
    );
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker.run(shutdown))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn startup_adopts_entries_abandoned_by_another_consumer() {
    let clock = ManualClock::new(0);
    let store = MemoryStore::with_clock(clock.clone());
    let queue = queue_with(&store, &[claim(100, 1)]).await;
    queue.read_new("c0", 1, None).await.unwrap();
    clock.advance(Duration::from_secs(120));

    let repo = repository(3);
    let worker = Arc::new(FulfillmentWorker::with_clock(
        store.clone(),
        repo.clone(),
        WorkerConfig {
            reclaim_idle: Some(Duration::from_secs(60)),
            ..config()
        },
        clock,
    ));
    let stats = worker.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    wait_for(&stats, |s| s.persisted == 1).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert!(queue.pending(None).await.unwrap().is_empty());
    assert_eq!(repo.orders().len(), 1);
}

