use crate::{
    Admission, AdmissionGate, AdmissionOutcome, ClaimQueue, Error, KeyValueStore, ManualClock,
    MemoryCatalog, MemoryStore, OrderIdParts, Promotion, QueueConfig, StoreError,
    StoreIdGenerator, StreamStore, testing::FlakyStore,
};
use core::time::Duration;
use std::sync::Arc;

const OPENS_AT: u64 = 1_741_944_413_000;

const PROMO: Promotion = Promotion {
    id: 10,
    stock: 3,
    begin_ms: OPENS_AT,
    end_ms: OPENS_AT + 60_000,
};

type Store = MemoryStore<ManualClock>;
type Gate<S = Store> = AdmissionGate<S, MemoryCatalog, StoreIdGenerator<S, ManualClock>, ManualClock>;

fn gate_on<S: crate::SharedStore>(store: S, clock: &ManualClock) -> Gate<S> {
    let catalog = MemoryCatalog::new();
    catalog.insert(&PROMO);
    AdmissionGate::with_clock(
        store.clone(),
        catalog,
        StoreIdGenerator::with_clock(store, clock.clone()),
        QueueConfig::default(),
        clock.clone(),
    )
}

async fn prepared(stock: u64) -> (Gate, Store, ManualClock) {
    let clock = ManualClock::new(OPENS_AT);
    let store = MemoryStore::with_clock(clock.clone());
    let gate = gate_on(store.clone(), &clock);
    gate.prepare(&Promotion { stock, ..PROMO }).await.unwrap();
    (gate, store, clock)
}

async fn queued_claimants(queue: &ClaimQueue<impl StreamStore>) -> Vec<u64> {
    let mut claimants: Vec<_> = queue
        .read_new("inspector", 1_000, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.claim().unwrap().claimant)
        .collect();
    claimants.sort_unstable();
    claimants
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn three_units_go_to_exactly_three_of_ten_claimants() {
    let (gate, store, _) = prepared(3).await;
    let gate = Arc::new(gate);

    let handles: Vec<_> = (1..=10)
        .map(|claimant| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { (claimant, gate.admit(PROMO.id, claimant).await.unwrap()) })
        })
        .collect();

    let mut winners = Vec::new();
    let mut out_of_stock = 0;
    for handle in handles {
        let (claimant, admission) = handle.await.unwrap();
        match admission.outcome {
            AdmissionOutcome::Ok => {
                assert_ne!(admission.order_id, 0);
                winners.push(claimant);
            }
            AdmissionOutcome::OutOfStock => {
                assert_eq!(admission.order_id, 0);
                out_of_stock += 1;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    winners.sort_unstable();

    assert_eq!(winners.len(), 3);
    assert_eq!(out_of_stock, 7);
    assert_eq!(
        store.get("seckill:stock:10").await.unwrap().as_deref(),
        Some("0")
    );
    assert_eq!(queued_claimants(gate.queue()).await, winners);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_claimants_never_push_stock_below_zero() {
    let (gate, store, _) = prepared(50).await;
    let gate = Arc::new(gate);

    let handles: Vec<_> = (0..300)
        .map(|claimant| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.admit(PROMO.id, claimant).await.unwrap() })
        })
        .collect();
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().outcome.is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 50);
    assert_eq!(
        store.get("seckill:stock:10").await.unwrap().as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn second_attempt_by_the_same_claimant_is_a_duplicate() {
    let (gate, _, _) = prepared(100).await;

    let first = gate.admit(PROMO.id, 7).await.unwrap();
    assert_eq!(first.outcome, AdmissionOutcome::Ok);
    let second = gate.admit(PROMO.id, 7).await.unwrap();
    assert_eq!(
        second,
        Admission {
            order_id: 0,
            outcome: AdmissionOutcome::Duplicate
        }
    );
    assert_eq!(queued_claimants(gate.queue()).await, vec![7]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_attempts_by_one_claimant_admit_once() {
    let (gate, _, _) = prepared(100).await;
    let gate = Arc::new(gate);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.admit(PROMO.id, 7).await.unwrap().outcome })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, AdmissionOutcome::Ok | AdmissionOutcome::Duplicate))
    );
}

#[tokio::test]
async fn window_is_checked_before_touching_stock() {
    let (gate, store, clock) = prepared(5).await;

    clock.set_millis(PROMO.begin_ms - 1);
    let early = gate.admit(PROMO.id, 1).await.unwrap();
    assert_eq!(early.outcome, AdmissionOutcome::NotStarted);
    assert_eq!(early.order_id, 0);

    clock.set_millis(PROMO.end_ms + 1);
    let late = gate.admit(PROMO.id, 1).await.unwrap();
    assert_eq!(late.outcome, AdmissionOutcome::Ended);

    assert_eq!(
        store.get("seckill:stock:10").await.unwrap().as_deref(),
        Some("5")
    );
    assert!(!gate.is_admitted(PROMO.id, 1).await.unwrap());
}

#[tokio::test]
async fn admitted_order_id_matches_the_queued_claim() {
    let (gate, _, clock) = prepared(5).await;
    clock.advance(Duration::from_secs(2));

    let admission = gate.admit(PROMO.id, 9).await.unwrap();
    let entry = gate
        .queue()
        .read_new("inspector", 1, None)
        .await
        .unwrap()
        .remove(0);
    let claim = entry.claim().unwrap();

    assert_eq!(claim.order_id, admission.order_id);
    assert_eq!(claim.promotion, PROMO.id);
    assert_eq!(claim.claimant, 9);
    assert_eq!(claim.submitted_at, OPENS_AT + 2_000);
    assert_eq!(
        OrderIdParts::from_id(admission.order_id).timestamp,
        (OPENS_AT + 2_000) / 1_000 - 1_704_067_200
    );
}

#[tokio::test]
async fn unknown_promotion_is_an_error() {
    let (gate, _, _) = prepared(5).await;
    let err = gate.admit(999, 1).await.unwrap_err();
    assert!(matches!(err, Error::PromotionNotFound(999)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unprepared_promotion_surfaces_the_missing_counter() {
    let clock = ManualClock::new(OPENS_AT);
    let gate = gate_on(MemoryStore::with_clock(clock.clone()), &clock);
    let err = gate.admit(PROMO.id, 1).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::MissingKey { .. })));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn failed_enqueue_leaves_the_claimant_admitted() {
    let clock = ManualClock::new(OPENS_AT);
    let store = FlakyStore::new(MemoryStore::with_clock(clock.clone()));
    let gate = gate_on(store.clone(), &clock);
    gate.prepare(&PROMO).await.unwrap();

    store.fail_appends(true);
    let err = gate.admit(PROMO.id, 5).await.unwrap_err();
    assert!(err.is_retryable());

    // The outcome was unknown to the caller; the marker tells the truth.
    assert!(gate.is_admitted(PROMO.id, 5).await.unwrap());

    store.fail_appends(false);
    let retry = gate.admit(PROMO.id, 5).await.unwrap();
    assert_eq!(retry.outcome, AdmissionOutcome::Duplicate);
    assert_eq!(store.inner.xlen("stream.orders").await.unwrap(), 0);
}

#[tokio::test]
async fn prepare_resets_stock_but_keeps_markers() {
    let (gate, store, _) = prepared(1).await;
    gate.admit(PROMO.id, 1).await.unwrap();

    gate.prepare(&Promotion { stock: 4, ..PROMO }).await.unwrap();
    assert_eq!(
        store.get("seckill:stock:10").await.unwrap().as_deref(),
        Some("4")
    );
    assert_eq!(
        gate.admit(PROMO.id, 1).await.unwrap().outcome,
        AdmissionOutcome::Duplicate
    );
}
