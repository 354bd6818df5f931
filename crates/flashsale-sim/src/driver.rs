use crate::config::SimConfig;
use core::time::Duration;
use flashsale::{
    AdmissionGate, AdmissionOutcome, CachedCatalog, ClaimantId, FulfillmentWorker,
    KeyValueStore, MemoryCatalog, MemoryRepository, MemoryStore, OrderId, Promotion, PromotionId,
    SharedStore, StatsSnapshot, StoreIdGenerator, SystemClock, TimeSource, stock_key,
};
use std::{collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;

const MAX_ADMISSION_TRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Admission outcomes counted over all claimant attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub ok: u64,
    pub not_started: u64,
    pub ended: u64,
    pub out_of_stock: u64,
    pub duplicate: u64,
    /// Attempts that failed and found the claimant already admitted.
    pub admitted_unknown: u64,
    pub errors: u64,
}

impl Tally {
    fn record(&mut self, outcome: AdmissionOutcome) {
        let counter = match outcome {
            AdmissionOutcome::Ok => &mut self.ok,
            AdmissionOutcome::NotStarted => &mut self.not_started,
            AdmissionOutcome::Ended => &mut self.ended,
            AdmissionOutcome::OutOfStock => &mut self.out_of_stock,
            AdmissionOutcome::Duplicate => &mut self.duplicate,
        };
        *counter += 1;
    }
}

#[derive(Debug)]
pub struct Report {
    pub tally: Tally,
    pub orders: usize,
    pub fast_stock_left: Option<String>,
    pub durable_stock_left: Option<u64>,
    pub dead_letters: usize,
    pub worker: StatsSnapshot,
}

enum Attempt {
    Decided(AdmissionOutcome, OrderId),
    AdmittedUnknown,
    Failed,
}

type Gate<S> = AdmissionGate<
    S,
    CachedCatalog<MemoryCatalog>,
    StoreIdGenerator<S, SystemClock>,
    SystemClock,
>;

/// Runs one promotion end to end: prepare, admit every claimant, fulfill
/// every admitted claim, then check the outcome.
pub async fn run(config: SimConfig, shutdown: CancellationToken) -> anyhow::Result<Report> {
    let store = match &config.journal {
        Some(path) => {
            let store = MemoryStore::open(path)?;
            // Replayed history from earlier runs collapses to current state.
            store.compact()?;
            store
        }
        None => MemoryStore::new(),
    };
    run_on(store, config, shutdown).await
}

async fn run_on<S: SharedStore>(
    store: S,
    config: SimConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<Report> {
    let now = SystemClock.current_millis();
    let promotion = Promotion {
        id: config.promotion_id,
        stock: config.stock,
        begin_ms: now,
        end_ms: now + config.window.as_millis() as u64,
    };

    let catalog = MemoryCatalog::new();
    catalog.insert(&promotion);
    let gate: Arc<Gate<S>> = Arc::new(AdmissionGate::new(
        store.clone(),
        CachedCatalog::new(catalog, config.catalog),
        StoreIdGenerator::new(store.clone()),
        config.worker.queue.clone(),
    ));
    gate.prepare(&promotion).await?;

    let repository = MemoryRepository::new();
    repository.seed_stock(promotion.id, config.durable_stock);

    let worker = Arc::new(FulfillmentWorker::new(
        store.clone(),
        repository.clone(),
        config.worker.clone(),
    ));
    let stats = worker.stats();
    let stop_worker = shutdown.child_token();
    let worker_task = tokio::spawn({
        let stop_worker = stop_worker.clone();
        async move { worker.run(stop_worker).await }
    });

    tracing::info!(
        promotion = promotion.id,
        stock = config.stock,
        durable_stock = config.durable_stock,
        claimants = config.claimants,
        attempts = config.attempts,
        "launching promotion"
    );

    let promotion_id = promotion.id;
    let attempts: Vec<_> = (1..=config.claimants)
        .flat_map(|claimant| (0..config.attempts).map(move |_| claimant))
        .map(|claimant| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { (claimant, attempt(&gate, promotion_id, claimant).await) })
        })
        .collect();

    let mut tally = Tally::default();
    let mut admitted = HashSet::new();
    for joined in futures::future::join_all(attempts).await {
        let (claimant, attempt) = joined?;
        match attempt {
            Attempt::Decided(outcome, order_id) => {
                tally.record(outcome);
                if outcome.is_ok() {
                    admitted.insert((order_id, claimant));
                }
            }
            Attempt::AdmittedUnknown => tally.admitted_unknown += 1,
            Attempt::Failed => tally.errors += 1,
        }
    }
    tracing::info!(?tally, "admission finished");

    let expected = tally.ok;
    let settled = |s: StatsSnapshot| s.persisted + s.already_persisted + s.reconciled;
    tokio::select! {
        () = shutdown.cancelled() => tracing::warn!("interrupted before fulfillment finished"),
        () = tokio::time::sleep(config.timeout) => {
            tracing::warn!(
                settled = settled(stats.snapshot()),
                expected,
                "timed out waiting for fulfillment"
            );
        }
        () = async {
            while settled(stats.snapshot()) < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        } => {}
    }
    stop_worker.cancel();
    worker_task.await??;

    let orders = repository.orders();
    let report = Report {
        tally,
        orders: orders.len(),
        fast_stock_left: store.get(&stock_key(promotion.id)).await?,
        durable_stock_left: repository.stock(promotion.id),
        dead_letters: gate.queue().dead_letter_len().await?,
        worker: stats.snapshot(),
    };

    if let Some(stray) = orders
        .iter()
        .find(|order| !admitted.contains(&(order.id, order.claimant)))
    {
        anyhow::bail!("order {} does not match any admission", stray.id);
    }
    if report.orders as u64 > config.stock {
        anyhow::bail!(
            "{} orders persisted for {} units of stock",
            report.orders,
            config.stock
        );
    }

    Ok(report)
}

async fn attempt<S: SharedStore>(
    gate: &Gate<S>,
    promotion: PromotionId,
    claimant: ClaimantId,
) -> Attempt {
    for tries in 1..=MAX_ADMISSION_TRIES {
        let err = match gate.admit(promotion, claimant).await {
            Ok(admission) => return Attempt::Decided(admission.outcome, admission.order_id),
            Err(err) => err,
        };
        tracing::warn!(claimant, tries, error = %err, "admission failed");
        if !err.is_retryable() || tries == MAX_ADMISSION_TRIES {
            break;
        }

        tokio::time::sleep(RETRY_BACKOFF * tries).await;
        // The failed call may have committed; never claim twice.
        match gate.is_admitted(promotion, claimant).await {
            Ok(true) => return Attempt::AdmittedUnknown,
            Ok(false) => {}
            Err(err) => tracing::warn!(claimant, error = %err, "marker lookup failed"),
        }
    }
    Attempt::Failed
}
