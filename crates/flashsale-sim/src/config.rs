use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use flashsale::{CacheConfig, PromotionId, QueueConfig, WorkerConfig};
use std::path::PathBuf;

/// Output format of the log layer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Runtime configuration for the `flashsale-sim` binary.
///
/// Every value can come from a CLI flag or an environment variable (a `.env`
/// file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flashsale-sim",
    version,
    about = "Fires concurrent claimants at a flash sale and fulfills the admitted claims"
)]
pub struct CliArgs {
    /// Promotion to run.
    ///
    /// Environment variable: `PROMOTION_ID`
    #[arg(long, env = "PROMOTION_ID", default_value_t = 1)]
    pub promotion_id: PromotionId,

    /// Units on sale, seeded into the fast-store stock counter.
    ///
    /// Environment variable: `STOCK`
    #[arg(long, env = "STOCK", default_value_t = 100)]
    pub stock: u64,

    /// Units in the durable order store. Defaults to `STOCK`; set it lower to
    /// drill the reconciliation path.
    ///
    /// Environment variable: `DURABLE_STOCK`
    #[arg(long, env = "DURABLE_STOCK")]
    pub durable_stock: Option<u64>,

    /// Number of distinct claimants, all admitted concurrently.
    ///
    /// Environment variable: `CLAIMANTS`
    #[arg(long, env = "CLAIMANTS", default_value_t = 1_000)]
    pub claimants: u64,

    /// Admission attempts per claimant. Values above 1 exercise the
    /// duplicate check.
    ///
    /// Environment variable: `ATTEMPTS`
    #[arg(long, env = "ATTEMPTS", default_value_t = 1)]
    pub attempts: u32,

    /// Length of the promotion window in seconds, opening at startup.
    ///
    /// Environment variable: `WINDOW_SECS`
    #[arg(long, env = "WINDOW_SECS", default_value_t = 60)]
    pub window_secs: u64,

    /// Journal file for a durable fast store. Without it the store lives in
    /// memory only.
    ///
    /// Environment variable: `JOURNAL`
    #[arg(long, env = "JOURNAL")]
    pub journal: Option<PathBuf>,

    /// Claim stream name.
    ///
    /// Environment variable: `STREAM`
    #[arg(long, env = "STREAM", default_value_t = String::from("stream.orders"))]
    pub stream: String,

    /// Consumer group name.
    ///
    /// Environment variable: `GROUP`
    #[arg(long, env = "GROUP", default_value_t = String::from("g1"))]
    pub group: String,

    /// Consumer name of the fulfillment worker.
    ///
    /// Environment variable: `CONSUMER`
    #[arg(long, env = "CONSUMER", default_value_t = String::from("c1"))]
    pub consumer: String,

    /// Longest blocking read before the worker re-scans its pending list.
    ///
    /// Environment variable: `BLOCK_MS`
    #[arg(long, env = "BLOCK_MS", default_value_t = 2_000)]
    pub block_ms: u64,

    /// Expiry of the per-claimant fulfillment lock.
    ///
    /// Environment variable: `LOCK_TTL_SECS`
    #[arg(long, env = "LOCK_TTL_SECS", default_value_t = 10)]
    pub lock_ttl_secs: u64,

    /// Entries the worker reads at once.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 16)]
    pub batch_size: usize,

    /// Freshness bound of the cached promotion metadata.
    ///
    /// Environment variable: `CATALOG_FRESHNESS_MS`
    #[arg(long, env = "CATALOG_FRESHNESS_MS", default_value_t = 1_000)]
    pub catalog_freshness_ms: u64,

    /// Give up waiting for fulfillment after this many seconds.
    ///
    /// Environment variable: `TIMEOUT_SECS`
    #[arg(long, env = "TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub promotion_id: PromotionId,
    pub stock: u64,
    pub durable_stock: u64,
    pub claimants: u64,
    pub attempts: u32,
    pub window: Duration,
    pub journal: Option<PathBuf>,
    pub catalog: CacheConfig,
    pub worker: WorkerConfig,
    pub timeout: Duration,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.claimants == 0 {
            bail!("CLAIMANTS must be greater than 0");
        }
        if args.attempts == 0 {
            bail!("ATTEMPTS must be greater than 0");
        }
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if args.window_secs == 0 {
            bail!("WINDOW_SECS must be greater than 0");
        }
        if args.stream.is_empty() || args.group.is_empty() || args.consumer.is_empty() {
            bail!("STREAM, GROUP and CONSUMER must not be empty");
        }
        if args.block_ms == 0 {
            bail!("BLOCK_MS must be greater than 0");
        }
        if args.lock_ttl_secs == 0 {
            bail!("LOCK_TTL_SECS must be greater than 0");
        }

        let durable_stock = args.durable_stock.unwrap_or(args.stock);
        if durable_stock > args.stock {
            bail!(
                "DURABLE_STOCK ({durable_stock}) must not exceed STOCK ({})",
                args.stock
            );
        }

        Ok(Self {
            promotion_id: args.promotion_id,
            stock: args.stock,
            durable_stock,
            claimants: args.claimants,
            attempts: args.attempts,
            window: Duration::from_secs(args.window_secs),
            journal: args.journal,
            catalog: CacheConfig {
                freshness: Duration::from_millis(args.catalog_freshness_ms),
            },
            worker: WorkerConfig {
                queue: QueueConfig {
                    stream: args.stream,
                    group: args.group,
                },
                consumer: args.consumer,
                block: Duration::from_millis(args.block_ms),
                lock_ttl: Duration::from_secs(args.lock_ttl_secs),
                batch_size: args.batch_size,
                ..WorkerConfig::default()
            },
            timeout: Duration::from_secs(args.timeout_secs),
            log_format: args.log_format,
        })
    }
}
