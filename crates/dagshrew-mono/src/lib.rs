//! # dagshrew-mono: Block-DAG Indexer Binary
//!
//! Wires the `dagshrew-sync` pipeline to a node and a store and drives it in
//! one of two modes:
//!
//! - **Poll** (default): follows the node's tip, resuming after the highest
//!   block already in the store.
//! - **Backfill**: indexes an explicit `[--backfill-from, --backfill-to]`
//!   range over a worker pool, then exits.
//!
//! [`run`] is generic over the node and store traits so tests drive it with
//! the mock node and the in-memory store. [`run_prod`] builds the HTTP node
//! client and a RocksDB (or in-memory) store from [`Args`].

#[cfg(test)]
mod tests;

use anyhow::{anyhow, Result};
use clap::Parser;
use dagshrew_rocksdb::RocksDBStore;
use dagshrew_sync::{
    index_block_range, run_poll_loop, BackfillReport, BlockPipeline, DagNode, DagRpcAdapter,
    InMemoryStore, IndexProgress, IndexerStore, PipelineConfig, PollCursor, ReqwestTransport,
    RetryPolicy, RpcClient, SyncConfig,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Command-line arguments for `dagshrew-mono`.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, env = "DAGSHREW_RPC_URL", default_value = "http://localhost:8545")]
    pub rpc_url: String,
    /// `user:password` for HTTP basic auth
    #[arg(long, env = "DAGSHREW_RPC_AUTH")]
    pub auth: Option<String>,
    #[arg(long, env = "DAGSHREW_DB_PATH", default_value = "./dagshrew-db")]
    pub db_path: PathBuf,
    /// Keep everything in memory instead of opening RocksDB
    #[arg(long)]
    pub in_memory: bool,
    #[arg(long, default_value_t = 0)]
    pub start_block: u64,
    #[arg(long)]
    pub exit_at: Option<u64>,
    #[arg(long, env = "INDEXER_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: u64,
    #[arg(long, env = "INDEXER_POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
    #[arg(long, requires = "backfill_to")]
    pub backfill_from: Option<u64>,
    #[arg(long, requires = "backfill_from")]
    pub backfill_to: Option<u64>,
    /// Worker pool size for backfills
    #[arg(long, env = "INDEXER_WORKERS", default_value_t = 10)]
    pub workers: usize,
    #[arg(long)]
    pub skip_dag: bool,
    #[arg(long)]
    pub skip_receipts: bool,
    #[arg(long)]
    pub track_addresses: bool,
    /// Refresh balances of touched addresses; implies `--track-addresses`
    #[arg(long)]
    pub track_balances: bool,
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                base_delay: Duration::from_millis(self.retry_delay_ms),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            backfill_workers: self.workers,
            start_block: self.start_block,
            exit_at: self.exit_at,
            pipeline: PipelineConfig {
                index_dag: !self.skip_dag,
                index_receipts: !self.skip_receipts,
                index_addresses: self.track_addresses || self.track_balances,
                track_balances: self.track_balances,
            },
        }
    }

    pub fn backfill_range(&self) -> Option<(u64, u64)> {
        match (self.backfill_from, self.backfill_to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }
}

/// What a [`run`] ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Backfilled(BackfillReport),
    Polled(PollCursor),
}

/// First Ctrl-C cancels `cancel` for a graceful stop; a second one exits.
pub fn setup_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            match signal::ctrl_c().await {
                Ok(()) if cancel.is_cancelled() => {
                    error!("Force exit requested, terminating");
                    std::process::exit(1);
                }
                Ok(()) => {
                    info!("Shutdown signal received, stopping after in-flight work (Ctrl-C again to force exit)");
                    cancel.cancel();
                }
                Err(e) => {
                    error!("Error setting up signal handler: {}", e);
                    break;
                }
            }
        }
    });
}

/// Poll cursor continuing after the highest height the pipeline completed.
pub async fn resume_cursor<S>(store: &S) -> Result<PollCursor>
where
    S: IndexProgress + ?Sized,
{
    Ok(match store.get_indexed_height().await? {
        Some(height) => {
            info!("Resuming after indexed height {}", height);
            PollCursor::at(height)
        }
        None => PollCursor::new(),
    })
}

/// Main run function, generic over the node and store.
pub async fn run<N, S>(
    args: &Args,
    node: Arc<N>,
    store: Arc<S>,
    cancel: CancellationToken,
) -> Result<RunOutcome>
where
    N: DagNode + 'static,
    S: IndexerStore + 'static,
{
    let config = args.sync_config();
    info!("Pipeline stages: {:?}", config.pipeline);
    let pipeline = Arc::new(BlockPipeline::new(node.clone(), store.clone(), config.pipeline));

    if let Some((from, to)) = args.backfill_range() {
        let report =
            index_block_range(pipeline, from, to, config.backfill_workers, cancel).await?;
        return Ok(RunOutcome::Backfilled(report));
    }

    let cursor = resume_cursor(store.as_ref()).await?;
    let cursor = run_poll_loop(node, pipeline, cursor, config, cancel).await?;
    Ok(RunOutcome::Polled(cursor))
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Backfilled(report) => info!(
            "Backfill complete: {} of {} blocks in [{}, {}]",
            report.indexed, report.total, report.from, report.to
        ),
        RunOutcome::Polled(cursor) => {
            info!("Indexer stopped at block {:?}", cursor.last_indexed)
        }
    }
}

/// Production-specific run function.
pub async fn run_prod(args: Args) -> Result<()> {
    let cancel = CancellationToken::new();
    setup_signal_handler(cancel.clone());

    let config = args.sync_config();
    let transport = ReqwestTransport::new(args.rpc_url.clone(), args.auth.clone(), config.request_timeout)?;
    let node = Arc::new(DagRpcAdapter::new(RpcClient::new(
        transport,
        config.retry,
        cancel.clone(),
    )));

    if !node.is_connected().await {
        return Err(anyhow!("Node at {} is not reachable", args.rpc_url));
    }
    info!("Connected to node at {}", args.rpc_url);

    if args.in_memory {
        warn!("Running with an in-memory store; nothing will be persisted");
        let store = Arc::new(InMemoryStore::new());
        let outcome = run(&args, node, store.clone(), cancel).await?;
        log_outcome(&outcome);
        info!("Store contents: {:?}", store.stats()?);
        return Ok(());
    }

    info!("Opening RocksDB at {}", args.db_path.display());
    let store = Arc::new(RocksDBStore::open(&args.db_path)?);
    let result = run(&args, node, store.clone(), cancel).await;
    if let Err(e) = store.flush() {
        error!("Failed to flush RocksDB: {}", e);
    }
    store.log_stats();
    log_outcome(&result?);
    Ok(())
}
