//! Historical range backfill over a bounded worker pool.
//!
//! A producer task feeds heights into a shared queue; `workers` tasks drain
//! it and report `(height, error)` pairs over an aggregation channel. Every
//! worker is joined before the call returns, and one failing height never
//! stops the others. There is no ordering between workers.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::traits::HeightIndexer;
use crate::{SyncError, SyncResult};

/// Upper bound on queued heights not yet picked up by a worker.
const MAX_QUEUED_HEIGHTS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub from: u64,
    pub to: u64,
    pub total: u64,
    pub indexed: u64,
}

/// Indexes every height in `[from, to]`.
///
/// Fails with [`SyncError::Backfill`] after all heights were attempted if
/// any of them failed, or with [`SyncError::Cancelled`] if `cancel` fired.
pub async fn index_block_range<I>(
    indexer: Arc<I>,
    from: u64,
    to: u64,
    workers: usize,
    cancel: CancellationToken,
) -> SyncResult<BackfillReport>
where
    I: HeightIndexer + 'static,
{
    if from > to {
        return Err(SyncError::Config(format!(
            "Invalid backfill range [{}, {}]",
            from, to
        )));
    }
    let total = (to - from).checked_add(1).ok_or_else(|| {
        SyncError::Config(format!("Backfill range [{}, {}] is too large", from, to))
    })?;
    let range_len = usize::try_from(total).unwrap_or(usize::MAX);
    let workers = workers.max(1).min(range_len);
    info!(
        "Backfilling blocks {} to {} with {} workers",
        from, to, workers
    );

    let (height_tx, height_rx) = mpsc::channel::<u64>(range_len.min(MAX_QUEUED_HEIGHTS));
    let height_rx = Arc::new(Mutex::new(height_rx));
    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<(u64, SyncError)>();
    let indexed = Arc::new(AtomicU64::new(0));

    let producer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for height in from..=to {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = height_tx.send(height) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let indexer = indexer.clone();
        let height_rx = height_rx.clone();
        let error_tx = error_tx.clone();
        let cancel = cancel.clone();
        let indexed = indexed.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let next = {
                    let mut queue = height_rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        height = queue.recv() => height,
                    }
                };
                let Some(height) = next else {
                    break;
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(SyncError::Cancelled),
                    result = indexer.index_height(height) => result,
                };
                match result {
                    Ok(()) => {
                        indexed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => {
                        warn!("Failed to index block {}: {}", height, e);
                        let _ = error_tx.send((height, e));
                    }
                }
            }
            debug!("Backfill worker {} finished", worker);
        }));
    }
    drop(error_tx);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Backfill worker panicked: {}", e);
        }
    }
    if let Err(e) = producer.await {
        error!("Backfill producer panicked: {}", e);
    }

    let mut failures = Vec::new();
    while let Some((height, e)) = error_rx.recv().await {
        failures.push((height, e.to_string()));
    }
    failures.sort_by_key(|(height, _)| *height);

    if cancel.is_cancelled() {
        info!("Backfill of [{}, {}] cancelled", from, to);
        return Err(SyncError::Cancelled);
    }

    let indexed = indexed.load(Ordering::Relaxed);
    if !failures.is_empty() {
        let sample = format!("block {}: {}", failures[0].0, failures[0].1);
        error!(
            "Backfill of [{}, {}] finished with {} of {} blocks failed",
            from,
            to,
            failures.len(),
            total
        );
        return Err(SyncError::Backfill {
            total,
            failed: failures.len(),
            sample,
            failures,
        });
    }

    info!("Backfilled {} blocks ({} to {})", indexed, from, to);
    Ok(BackfillReport {
        from,
        to,
        total,
        indexed,
    })
}
