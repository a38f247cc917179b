//! # Tip-Following Poll Loop
//!
//! Live indexing runs one bounded batch of sequential [`HeightIndexer`] calls
//! per tick:
//!
//! 1. read the node's tip height
//! 2. index `batch_size` heights following the cursor, capped by the tip and
//!    by `exit_at`
//! 3. stop the batch at the first failing height
//!
//! Progress is carried in an explicit [`PollCursor`] that goes into and comes
//! out of every [`poll_once`]. A failed height is never skipped: the cursor
//! stays just before it, so the next tick retries it. A batch cut short by
//! cancellation still reports the heights it finished.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::traits::{HeightIndexer, TipReader};
use crate::types::SyncConfig;
use crate::{SyncError, SyncResult};

/// Last height indexed by the poll loop, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollCursor {
    pub last_indexed: Option<u64>,
}

impl PollCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(height: u64) -> Self {
        Self {
            last_indexed: Some(height),
        }
    }

    /// Next height to index. Never below `start_block`.
    pub fn next_height(&self, start_block: u64) -> u64 {
        match self.last_indexed {
            Some(height) => height.saturating_add(1).max(start_block),
            None => start_block,
        }
    }

    pub fn has_reached(&self, height: u64) -> bool {
        self.last_indexed.map_or(false, |last| last >= height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub cursor: PollCursor,
    pub tip: u64,
    pub indexed: u64,
    /// The height that stopped the batch, with its error.
    pub failed: Option<(u64, String)>,
    /// Cancellation stopped the batch early.
    pub cancelled: bool,
}

/// Runs one poll: reads the tip and indexes the next batch.
///
/// Fails with [`SyncError::Cancelled`] only if cancellation lands before the
/// tip is known; later it returns the partial outcome with `cancelled` set.
pub async fn poll_once<N, I>(
    node: &N,
    indexer: &I,
    cursor: PollCursor,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> SyncResult<PollOutcome>
where
    N: TipReader + ?Sized,
    I: HeightIndexer + ?Sized,
{
    let tip = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        tip = node.block_number() => tip?,
    };

    let mut outcome = PollOutcome {
        cursor,
        tip,
        indexed: 0,
        failed: None,
        cancelled: false,
    };
    let first = cursor.next_height(config.start_block);
    let last = match config.exit_at {
        Some(exit_at) => tip.min(exit_at),
        None => tip,
    };
    if first > last {
        debug!("Caught up at {:?} (tip {})", cursor.last_indexed, tip);
        return Ok(outcome);
    }
    let end = last.min(first.saturating_add(config.batch_size.max(1) - 1));

    for height in first..=end {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        match indexer.index_height(height).await {
            Ok(()) => {
                outcome.cursor.last_indexed = Some(height);
                outcome.indexed += 1;
            }
            Err(e) if e.is_cancelled() => {
                outcome.cancelled = true;
                break;
            }
            Err(e) => {
                warn!("Failed to index block {}, will retry: {}", height, e);
                outcome.failed = Some((height, e.to_string()));
                break;
            }
        }
    }
    Ok(outcome)
}

/// Polls every `config.poll_interval` until cancelled or until `exit_at` is
/// indexed. Returns the final cursor.
pub async fn run_poll_loop<N, I>(
    node: Arc<N>,
    indexer: Arc<I>,
    mut cursor: PollCursor,
    config: SyncConfig,
    cancel: CancellationToken,
) -> SyncResult<PollCursor>
where
    N: TipReader + ?Sized,
    I: HeightIndexer + ?Sized,
{
    info!(
        "Starting poll loop at height {} (batch size {}, interval {:?})",
        cursor.next_height(config.start_block),
        config.batch_size,
        config.poll_interval
    );
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match poll_once(node.as_ref(), indexer.as_ref(), cursor, &config, &cancel).await {
            Ok(outcome) => {
                cursor = outcome.cursor;
                if outcome.indexed > 0 {
                    info!(
                        "Indexed {} blocks, now at {:?} (tip {})",
                        outcome.indexed, cursor.last_indexed, outcome.tip
                    );
                }
                if outcome.cancelled {
                    break;
                }
                if let Some(exit_at) = config.exit_at {
                    if cursor.has_reached(exit_at) {
                        info!("Reached exit height {}", exit_at);
                        return Ok(cursor);
                    }
                }
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!("Poll failed: {}", e),
        }
    }

    info!("Poll loop stopped at {:?}", cursor.last_indexed);
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_indexer::BlockIndexer;
    use crate::memstore::InMemoryStore;
    use crate::mock::{BlockBuilder, MockNode};
    use std::time::Duration;

    type Indexer = BlockIndexer<MockNode, InMemoryStore, InMemoryStore>;

    fn setup(len: u64) -> (MockNode, Indexer, Arc<InMemoryStore>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let node = MockNode::with_blocks((0..len).map(|h| BlockBuilder::new(h).build()).collect());
        let store = Arc::new(InMemoryStore::new());
        let indexer = BlockIndexer::new(Arc::new(node.clone()), store.clone(), store.clone());
        (node, indexer, store)
    }

    fn config(batch_size: u64) -> SyncConfig {
        SyncConfig {
            batch_size,
            poll_interval: Duration::from_millis(10),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_failed_height_is_retried_not_skipped() {
        let (node, indexer, _) = setup(10);
        node.fail_block(3, 1);
        let cancel = CancellationToken::new();

        let first = poll_once(&node, &indexer, PollCursor::new(), &config(10), &cancel)
            .await
            .unwrap();
        assert_eq!(first.cursor, PollCursor::at(2));
        assert_eq!(first.indexed, 3);
        assert_eq!(first.failed.as_ref().map(|(h, _)| *h), Some(3));

        let second = poll_once(&node, &indexer, first.cursor, &config(10), &cancel)
            .await
            .unwrap();
        assert_eq!(second.cursor, PollCursor::at(9));
        assert_eq!(second.indexed, 7);
        assert!(second.failed.is_none());
    }

    #[tokio::test]
    async fn test_batch_is_bounded() {
        let (node, indexer, _) = setup(30);
        let cancel = CancellationToken::new();

        let outcome = poll_once(&node, &indexer, PollCursor::new(), &config(10), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.cursor, PollCursor::at(9));
        assert_eq!(outcome.tip, 29);

        let outcome = poll_once(&node, &indexer, outcome.cursor, &config(10), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.cursor, PollCursor::at(19));
    }

    #[tokio::test]
    async fn test_caught_up_poll_is_a_no_op() {
        let (node, indexer, _) = setup(5);
        let outcome = poll_once(&node, &indexer, PollCursor::at(4), &config(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.indexed, 0);
        assert_eq!(outcome.cursor, PollCursor::at(4));
    }

    #[tokio::test]
    async fn test_start_block_and_exit_at() {
        let (node, indexer, store) = setup(20);
        let config = SyncConfig {
            start_block: 5,
            exit_at: Some(7),
            ..config(10)
        };

        let outcome = poll_once(&node, &indexer, PollCursor::new(), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.indexed, 3);
        assert_eq!(outcome.cursor, PollCursor::at(7));
        assert_eq!(store.stats().unwrap().blocks, 3);
    }

    #[tokio::test]
    async fn test_loop_stops_at_exit_height() {
        let (node, indexer, _) = setup(25);
        let config = SyncConfig {
            exit_at: Some(24),
            ..config(10)
        };

        let cursor = tokio::time::timeout(
            Duration::from_secs(5),
            run_poll_loop(
                Arc::new(node),
                Arc::new(indexer),
                PollCursor::new(),
                config,
                CancellationToken::new(),
            ),
        )
        .await
        .expect("loop should exit")
        .unwrap();
        assert_eq!(cursor, PollCursor::at(24));
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let (node, indexer, _) = setup(3);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            Arc::new(node),
            Arc::new(indexer),
            PollCursor::new(),
            config(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let cursor = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap()
            .unwrap();
        assert_eq!(cursor, PollCursor::at(2));
    }

    #[tokio::test]
    async fn test_cancelled_batch_keeps_finished_heights() {
        let (node, indexer, store) = setup(20);
        node.set_latency(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            Arc::new(node),
            Arc::new(indexer),
            PollCursor::new(),
            config(20),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let cursor = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap()
            .unwrap();

        let stored = store.stats().unwrap().blocks as u64;
        assert!(stored > 0 && stored < 20);
        assert_eq!(cursor, PollCursor::at(stored - 1));
    }

    #[tokio::test]
    async fn test_poll_once_reports_a_cancelled_batch() {
        let (node, indexer, _) = setup(5);
        let cancel = CancellationToken::new();
        let indexer = CancelAfter {
            inner: indexer,
            after: 2,
            cancel: cancel.clone(),
        };

        let outcome = poll_once(&node, &indexer, PollCursor::new(), &config(10), &cancel)
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.indexed, 2);
        assert_eq!(outcome.cursor, PollCursor::at(1));
    }

    /// Cancels `cancel` once `after` heights were indexed.
    struct CancelAfter {
        inner: Indexer,
        after: u64,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl HeightIndexer for CancelAfter {
        async fn index_height(&self, height: u64) -> SyncResult<()> {
            self.inner.index_height(height).await?;
            if height + 1 >= self.after {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    #[test]
    fn test_cursor_arithmetic() {
        assert_eq!(PollCursor::new().next_height(0), 0);
        assert_eq!(PollCursor::new().next_height(7), 7);
        assert_eq!(PollCursor::at(3).next_height(0), 4);
        assert_eq!(PollCursor::at(3).next_height(10), 10);
        assert!(PollCursor::at(5).has_reached(5));
        assert!(!PollCursor::new().has_reached(0));
    }
}
