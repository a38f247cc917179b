use crate::Args;
use clap::Parser;
use std::time::Duration;

#[test]
fn test_defaults_match_sync_config_defaults() {
    let args = Args::try_parse_from(["dagshrew-mono"]).unwrap();
    let config = args.sync_config();
    assert_eq!(config.batch_size, 10);
    assert_eq!(config.backfill_workers, 10);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.base_delay, Duration::from_secs(1));
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert!(config.pipeline.index_dag);
    assert!(config.pipeline.index_receipts);
    assert!(!config.pipeline.index_addresses);
    assert!(args.backfill_range().is_none());
}

#[test]
fn test_stage_switches() {
    let args = Args::try_parse_from([
        "dagshrew-mono",
        "--skip-dag",
        "--skip-receipts",
        "--track-balances",
    ])
    .unwrap();
    let pipeline = args.sync_config().pipeline;
    assert!(!pipeline.index_dag);
    assert!(!pipeline.index_receipts);
    assert!(pipeline.index_addresses);
    assert!(pipeline.track_balances);
}

#[test]
fn test_backfill_bounds_come_in_pairs() {
    assert!(Args::try_parse_from(["dagshrew-mono", "--backfill-from", "5"]).is_err());

    let args = Args::try_parse_from([
        "dagshrew-mono",
        "--backfill-from",
        "5",
        "--backfill-to",
        "9",
        "--workers",
        "3",
    ])
    .unwrap();
    assert_eq!(args.backfill_range(), Some((5, 9)));
    assert_eq!(args.sync_config().backfill_workers, 3);
}
