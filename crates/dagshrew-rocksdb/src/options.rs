//! RocksDB configuration for indexer workloads.
//!
//! Writes arrive as small per-block batches with prefix scans on the read
//! side. Key families have prefixes of different lengths (`b/`, `bh/`, `al/`),
//! so there is no prefix extractor: whole-key bloom filters serve the point
//! lookups and scans lean on a moderate block cache.

use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options};

const BLOCK_CACHE_BYTES: usize = 512 * 1024 * 1024;

/// Options used by [`crate::RocksDBStore::open`].
pub fn create_store_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);

    opts.set_write_buffer_size(64 * 1024 * 1024);
    opts.set_max_write_buffer_number(4);
    opts.set_min_write_buffer_number_to_merge(1);

    let cache = Cache::new_lru_cache(BLOCK_CACHE_BYTES);
    let mut table_opts = BlockBasedOptions::default();
    table_opts.set_block_cache(&cache);
    table_opts.set_block_size(16 * 1024);
    table_opts.set_cache_index_and_filter_blocks(true);
    table_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);
    table_opts.set_bloom_filter(10.0, false);
    table_opts.set_format_version(5);
    opts.set_block_based_table_factory(&table_opts);

    opts.set_compaction_style(rocksdb::DBCompactionStyle::Level);
    opts.set_level_compaction_dynamic_level_bytes(true);
    opts.set_target_file_size_base(128 * 1024 * 1024);

    opts.set_max_background_jobs(background_jobs());

    opts.set_max_open_files(10000);
    opts.set_compression_type(DBCompressionType::Lz4);
    opts.set_bytes_per_sync(8 * 1024 * 1024);
    opts.set_keep_log_file_num(5);
    opts.enable_statistics();

    opts
}

/// Flush and compaction threads: one per core, at least two.
pub fn background_jobs() -> i32 {
    num_cpus::get().max(2) as i32
}

/// Logs the engine's own counters at info level.
pub fn log_performance_stats(db: &rocksdb::DB) {
    if let Ok(Some(stats)) = db.property_value("rocksdb.stats") {
        log::info!("RocksDB stats:\n{}", stats);
    }
    if let Ok(Some(keys)) = db.property_value("rocksdb.estimate-num-keys") {
        log::info!("RocksDB estimated keys: {}", keys);
    }
    if let Ok(Some(size)) = db.property_value("rocksdb.total-sst-files-size") {
        log::info!("RocksDB SST size: {} bytes", size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_open_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = rocksdb::DB::open(&create_store_options(), dir.path()).unwrap();
        log_performance_stats(&db);
    }

    #[test]
    fn test_background_jobs_follow_core_count() {
        assert_eq!(background_jobs(), num_cpus::get().max(2) as i32);
        assert!(background_jobs() >= 2);
    }
}
