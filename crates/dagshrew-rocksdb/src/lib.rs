//! RocksDB backend for the dagshrew storage ports.

pub mod options;
pub mod store;

pub use options::{create_store_options, log_performance_stats};
pub use store::RocksDBStore;
