//! # dagshrew-sync
//!
//! Ingestion core of a block-DAG chain indexer: a retrying JSON-RPC client for
//! the node, the block, receipt, DAG and address indexers, the per-height
//! pipeline that chains them, and the two drivers (tip-following poll loop
//! and bounded-concurrency range backfill).
//!
//! Storage is reached only through the capability traits in [`traits`];
//! [`memstore::InMemoryStore`] implements all of them, and the
//! `dagshrew-rocksdb` crate provides the persistent backend.

pub mod adapters;
pub mod address_indexer;
pub mod backfill;
pub mod block_indexer;
pub mod dag_indexer;
pub mod domain;
pub mod error;
pub mod memstore;
pub mod pipeline;
pub mod rpc;
pub mod sync;
pub mod traits;
pub mod transaction_indexer;
pub mod types;
pub mod wire;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use adapters::*;
pub use address_indexer::*;
pub use backfill::*;
pub use block_indexer::*;
pub use dag_indexer::*;
pub use domain::*;
pub use error::*;
pub use memstore::*;
pub use pipeline::*;
pub use rpc::*;
pub use sync::*;
pub use traits::*;
pub use transaction_indexer::*;
pub use types::*;
