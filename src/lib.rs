//! Dagshrew Test Suite
//!
//! End-to-end tests that drive the ingestion pipeline against the mock node,
//! scripted HTTP transports, the in-memory store and RocksDB.

pub mod tests;

pub use tests::{TestChain, TestStores};
