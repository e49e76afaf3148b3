//! driftkv core — durable in-memory key-value store with TTL
//!
//! A single-node key-value engine where RAM is the only read surface and a
//! textual write-ahead log provides crash safety.
//!
//! # Architecture
//!
//! - **Read path**: serve directly from the RAM hash map under a shared lock
//! - **Write path**: WAL-first (append + fsync), then RAM update
//! - **Recovery**: replay the WAL on open, skipping CRC-damaged records
//! - **Queries**: pull-based operator trees ([`operators`]) that hold a
//!   shared read lease on the map for snapshot-consistent scans
//!
//! Keys carry an optional expiry instant. Expiry is lazy: an expired entry
//! stays in the map until it is overwritten or deleted, but reads treat it
//! as absent.

pub mod config;
pub mod error;
pub mod operators;
pub mod store;
pub mod ttl;
pub mod wal;

// Re-export key types for convenience
pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use operators::{Filter, KvScan, Limit, Operator, Project, Row};
pub use store::{Key, Reply, Store, TtlReport, Value};
pub use wal::{Wal, WalRecord};
