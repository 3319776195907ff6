//! Embedded document engine for shelf.
//!
//! The engine owns everything that happens inside one bucket: durable
//! storage, identity, secondary indexes and queries. Records arrive as JSON
//! objects; the typed layer above converts them from and to Rust values.
//!
//! # Backends
//!
//! All backends implement the [`Engine`] and [`Bucket`] traits:
//!
//! - [`RocksEngine`] -- one RocksDB database per bucket
//! - [`MemoryEngine`] -- `HashMap`-backed buckets for tests and embedding
//!
//! # Design Rules
//!
//! 1. A record is identified by the canonical JSON text of its ID field.
//! 2. Saving an existing identity replaces the stored record.
//! 3. A record and its index entries are written in one atomic batch.
//! 4. Query results are returned in identity order.
//! 5. A closed handle refuses every call instead of touching a stale unit.

pub mod collection;
pub mod document;
pub mod error;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod traits;

pub use collection::Collection;
pub use error::{EngineError, EngineResult};
pub use memory::{MemoryBucket, MemoryEngine};
pub use rocks::{bucket_path, RocksBucket, RocksEngine, SyncMode, DEFAULT_EXTENSION};
pub use schema::BucketSchema;
pub use traits::{Bucket, Engine};
