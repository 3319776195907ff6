//! Foundation types for shelf.
//!
//! Every value persisted by a shelf store is routed to its own bucket, one
//! physical storage unit per record type. This crate defines how a type names
//! its bucket.
//!
//! # Key Types
//!
//! - [`BucketId`] -- Validated bucket name, also used as the on-disk file stem
//! - [`Record`] -- Trait implemented by every persisted type
//! - [`TypeError`] -- Validation failures

pub mod bucket;
pub mod error;
pub mod record;

pub use bucket::BucketId;
pub use error::TypeError;
pub use record::{simple_type_name, Record};
