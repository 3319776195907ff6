use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineResult;
use crate::schema::BucketSchema;

/// One open physical storage unit holding the records of a single type.
///
/// All implementations must satisfy these invariants:
/// - A record's identity is its schema's ID field; saving an existing
///   identity replaces the previous record.
/// - A failed `save` or `delete` leaves the bucket unchanged.
/// - Results of multi-record queries are ordered by identity.
/// - Concurrent calls are safe; each call observes a consistent snapshot.
pub trait Bucket: Send + Sync {
    /// Declare the identity field and indexes. Idempotent: an identical
    /// schema is not written again.
    fn init(&self, schema: &BucketSchema) -> EngineResult<()>;

    /// Persist a JSON object, replacing any record with the same identity.
    fn save(&self, doc: Value) -> EngineResult<()>;

    /// First record whose `field` equals `value`.
    fn one(&self, field: &str, value: &Value) -> EngineResult<Value>;

    /// Every record whose `field` equals `value`. `NotFound` if none.
    fn find(&self, field: &str, value: &Value) -> EngineResult<Vec<Value>>;

    /// Every record in the bucket.
    fn all(&self) -> EngineResult<Vec<Value>>;

    /// Every record whose string `field` matches the regex `pattern`.
    /// `NotFound` if none.
    fn select_regex(&self, field: &str, pattern: &str) -> EngineResult<Vec<Value>>;

    /// Delete the record with the same identity as `doc`.
    fn delete(&self, doc: &Value) -> EngineResult<()>;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Returns `true` if the bucket holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The active schema.
    fn schema(&self) -> BucketSchema;

    /// Reclaim space held by replaced and deleted records.
    fn compact(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Release the unit. Waits for calls already in progress; every later
    /// call fails with [`EngineError::Closed`](crate::EngineError::Closed).
    /// Idempotent.
    fn close(&self);

    /// Location of the unit this bucket was opened from.
    fn path(&self) -> &Path;
}

/// Factory for buckets: opens units by path and destroys them out-of-band.
pub trait Engine: Send + Sync {
    /// Open (creating if needed) the unit at `path`.
    fn open(&self, path: &Path) -> EngineResult<Arc<dyn Bucket>>;

    /// Delete the unit at `path` from durable storage. Handles on it must be
    /// closed first. Returns `true` if a unit existed.
    fn destroy(&self, path: &Path) -> EngineResult<bool>;

    /// Extension used for unit paths (without the dot).
    fn extension(&self) -> &str;
}
