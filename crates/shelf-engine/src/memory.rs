//! In-memory buckets for tests and ephemeral stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::collection::Collection;
use crate::error::{EngineError, EngineResult};
use crate::schema::BucketSchema;
use crate::traits::{Bucket, Engine};

type SharedCollection = Arc<RwLock<Collection>>;

/// A handle on an in-memory unit.
///
/// Handles opened on the same unit share its data. Closing a handle leaves
/// the data in place for the next open.
#[derive(Debug)]
pub struct MemoryBucket {
    path: PathBuf,
    data: SharedCollection,
    closed: RwLock<bool>,
}

impl MemoryBucket {
    /// Create an empty, standalone bucket labelled with `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_data(path.into(), SharedCollection::default())
    }

    fn with_data(path: PathBuf, data: SharedCollection) -> Self {
        Self {
            path,
            data,
            closed: RwLock::new(false),
        }
    }

    // The closed flag stays read-locked for the whole call so `close` waits
    // for calls in progress.
    fn read<R>(&self, f: impl FnOnce(&Collection) -> EngineResult<R>) -> EngineResult<R> {
        let closed = self.closed.read().expect("lock poisoned");
        if *closed {
            return Err(EngineError::Closed);
        }
        f(&self.data.read().expect("lock poisoned"))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Collection) -> EngineResult<R>) -> EngineResult<R> {
        let closed = self.closed.read().expect("lock poisoned");
        if *closed {
            return Err(EngineError::Closed);
        }
        f(&mut self.data.write().expect("lock poisoned"))
    }
}

impl Bucket for MemoryBucket {
    fn init(&self, schema: &BucketSchema) -> EngineResult<()> {
        self.write(|state| {
            if state.schema() != schema {
                state.apply_schema(schema.clone());
            }
            Ok(())
        })
    }

    fn save(&self, doc: Value) -> EngineResult<()> {
        self.write(|state| {
            let key = state.prepare(&doc)?;
            state.insert(key, doc);
            Ok(())
        })
    }

    fn one(&self, field: &str, value: &Value) -> EngineResult<Value> {
        self.read(|state| state.one(field, value))
    }

    fn find(&self, field: &str, value: &Value) -> EngineResult<Vec<Value>> {
        self.read(|state| state.find(field, value))
    }

    fn all(&self) -> EngineResult<Vec<Value>> {
        self.read(|state| Ok(state.all()))
    }

    fn select_regex(&self, field: &str, pattern: &str) -> EngineResult<Vec<Value>> {
        self.read(|state| state.select_regex(field, pattern))
    }

    fn delete(&self, doc: &Value) -> EngineResult<()> {
        self.write(|state| {
            let key = state.key_of(doc)?;
            state.remove(&key).map(|_| ()).ok_or(EngineError::NotFound)
        })
    }

    fn len(&self) -> usize {
        self.read(|state| Ok(state.len())).unwrap_or(0)
    }

    fn schema(&self) -> BucketSchema {
        self.read(|state| Ok(state.schema().clone()))
            .unwrap_or_default()
    }

    fn close(&self) {
        *self.closed.write().expect("lock poisoned") = true;
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Engine whose units live in a `HashMap` keyed by path.
///
/// A unit persists between opens until it is destroyed, like a file.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    units: RwLock<HashMap<PathBuf, SharedCollection>>,
}

impl MemoryEngine {
    /// Create an engine with no units.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units currently held.
    pub fn unit_count(&self) -> usize {
        self.units.read().expect("lock poisoned").len()
    }
}

impl Engine for MemoryEngine {
    fn open(&self, path: &Path) -> EngineResult<Arc<dyn Bucket>> {
        let data = Arc::clone(
            self.units
                .write()
                .expect("lock poisoned")
                .entry(path.to_path_buf())
                .or_default(),
        );
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::with_data(path.to_path_buf(), data));
        Ok(bucket)
    }

    fn destroy(&self, path: &Path) -> EngineResult<bool> {
        let mut units = self.units.write().expect("lock poisoned");
        Ok(units.remove(path).is_some())
    }

    fn extension(&self) -> &str {
        "mem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_same_path_shares_data() {
        let engine = MemoryEngine::new();
        let a = engine.open(Path::new("root/User.mem")).unwrap();
        a.save(json!({"id": 1, "name": "alice"})).unwrap();

        let b = engine.open(Path::new("root/User.mem")).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(engine.unit_count(), 1);
    }

    #[test]
    fn destroy_forgets_unit() {
        let engine = MemoryEngine::new();
        let path = Path::new("root/User.mem");
        engine.open(path).unwrap().save(json!({"id": 1})).unwrap();

        assert!(engine.destroy(path).unwrap());
        assert!(!engine.destroy(path).unwrap());
        assert!(engine.open(path).unwrap().is_empty());
    }

    #[test]
    fn closed_handle_keeps_unit_for_next_open() {
        let engine = MemoryEngine::new();
        let path = Path::new("root/User.mem");
        let first = engine.open(path).unwrap();
        first.save(json!({"id": 1})).unwrap();
        first.close();

        assert!(matches!(first.save(json!({"id": 2})), Err(EngineError::Closed)));
        assert!(matches!(first.all(), Err(EngineError::Closed)));
        assert_eq!(first.len(), 0);
        assert_eq!(engine.open(path).unwrap().len(), 1);
    }

    #[test]
    fn custom_identity_field() {
        let bucket = MemoryBucket::new("Account.mem");
        bucket.init(&BucketSchema::new("key")).unwrap();
        bucket.save(json!({"key": "acc-1", "balance": 10})).unwrap();
        bucket.save(json!({"key": "acc-1", "balance": 20})).unwrap();

        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.one("key", &json!("acc-1")).unwrap()["balance"], 20);
        assert!(matches!(
            bucket.save(json!({"id": 5})),
            Err(EngineError::MissingId { .. })
        ));
        bucket.delete(&json!({"key": "acc-1"})).unwrap();
        assert!(bucket.is_empty());
    }

    #[test]
    fn queries_delegate_to_collection() {
        let bucket = MemoryBucket::new("User.mem");
        bucket.save(json!({"id": 1, "name": "alice"})).unwrap();
        bucket.save(json!({"id": 2, "name": "alfred"})).unwrap();
        bucket.save(json!({"id": 3, "name": "bob"})).unwrap();

        assert_eq!(bucket.select_regex("name", "^al").unwrap().len(), 2);
        assert_eq!(bucket.find("name", &json!("bob")).unwrap().len(), 1);
        assert_eq!(bucket.all().unwrap().len(), 3);
    }
}
