//! RocksDB-backed buckets: one database directory per bucket.
//!
//! Column families:
//! - `docs`  -- record JSON keyed by identity key
//! - `index` -- empty values keyed by `field \0 value \0 identity`
//! - `meta`  -- the bucket schema (bincode)
//!
//! Every mutation is a single `WriteBatch`, so a record and its index
//! entries change together or not at all.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{canonical, compile_pattern, identity_key, text_matches, unique_values};
use crate::error::{EngineError, EngineResult};
use crate::schema::BucketSchema;
use crate::traits::{Bucket, Engine};

/// Default bucket directory extension.
pub const DEFAULT_EXTENSION: &str = "db";

const CF_DOCS: &str = "docs";
const CF_INDEX: &str = "index";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCS, CF_INDEX, CF_META];

const SCHEMA_KEY: &[u8] = b"schema";

/// When RocksDB fsyncs its write-ahead log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// fsync before every write returns.
    EveryWrite,
    /// Leave syncing to RocksDB and the OS.
    #[default]
    OsDefault,
}

/// An open database plus the state derived from it.
struct OpenDb {
    db: DB,
    schema: BucketSchema,
    count: usize,
}

impl OpenDb {
    fn cf(&self, name: &str) -> EngineResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Database(format!("column family {name:?} not found")))
    }

    fn doc(&self, key: &str) -> EngineResult<Option<Value>> {
        match self.db.get_cf(self.cf(CF_DOCS)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every record accepted by `keep`, in identity order.
    fn scan(&self, keep: impl Fn(&Value) -> bool) -> EngineResult<Vec<Value>> {
        let mut found = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_DOCS)?, IteratorMode::Start) {
            let (_, bytes) = item?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            if keep(&doc) {
                found.push(doc);
            }
        }
        Ok(found)
    }

    /// Identities holding `value` (canonical) in indexed `field`.
    fn holders(&self, field: &str, value: &str) -> EngineResult<Vec<String>> {
        let prefix = index_prefix(field, value);
        let mut keys = Vec::new();
        let mode = IteratorMode::From(prefix.as_slice(), Direction::Forward);
        for item in self.db.iterator_cf(self.cf(CF_INDEX)?, mode) {
            let (key, _) = item?;
            let Some(identity) = key.strip_prefix(prefix.as_slice()) else {
                break;
            };
            keys.push(String::from_utf8_lossy(identity).into_owned());
        }
        Ok(keys)
    }

    fn matching(&self, field: &str, value: &Value) -> EngineResult<Vec<Value>> {
        if field == self.schema.id_field {
            return Ok(self.doc(&canonical(value))?.into_iter().collect());
        }
        if self.schema.indexed_fields().contains(&field) {
            let mut found = Vec::new();
            for key in self.holders(field, &canonical(value))? {
                if let Some(doc) = self.doc(&key)? {
                    found.push(doc);
                }
            }
            return Ok(found);
        }
        self.scan(|doc| doc.get(field) == Some(value))
    }

    /// Index entries `doc` contributes under the active schema.
    fn index_entries(&self, key: &str, doc: &Value) -> Vec<Vec<u8>> {
        self.schema
            .indexed_fields()
            .into_iter()
            .filter_map(|field| {
                doc.get(field)
                    .map(|value| index_key(field, &canonical(value), key))
            })
            .collect()
    }

    /// Batch replacing every index entry with those of the active schema,
    /// and storing `meta` as the schema record.
    fn reindex(&self, meta: Vec<u8>) -> EngineResult<WriteBatch> {
        let index = self.cf(CF_INDEX)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(index, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(index, key);
        }
        for item in self.db.iterator_cf(self.cf(CF_DOCS)?, IteratorMode::Start) {
            let (key, bytes) = item?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            for entry in self.index_entries(&String::from_utf8_lossy(&key), &doc) {
                batch.put_cf(index, entry, b"");
            }
        }
        batch.put_cf(self.cf(CF_META)?, SCHEMA_KEY, meta);
        Ok(batch)
    }

    fn count_docs(&self) -> EngineResult<usize> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf(CF_DOCS)?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

fn index_prefix(field: &str, value: &str) -> Vec<u8> {
    format!("{field}\0{value}\0").into_bytes()
}

fn index_key(field: &str, value: &str, key: &str) -> Vec<u8> {
    format!("{field}\0{value}\0{key}").into_bytes()
}

/// A bucket stored in its own RocksDB database.
///
/// Reads share the state lock; writes hold it exclusively so constraint
/// checks and the batch that follows see the same data.
pub struct RocksBucket {
    path: PathBuf,
    sync: SyncMode,
    state: RwLock<Option<OpenDb>>,
}

impl RocksBucket {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, sync: SyncMode) -> EngineResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(2);

        let db = DB::open_cf(&opts, path, COLUMN_FAMILIES.iter().copied())?;
        let mut open = OpenDb {
            db,
            schema: BucketSchema::default(),
            count: 0,
        };
        let stored = open.db.get_cf(open.cf(CF_META)?, SCHEMA_KEY)?;
        if let Some(bytes) = stored {
            open.schema = bincode::deserialize(&bytes)
                .map_err(|e| EngineError::Serialization(e.to_string()))?;
        }
        open.count = open.count_docs()?;
        debug!(path = %path.display(), records = open.count, "rocksdb bucket opened");

        Ok(Self {
            path: path.to_path_buf(),
            sync,
            state: RwLock::new(Some(open)),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&OpenDb) -> EngineResult<R>) -> EngineResult<R> {
        let state = self.state.read().expect("bucket lock poisoned");
        f(state.as_ref().ok_or(EngineError::Closed)?)
    }

    fn write<R>(&self, f: impl FnOnce(&mut OpenDb) -> EngineResult<R>) -> EngineResult<R> {
        let mut state = self.state.write().expect("bucket lock poisoned");
        f(state.as_mut().ok_or(EngineError::Closed)?)
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync == SyncMode::EveryWrite);
        opts
    }
}

impl Bucket for RocksBucket {
    fn init(&self, schema: &BucketSchema) -> EngineResult<()> {
        self.write(|open| {
            if open.schema == *schema {
                return Ok(());
            }
            let meta = bincode::serialize(schema)
                .map_err(|e| EngineError::Serialization(e.to_string()))?;
            let previous = std::mem::replace(&mut open.schema, schema.clone());
            let written = open
                .reindex(meta)
                .and_then(|batch| Ok(open.db.write_opt(batch, &self.write_options())?));
            if let Err(e) = written {
                open.schema = previous;
                return Err(e);
            }
            debug!(path = %self.path.display(), "bucket schema updated");
            Ok(())
        })
    }

    fn save(&self, doc: Value) -> EngineResult<()> {
        self.write(|open| {
            let key = identity_key(&open.schema, &doc)?;
            for (field, value) in unique_values(&open.schema, &doc) {
                if open.holders(field, &value)?.iter().any(|k| k != &key) {
                    return Err(EngineError::UniqueViolation {
                        field: field.to_string(),
                        value,
                    });
                }
            }

            let previous = open.doc(&key)?;
            let index = open.cf(CF_INDEX)?;
            let mut batch = WriteBatch::default();
            if let Some(old) = &previous {
                for entry in open.index_entries(&key, old) {
                    batch.delete_cf(index, entry);
                }
            }
            for entry in open.index_entries(&key, &doc) {
                batch.put_cf(index, entry, b"");
            }
            batch.put_cf(open.cf(CF_DOCS)?, key.as_bytes(), serde_json::to_vec(&doc)?);
            open.db.write_opt(batch, &self.write_options())?;

            if previous.is_none() {
                open.count += 1;
            }
            Ok(())
        })
    }

    fn one(&self, field: &str, value: &Value) -> EngineResult<Value> {
        self.read(|open| {
            open.matching(field, value)?
                .into_iter()
                .next()
                .ok_or(EngineError::NotFound)
        })
    }

    fn find(&self, field: &str, value: &Value) -> EngineResult<Vec<Value>> {
        let found = self.read(|open| open.matching(field, value))?;
        if found.is_empty() {
            return Err(EngineError::NotFound);
        }
        Ok(found)
    }

    fn all(&self) -> EngineResult<Vec<Value>> {
        self.read(|open| open.scan(|_| true))
    }

    fn select_regex(&self, field: &str, pattern: &str) -> EngineResult<Vec<Value>> {
        let re = compile_pattern(pattern)?;
        let found = self.read(|open| open.scan(|doc| text_matches(doc, field, &re)))?;
        if found.is_empty() {
            return Err(EngineError::NotFound);
        }
        Ok(found)
    }

    fn delete(&self, doc: &Value) -> EngineResult<()> {
        self.write(|open| {
            let key = identity_key(&open.schema, doc)?;
            let old = open.doc(&key)?.ok_or(EngineError::NotFound)?;

            let index = open.cf(CF_INDEX)?;
            let mut batch = WriteBatch::default();
            for entry in open.index_entries(&key, &old) {
                batch.delete_cf(index, entry);
            }
            batch.delete_cf(open.cf(CF_DOCS)?, key.as_bytes());
            open.db.write_opt(batch, &self.write_options())?;

            open.count -= 1;
            Ok(())
        })
    }

    fn len(&self) -> usize {
        self.read(|open| Ok(open.count)).unwrap_or(0)
    }

    fn schema(&self) -> BucketSchema {
        self.read(|open| Ok(open.schema.clone()))
            .unwrap_or_default()
    }

    fn compact(&self) -> EngineResult<()> {
        self.read(|open| {
            for name in COLUMN_FAMILIES {
                open.db
                    .compact_range_cf(open.cf(name)?, None::<&[u8]>, None::<&[u8]>);
            }
            Ok(())
        })
    }

    fn close(&self) {
        let closed = self.state.write().expect("bucket lock poisoned").take();
        if closed.is_some() {
            debug!(path = %self.path.display(), "rocksdb bucket closed");
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RocksBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksBucket")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("records", &self.len())
            .finish()
    }
}

/// Engine storing each bucket as a RocksDB database directory.
#[derive(Debug, Clone)]
pub struct RocksEngine {
    sync: SyncMode,
    extension: String,
}

impl RocksEngine {
    /// Engine with the given sync mode and the default `db` extension.
    pub fn new(sync: SyncMode) -> Self {
        Self {
            sync,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Use `extension` for bucket directories instead of `db`.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

impl Default for RocksEngine {
    fn default() -> Self {
        Self::new(SyncMode::default())
    }
}

impl Engine for RocksEngine {
    fn open(&self, path: &Path) -> EngineResult<Arc<dyn Bucket>> {
        let bucket: Arc<dyn Bucket> = Arc::new(RocksBucket::open(path, self.sync)?);
        Ok(bucket)
    }

    /// Fails while any handle on `path` is still open.
    fn destroy(&self, path: &Path) -> EngineResult<bool> {
        if !path.exists() {
            return Ok(false);
        }
        DB::destroy(&Options::default(), path)?;
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        info!(path = %path.display(), "bucket database destroyed");
        Ok(true)
    }

    fn extension(&self) -> &str {
        &self.extension
    }
}

/// Location of bucket `name` under `root`.
pub fn bucket_path(root: &Path, name: &str, extension: &str) -> PathBuf {
    if extension.is_empty() {
        root.join(name)
    } else {
        root.join(format!("{name}.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_schema() -> BucketSchema {
        BucketSchema::new("id")
            .with_indexes(["name"])
            .with_unique(["email"])
    }

    fn open_users(dir: &Path) -> RocksBucket {
        let bucket = RocksBucket::open(&dir.join("User.db"), SyncMode::OsDefault).unwrap();
        bucket.init(&users_schema()).unwrap();
        bucket
    }

    // ---- durability ----

    #[test]
    fn records_and_schema_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let bucket = open_users(dir.path());
            bucket.save(json!({"id": 1, "name": "alice", "email": "a@x.io"})).unwrap();
            bucket.save(json!({"id": 2, "name": "bob", "email": "b@x.io"})).unwrap();
            bucket.save(json!({"id": 2, "name": "robert", "email": "b@x.io"})).unwrap();
            bucket.delete(&json!({"id": 1})).unwrap();
        }

        let bucket = RocksBucket::open(&dir.path().join("User.db"), SyncMode::EveryWrite).unwrap();
        assert_eq!(bucket.schema(), users_schema());
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.one("name", &json!("robert")).unwrap()["id"], 2);
        assert!(matches!(
            bucket.one("name", &json!("bob")),
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn compact_keeps_live_records() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = open_users(dir.path());
        for round in 0..20 {
            bucket
                .save(json!({"id": 1, "name": format!("alice-{round}"), "email": "a@x.io"}))
                .unwrap();
        }
        bucket.compact().unwrap();
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.one("id", &json!(1)).unwrap()["name"], "alice-19");
        assert_eq!(bucket.find("name", &json!("alice-19")).unwrap().len(), 1);
    }

    // ---- queries and constraints ----

    #[test]
    fn indexed_and_scanned_queries() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = open_users(dir.path());
        for (id, name, email, age) in [
            (3, "alice", "c@x.io", 41),
            (1, "alice", "a@x.io", 30),
            (2, "bob", "b@x.io", 25),
        ] {
            bucket
                .save(json!({"id": id, "name": name, "email": email, "age": age}))
                .unwrap();
        }

        assert_eq!(bucket.one("name", &json!("alice")).unwrap()["id"], 1);
        assert_eq!(bucket.find("name", &json!("alice")).unwrap().len(), 2);
        assert_eq!(bucket.find("age", &json!(25)).unwrap()[0]["name"], "bob");
        assert_eq!(bucket.select_regex("email", "^[ab]@").unwrap().len(), 2);
        assert!(matches!(
            bucket.select_regex("name", "("),
            Err(EngineError::InvalidPattern(_))
        ));
        let ids: Vec<_> = bucket.all().unwrap().iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn rejected_writes_change_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = open_users(dir.path());
        bucket.save(json!({"id": 1, "name": "alice", "email": "a@x.io"})).unwrap();

        assert!(matches!(
            bucket.save(json!({"id": 2, "name": "eve", "email": "a@x.io"})),
            Err(EngineError::UniqueViolation { .. })
        ));
        assert!(matches!(
            bucket.save(json!({"id": 0, "name": "zero"})),
            Err(EngineError::ZeroId { .. })
        ));
        assert!(matches!(
            bucket.delete(&json!({"id": 9})),
            Err(EngineError::NotFound)
        ));
        assert_eq!(bucket.len(), 1);
        assert!(matches!(
            bucket.find("name", &json!("eve")),
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn schema_change_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = open_users(dir.path());
        bucket.save(json!({"id": 1, "name": "alice", "email": "a@x.io", "age": 30})).unwrap();

        bucket.init(&BucketSchema::new("id").with_unique(["age"])).unwrap();
        assert!(matches!(
            bucket.save(json!({"id": 2, "age": 30})),
            Err(EngineError::UniqueViolation { ref field, .. }) if field == "age"
        ));
        bucket.save(json!({"id": 3, "email": "a@x.io"})).unwrap();
    }

    // ---- lifecycle ----

    #[test]
    fn closed_handle_refuses_calls() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = open_users(dir.path());
        bucket.save(json!({"id": 1, "name": "alice"})).unwrap();
        bucket.close();
        bucket.close();

        assert!(matches!(bucket.save(json!({"id": 2})), Err(EngineError::Closed)));
        assert!(matches!(bucket.all(), Err(EngineError::Closed)));
        assert_eq!(bucket.len(), 0);

        let reopened = open_users(dir.path());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn destroy_removes_closed_database() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksEngine::default();
        let path = bucket_path(dir.path(), "User", engine.extension());
        let bucket = engine.open(&path).unwrap();
        bucket.save(json!({"id": 1})).unwrap();
        bucket.close();

        assert!(engine.destroy(&path).unwrap());
        assert!(!path.exists());
        assert!(!engine.destroy(&path).unwrap());
        assert!(engine.open(&path).unwrap().is_empty());
    }

    #[test]
    fn second_open_of_live_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksEngine::default();
        let path = bucket_path(dir.path(), "User", engine.extension());
        let _live = engine.open(&path).unwrap();
        assert!(matches!(engine.open(&path), Err(EngineError::Database(_))));
    }

    #[test]
    fn bucket_path_layout() {
        let root = Path::new("/data");
        assert_eq!(bucket_path(root, "User", "db"), PathBuf::from("/data/User.db"));
        assert_eq!(bucket_path(root, "User", ""), PathBuf::from("/data/User"));
    }
}
