//! In-memory view of one bucket: live documents plus secondary indexes.
//!
//! [`Collection`] holds no I/O. [`crate::MemoryBucket`] keeps one behind a
//! lock and routes every query through it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::document::{canonical, compile_pattern, identity_key, text_matches, unique_values};
use crate::error::{EngineError, EngineResult};
use crate::schema::BucketSchema;

/// Field value -> identities holding it.
type FieldIndex = HashMap<String, BTreeSet<String>>;

/// Live documents of one bucket, keyed by identity.
#[derive(Debug, Default)]
pub struct Collection {
    schema: BucketSchema,
    docs: BTreeMap<String, Value>,
    indexes: HashMap<String, FieldIndex>,
}

impl Collection {
    /// Create an empty collection with the default schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The active schema.
    pub fn schema(&self) -> &BucketSchema {
        &self.schema
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns `true` if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Returns `true` if a document is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.docs.contains_key(key)
    }

    /// Iterate over `(identity, document)` pairs in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.docs.iter()
    }

    /// Replace the schema and rebuild every secondary index.
    pub fn apply_schema(&mut self, schema: BucketSchema) {
        self.schema = schema;
        self.indexes.clear();
        for field in self.schema.indexed_fields() {
            self.indexes.insert(field.to_string(), FieldIndex::new());
        }
        let docs = std::mem::take(&mut self.docs);
        for (key, doc) in docs {
            self.index_doc(&key, &doc);
            self.docs.insert(key, doc);
        }
    }

    /// Identity key of a document under the active schema.
    pub fn key_of(&self, doc: &Value) -> EngineResult<String> {
        identity_key(&self.schema, doc)
    }

    /// Validate a document for insertion and return its identity key.
    ///
    /// Checks shape, identity and unique constraints without mutating
    /// anything, so callers can persist first and [`Collection::insert`] after.
    pub fn prepare(&self, doc: &Value) -> EngineResult<String> {
        let key = self.key_of(doc)?;
        for (field, value) in unique_values(&self.schema, doc) {
            let holders = self.indexes.get(field).and_then(|idx| idx.get(&value));
            if holders.is_some_and(|keys| keys.iter().any(|k| k != &key)) {
                return Err(EngineError::UniqueViolation {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(key)
    }

    /// Insert or replace the document stored under `key`.
    pub fn insert(&mut self, key: String, doc: Value) {
        if let Some(old) = self.docs.remove(&key) {
            self.unindex_doc(&key, &old);
        }
        self.index_doc(&key, &doc);
        self.docs.insert(key, doc);
    }

    /// Remove the document stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.docs.remove(key)?;
        self.unindex_doc(key, &old);
        Some(old)
    }

    /// First document whose `field` equals `value`.
    pub fn one(&self, field: &str, value: &Value) -> EngineResult<Value> {
        self.matching(field, value)
            .into_iter()
            .next()
            .ok_or(EngineError::NotFound)
    }

    /// Every document whose `field` equals `value`; `NotFound` if none.
    pub fn find(&self, field: &str, value: &Value) -> EngineResult<Vec<Value>> {
        let found = self.matching(field, value);
        if found.is_empty() {
            return Err(EngineError::NotFound);
        }
        Ok(found)
    }

    /// Every document, possibly none.
    pub fn all(&self) -> Vec<Value> {
        self.docs.values().cloned().collect()
    }

    /// Every document whose string `field` matches `pattern`; `NotFound` if none.
    pub fn select_regex(&self, field: &str, pattern: &str) -> EngineResult<Vec<Value>> {
        let re = compile_pattern(pattern)?;
        let found: Vec<Value> = self
            .docs
            .values()
            .filter(|doc| text_matches(doc, field, &re))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(EngineError::NotFound);
        }
        Ok(found)
    }

    fn matching(&self, field: &str, value: &Value) -> Vec<Value> {
        if field == self.schema.id_field {
            return self
                .docs
                .get(&canonical(value))
                .cloned()
                .into_iter()
                .collect();
        }
        if let Some(index) = self.indexes.get(field) {
            return index
                .get(&canonical(value))
                .into_iter()
                .flatten()
                .filter_map(|key| self.docs.get(key))
                .cloned()
                .collect();
        }
        self.docs
            .values()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect()
    }

    fn index_doc(&mut self, key: &str, doc: &Value) {
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = doc.get(field) {
                index
                    .entry(canonical(value))
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn unindex_doc(&mut self, key: &str, doc: &Value) {
        for (field, index) in self.indexes.iter_mut() {
            let Some(value) = doc.get(field) else {
                continue;
            };
            let value = canonical(value);
            if let Some(keys) = index.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(&value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn users() -> Collection {
        let mut c = Collection::new();
        c.apply_schema(BucketSchema::new("id").with_indexes(["name"]).with_unique(["email"]));
        for (id, name, email, age) in [
            (1, "alice", "a@x.io", 30),
            (2, "bob", "b@x.io", 25),
            (3, "alice", "c@x.io", 41),
        ] {
            let doc = json!({"id": id, "name": name, "email": email, "age": age});
            let key = c.prepare(&doc).unwrap();
            c.insert(key, doc);
        }
        c
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    #[test]
    fn key_requires_object_and_identity() {
        let c = Collection::new();
        assert!(matches!(c.key_of(&json!(5)), Err(EngineError::NotAnObject)));
        assert!(matches!(
            c.key_of(&json!({"name": "x"})),
            Err(EngineError::MissingId { .. })
        ));
        for zero in [json!({"id": 0}), json!({"id": ""}), json!({"id": null}), json!({"id": 0.0})] {
            assert!(matches!(c.key_of(&zero), Err(EngineError::ZeroId { .. })));
        }
        assert_eq!(c.key_of(&json!({"id": 7})).unwrap(), "7");
        assert_eq!(c.key_of(&json!({"id": "7"})).unwrap(), "\"7\"");
    }

    #[test]
    fn insert_same_identity_replaces() {
        let mut c = users();
        let doc = json!({"id": 2, "name": "robert", "email": "b@x.io", "age": 26});
        let key = c.prepare(&doc).unwrap();
        c.insert(key, doc.clone());

        assert_eq!(c.len(), 3);
        assert_eq!(c.one("name", &json!("robert")).unwrap(), doc);
        assert!(matches!(c.one("name", &json!("bob")), Err(EngineError::NotFound)));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[test]
    fn one_returns_first_in_identity_order() {
        let c = users();
        let doc = c.one("name", &json!("alice")).unwrap();
        assert_eq!(doc["id"], 1);
    }

    #[test]
    fn find_indexed_and_scanned_fields() {
        let c = users();
        assert_eq!(c.find("name", &json!("alice")).unwrap().len(), 2);
        assert_eq!(c.find("age", &json!(25)).unwrap()[0]["name"], "bob");
        assert_eq!(c.find("id", &json!(3)).unwrap()[0]["age"], 41);
        assert!(matches!(c.find("age", &json!(99)), Err(EngineError::NotFound)));
    }

    #[test]
    fn select_regex_matches_strings_only() {
        let c = users();
        let found = c.select_regex("email", r"^[ab]@").unwrap();
        assert_eq!(found.len(), 2);
        assert!(matches!(c.select_regex("age", "3"), Err(EngineError::NotFound)));
        assert!(matches!(
            c.select_regex("name", "("),
            Err(EngineError::InvalidPattern(_))
        ));
    }

    #[test]
    fn all_may_be_empty() {
        assert!(Collection::new().all().is_empty());
        assert_eq!(users().all().len(), 3);
    }

    // -----------------------------------------------------------------------
    // Constraints and index maintenance
    // -----------------------------------------------------------------------

    #[test]
    fn unique_rejects_other_holder() {
        let c = users();
        let dup = json!({"id": 9, "name": "eve", "email": "a@x.io"});
        assert!(matches!(
            c.prepare(&dup),
            Err(EngineError::UniqueViolation { ref field, .. }) if field == "email"
        ));
        // The holder itself may keep its value.
        let same = json!({"id": 1, "name": "alice", "email": "a@x.io"});
        assert!(c.prepare(&same).is_ok());
    }

    #[test]
    fn remove_updates_indexes() {
        let mut c = users();
        assert!(c.remove("1").is_some());
        assert!(c.remove("1").is_none());
        assert_eq!(c.find("name", &json!("alice")).unwrap().len(), 1);
        let reuse = json!({"id": 4, "email": "a@x.io"});
        assert!(c.prepare(&reuse).is_ok());
    }

    #[test]
    fn apply_schema_reindexes_existing_docs() {
        let mut c = users();
        c.apply_schema(BucketSchema::new("id").with_unique(["age"]));
        let dup = json!({"id": 8, "age": 30});
        assert!(matches!(c.prepare(&dup), Err(EngineError::UniqueViolation { .. })));
    }

    proptest! {
        #[test]
        fn indexed_and_scanned_lookups_agree(names in proptest::collection::vec("[a-c]", 1..20)) {
            let mut indexed = Collection::new();
            indexed.apply_schema(BucketSchema::new("id").with_indexes(["name"]));
            let mut scanned = Collection::new();
            for (i, name) in names.iter().enumerate() {
                let doc = json!({"id": i + 1, "name": name});
                indexed.insert(indexed.prepare(&doc).unwrap(), doc.clone());
                scanned.insert(scanned.prepare(&doc).unwrap(), doc);
            }
            for name in ["a", "b", "c"] {
                let want = names.iter().filter(|n| n.as_str() == name).count();
                let a = indexed.find("name", &json!(name)).map(|v| v.len()).unwrap_or(0);
                let b = scanned.find("name", &json!(name)).map(|v| v.len()).unwrap_or(0);
                prop_assert_eq!(a, want);
                prop_assert_eq!(b, want);
            }
        }
    }
}
