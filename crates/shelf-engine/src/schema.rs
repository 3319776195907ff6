use serde::{Deserialize, Serialize};

/// Per-bucket schema: which field is the identity and which are indexed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSchema {
    /// Field holding the record identity.
    pub id_field: String,
    /// Fields with a secondary index.
    pub indexes: Vec<String>,
    /// Indexed fields whose values must be distinct.
    pub unique: Vec<String>,
}

impl BucketSchema {
    /// Schema with the given identity field and no indexes.
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            indexes: Vec::new(),
            unique: Vec::new(),
        }
    }

    /// Add secondary indexes.
    pub fn with_indexes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add unique indexes.
    pub fn with_unique<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Every field that needs a secondary index, deduplicated, in declaration order.
    pub fn indexed_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for field in self.indexes.iter().chain(self.unique.iter()) {
            if field != &self.id_field && !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }

    /// Returns `true` if `field` must hold distinct values.
    pub fn is_unique(&self, field: &str) -> bool {
        self.unique.iter().any(|f| f == field)
    }
}

impl Default for BucketSchema {
    fn default() -> Self {
        Self::new("id")
    }
}
