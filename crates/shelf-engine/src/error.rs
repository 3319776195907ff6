/// Errors from bucket engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No record matched the lookup.
    #[error("not found")]
    NotFound,

    /// The document handed to the engine is not a JSON object.
    #[error("record is not a structured object")]
    NotAnObject,

    /// The document has no value for its identity field.
    #[error("record has no identity field {field:?}")]
    MissingId { field: String },

    /// The identity field holds a zero value (0, "", or null).
    #[error("record identity field {field:?} has a zero value")]
    ZeroId { field: String },

    /// Another record already holds this value in a unique field.
    #[error("unique constraint violated on {field:?}: value {value} already exists")]
    UniqueViolation { field: String, value: String },

    /// The pattern given to a regex query does not compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The bucket handle was closed; reopen the unit to continue.
    #[error("bucket is closed")]
    Closed,

    /// Stored bytes could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error reported by RocksDB.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error from the filesystem holding the unit.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
