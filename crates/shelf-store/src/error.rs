use std::path::PathBuf;

use shelf_broadcast::BroadcastError;
use shelf_engine::EngineError;
use shelf_types::{BucketId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Failure reported by the bucket engine, passed through unchanged.
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("failed to open bucket {bucket} at {}: {source}", path.display())]
    Open {
        bucket: BucketId,
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("bucket {bucket} is already bound to {existing}, cannot bind {requested}")]
    BucketConflict {
        bucket: BucketId,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("type {type_name} is already stored in bucket {bucket}")]
    AlreadyBound {
        type_name: &'static str,
        bucket: BucketId,
    },

    /// A record or query value could not be converted to a document.
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored document does not fit the requested record type.
    #[error("failed to decode stored record: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if the engine found no matching record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Engine(EngineError::NotFound))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
