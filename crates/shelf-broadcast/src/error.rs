use shelf_types::BucketId;

/// Errors produced by the broadcast layer.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// A group had to be started but no tokio runtime is available.
    #[error("no tokio runtime available to run the distribution task")]
    NoRuntime,

    /// The group for this bucket has been stopped.
    #[error("broadcast group for bucket {0} is stopped")]
    Stopped(BucketId),
}

/// Convenience alias used throughout the broadcast crate.
pub type BroadcastResult<T> = std::result::Result<T, BroadcastError>;
