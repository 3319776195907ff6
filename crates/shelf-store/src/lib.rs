//! Typed document store with per-type buckets and change notification.
//!
//! Each record type is stored in its own bucket (a RocksDB database by
//! default), opened lazily the first time the type is used and cached for
//! the life of the [`Store`]. Saving a record also publishes it to anyone
//! subscribed to that bucket.
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use shelf_store::{Record, Store, StoreConfig};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl Record for User {
//!     fn indexes() -> &'static [&'static str] {
//!         &["name"]
//!     }
//! }
//!
//! # async fn run() -> shelf_store::StoreResult<()> {
//! let store = Store::open(StoreConfig::new("/var/lib/app"))?;
//! let mut changes = store.subscribe_typed::<User>()?;
//!
//! store.save(&User { id: 1, name: "alice".into() })?;
//! let alice: User = store.get("name", "alice")?;
//! assert_eq!(*changes.recv().await.unwrap(), alice);
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`BucketResolver`] -- type -> bucket routing and the open-handle cache
//! - [`Store`] -- CRUD facade; publishes successful saves
//! - [`shelf_broadcast::BroadcastRegistry`] -- bucket -> broadcast group map

pub mod config;
pub mod error;
pub mod resolver;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use resolver::{schema_of, BucketResolver};
pub use store::Store;

// Re-export key types
pub use shelf_broadcast::{CallbackSubscription, ChangeEvent, Member, TypedMember};
pub use shelf_engine::{
    Bucket, BucketSchema, Engine, EngineError, EngineResult, MemoryEngine, RocksEngine, SyncMode,
};
pub use shelf_types::{BucketId, Record};
