use std::any::type_name;
use std::fs;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use shelf_broadcast::{
    BroadcastRegistry, CallbackSubscription, ChangeEvent, Member, TypedMember,
};
use shelf_engine::{Bucket, Engine, EngineError, EngineResult, MemoryEngine, RocksEngine};
use shelf_types::{BucketId, Record, TypeError};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::resolver::{schema_of, BucketResolver};

/// Typed document store: one bucket per record type, with change
/// notification on save.
///
/// Every operation resolves the bucket from the record type, so callers
/// never name buckets except to subscribe or drop them. Engine errors are
/// returned unchanged inside [`StoreError::Engine`].
pub struct Store {
    config: StoreConfig,
    resolver: BucketResolver,
    broadcast: BroadcastRegistry,
}

impl Store {
    /// Open a RocksDB-backed store rooted at `config.root`.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        if config.create_root {
            fs::create_dir_all(&config.root)?;
        }
        let engine = RocksEngine::new(config.sync).with_extension(config.extension.clone());
        info!(root = %config.root.display(), extension = %config.extension, "store opened");
        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// Store over an arbitrary engine.
    pub fn with_engine(config: StoreConfig, engine: Arc<dyn Engine>) -> Self {
        let resolver = BucketResolver::new(config.root.clone(), engine);
        let broadcast = BroadcastRegistry::new(config.channel_capacity);
        Self {
            config,
            resolver,
            broadcast,
        }
    }

    /// Store whose buckets live only in memory.
    pub fn in_memory() -> Self {
        Self::with_engine(StoreConfig::default(), Arc::new(MemoryEngine::new()))
    }

    /// Run broadcast tasks on `runtime` instead of the runtime current at
    /// construction.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.broadcast = BroadcastRegistry::with_handle(self.config.channel_capacity, runtime);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn resolver(&self) -> &BucketResolver {
        &self.resolver
    }

    pub fn broadcast(&self) -> &BroadcastRegistry {
        &self.broadcast
    }

    // ---- Routing ----

    /// Store `T` in bucket `name` instead of its default bucket.
    pub fn register<T: Record>(&self, name: &str) -> StoreResult<BucketId> {
        self.resolver.register::<T>(name)
    }

    /// The bucket `T` is stored in.
    pub fn bucket_id<T: Record>(&self) -> StoreResult<BucketId> {
        self.resolver.bucket_id::<T>()
    }

    // ---- Record operations ----

    /// Declare `T`'s identity field and indexes on its bucket. Idempotent.
    pub fn init<T: Record>(&self) -> StoreResult<()> {
        let schema = schema_of::<T>();
        let (bucket, ()) = self.on_bucket::<T, _>(|b| b.init(&schema))?;
        debug!(bucket = %bucket, "bucket initialized");
        Ok(())
    }

    /// Persist `record` and publish it to the bucket's subscribers.
    ///
    /// Nothing is published if the write fails. Subscribers receive a copy
    /// rebuilt from the serialized record.
    pub fn save<T: Record>(&self, record: &T) -> StoreResult<()> {
        let doc = to_document(record)?;
        let (bucket, ()) = self.on_bucket::<T, _>(|b| b.save(doc.clone()))?;
        debug!(bucket = %bucket, "record saved");
        self.notify(&bucket, record);
        Ok(())
    }

    /// The first record whose `field` equals `value`.
    pub fn get<T: Record>(&self, field: &str, value: impl Serialize) -> StoreResult<T> {
        let value = encode(value)?;
        let (_, doc) = self.on_bucket::<T, _>(|b| b.one(field, &value))?;
        decode(doc)
    }

    /// Every record whose `field` equals `value`.
    pub fn get_filter<T: Record>(&self, field: &str, value: impl Serialize) -> StoreResult<Vec<T>> {
        let value = encode(value)?;
        let (_, docs) = self.on_bucket::<T, _>(|b| b.find(field, &value))?;
        decode_all(docs)
    }

    /// Every record of type `T`.
    pub fn get_all<T: Record>(&self) -> StoreResult<Vec<T>> {
        let (_, docs) = self.on_bucket::<T, _>(|b| b.all())?;
        decode_all(docs)
    }

    /// Every record whose string `field` matches the regex `pattern`.
    pub fn get_regex<T: Record>(&self, field: &str, pattern: &str) -> StoreResult<Vec<T>> {
        let (_, docs) = self.on_bucket::<T, _>(|b| b.select_regex(field, pattern))?;
        decode_all(docs)
    }

    /// Delete the stored record with the same identity as `record`.
    pub fn remove<T: Record>(&self, record: &T) -> StoreResult<()> {
        let doc = to_document(record)?;
        let (bucket, ()) = self.on_bucket::<T, _>(|b| b.delete(&doc))?;
        debug!(bucket = %bucket, "record removed");
        Ok(())
    }

    /// Number of stored records of type `T`.
    pub fn count<T: Record>(&self) -> StoreResult<usize> {
        let (_, handle) = self.resolver.resolve::<T>()?;
        Ok(handle.len())
    }

    /// Reclaim space in `T`'s bucket.
    pub fn compact<T: Record>(&self) -> StoreResult<()> {
        self.on_bucket::<T, _>(|b| b.compact())?;
        Ok(())
    }

    /// Delete the bucket `name` from durable storage.
    ///
    /// The cached handle is closed and forgotten as well, so the next use
    /// of the type opens a fresh, empty bucket. Subscriptions are
    /// unaffected. Returns `true` if a stored unit existed.
    pub fn drop_bucket(&self, name: &str) -> StoreResult<bool> {
        let bucket = BucketId::new(name)?;
        self.resolver.drop_unit(&bucket)
    }

    /// Delete the bucket holding `T`.
    pub fn drop_type<T: Record>(&self) -> StoreResult<bool> {
        let bucket = self.resolver.bucket_id::<T>()?;
        self.resolver.drop_unit(&bucket)
    }

    // ---- Change notification ----

    /// Receive every record saved to bucket `name` from now on.
    pub fn subscribe(&self, name: &str) -> StoreResult<Member> {
        let bucket = BucketId::new(name)?;
        Ok(self.broadcast.subscribe(&bucket)?)
    }

    /// Receive every `T` saved from now on.
    pub fn subscribe_typed<T: Record>(&self) -> StoreResult<TypedMember<T>> {
        let bucket = self.resolver.bucket_id::<T>()?;
        Ok(self.broadcast.subscribe(&bucket)?.typed::<T>())
    }

    /// Run `callback` for every record saved to bucket `name` from now on.
    pub fn subscribe_with_callback<F>(&self, name: &str, callback: F) -> StoreResult<CallbackSubscription>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let bucket = BucketId::new(name)?;
        Ok(self.broadcast.subscribe_with_callback(&bucket, callback)?)
    }

    /// Stop every broadcast group after delivering what is already queued.
    pub async fn shutdown(&self) {
        self.broadcast.shutdown().await;
    }

    /// Run `op` on `T`'s bucket.
    ///
    /// A handle closed by a concurrent drop is replaced once, so the call
    /// lands either before the drop or on the fresh bucket after it.
    fn on_bucket<T, R>(&self, op: impl Fn(&dyn Bucket) -> EngineResult<R>) -> StoreResult<(BucketId, R)>
    where
        T: Record,
    {
        let (bucket, handle) = self.resolver.resolve::<T>()?;
        match op(handle.as_ref()) {
            Err(EngineError::Closed) => {
                debug!(bucket = %bucket, "bucket closed during call; reopening");
                self.resolver.forget(&bucket, &handle);
                let (bucket, handle) = self.resolver.resolve::<T>()?;
                Ok((bucket, op(handle.as_ref())?))
            }
            result => Ok((bucket, result?)),
        }
    }

    /// Publish a saved record if anyone watches its bucket.
    ///
    /// Only looks the group up; a save never creates one.
    fn notify<T: Record>(&self, bucket: &BucketId, record: &T) {
        if !self.broadcast.has_group(bucket) {
            return;
        }
        let copy = serde_json::to_value(record).and_then(serde_json::from_value::<T>);
        match copy {
            Ok(copy) => {
                self.broadcast
                    .publish(bucket, ChangeEvent::new(bucket.clone(), copy));
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "saved record could not be copied for subscribers");
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.config.root)
            .field("resolver", &self.resolver)
            .field("broadcast", &self.broadcast)
            .finish()
    }
}

fn encode(value: impl Serialize) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(StoreError::Encode)
}

fn to_document<T: Record>(record: &T) -> StoreResult<Value> {
    let doc = encode(record)?;
    if !doc.is_object() {
        return Err(TypeError::NotARecord(type_name::<T>().to_string()).into());
    }
    Ok(doc)
}

fn decode<T: Record>(doc: Value) -> StoreResult<T> {
    serde_json::from_value(doc).map_err(StoreError::Decode)
}

fn decode_all<T: Record>(docs: Vec<Value>) -> StoreResult<Vec<T>> {
    docs.into_iter().map(decode).collect()
}
