//! Type -> bucket routing and the open-handle cache.
//!
//! Two independent critical sections live here: the type table (which
//! bucket a type is stored in) and the handle cache (which buckets are
//! open). They are never held at the same time.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use shelf_engine::{bucket_path, Bucket, BucketSchema, Engine};
use shelf_types::{BucketId, Record};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Schema declared by `T`: identity field plus indexes.
pub fn schema_of<T: Record>() -> BucketSchema {
    BucketSchema::new(T::ID_FIELD)
        .with_indexes(T::indexes().iter().copied())
        .with_unique(T::unique().iter().copied())
}

#[derive(Default)]
struct TypeTable {
    buckets: HashMap<TypeId, BucketId>,
    owners: HashMap<BucketId, (TypeId, &'static str)>,
}

impl TypeTable {
    fn bind<T: Record>(&mut self, bucket: BucketId) -> StoreResult<BucketId> {
        let type_id = TypeId::of::<T>();
        if let Some(bound) = self.buckets.get(&type_id) {
            if *bound == bucket {
                return Ok(bucket);
            }
            return Err(StoreError::AlreadyBound {
                type_name: type_name::<T>(),
                bucket: bound.clone(),
            });
        }
        if let Some((owner, owner_name)) = self.owners.get(&bucket) {
            if *owner != type_id {
                return Err(StoreError::BucketConflict {
                    bucket,
                    existing: *owner_name,
                    requested: type_name::<T>(),
                });
            }
        }
        self.buckets.insert(type_id, bucket.clone());
        self.owners
            .insert(bucket.clone(), (type_id, type_name::<T>()));
        Ok(bucket)
    }
}

/// Maps record types to buckets and caches the open bucket handles.
///
/// A type's bucket is its explicitly registered name if there is one,
/// otherwise [`Record::bucket_name`]. The first use binds the name to the
/// type; a second type claiming the same name is rejected instead of
/// silently sharing storage.
pub struct BucketResolver {
    root: PathBuf,
    engine: Arc<dyn Engine>,
    types: RwLock<TypeTable>,
    handles: Mutex<HashMap<BucketId, Arc<dyn Bucket>>>,
}

impl BucketResolver {
    /// Resolver opening buckets under `root` through `engine`.
    pub fn new(root: impl Into<PathBuf>, engine: Arc<dyn Engine>) -> Self {
        Self {
            root: root.into(),
            engine,
            types: RwLock::new(TypeTable::default()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Store `T` in the bucket `name` instead of its default bucket.
    ///
    /// Must happen before `T` is first used.
    pub fn register<T: Record>(&self, name: &str) -> StoreResult<BucketId> {
        let bucket = BucketId::new(name)?;
        let bucket = self
            .types
            .write()
            .expect("type table lock poisoned")
            .bind::<T>(bucket)?;
        debug!(bucket = %bucket, type_name = type_name::<T>(), "type registered");
        Ok(bucket)
    }

    /// The bucket `T` is stored in, binding its default name on first use.
    pub fn bucket_id<T: Record>(&self) -> StoreResult<BucketId> {
        if let Some(bucket) = self
            .types
            .read()
            .expect("type table lock poisoned")
            .buckets
            .get(&TypeId::of::<T>())
        {
            return Ok(bucket.clone());
        }

        let bucket = BucketId::new(T::bucket_name())?;
        self.types
            .write()
            .expect("type table lock poisoned")
            .bind::<T>(bucket)
    }

    /// Bucket id and open handle for `T`.
    ///
    /// A cached handle is returned as is. Otherwise the bucket is opened,
    /// given `T`'s schema and cached; the cache lock is held throughout so
    /// each bucket is opened once. A failed open caches nothing.
    pub fn resolve<T: Record>(&self) -> StoreResult<(BucketId, Arc<dyn Bucket>)> {
        let bucket = self.bucket_id::<T>()?;
        let handle = self.open(&bucket, &schema_of::<T>())?;
        Ok((bucket, handle))
    }

    fn open(&self, bucket: &BucketId, schema: &BucketSchema) -> StoreResult<Arc<dyn Bucket>> {
        let mut handles = self.handles.lock().expect("handle cache lock poisoned");
        if let Some(handle) = handles.get(bucket) {
            return Ok(Arc::clone(handle));
        }

        let path = self.path_of(bucket);
        let opened = self
            .engine
            .open(&path)
            .and_then(|handle| handle.init(schema).map(|()| handle));
        let handle = match opened {
            Ok(handle) => handle,
            Err(source) => {
                warn!(bucket = %bucket, path = %path.display(), error = %source, "bucket open failed");
                return Err(StoreError::Open {
                    bucket: bucket.clone(),
                    path,
                    source,
                });
            }
        };

        handles.insert(bucket.clone(), Arc::clone(&handle));
        info!(bucket = %bucket, path = %path.display(), records = handle.len(), "bucket opened");
        Ok(handle)
    }

    /// Close and forget the cached handle for `bucket`. Returns `false` if
    /// none was cached.
    pub fn evict(&self, bucket: &BucketId) -> bool {
        let handle = self
            .handles
            .lock()
            .expect("handle cache lock poisoned")
            .remove(bucket);
        match handle {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Forget `handle` if it is still the cached handle for `bucket`.
    pub fn forget(&self, bucket: &BucketId, handle: &Arc<dyn Bucket>) {
        let mut handles = self.handles.lock().expect("handle cache lock poisoned");
        if handles
            .get(bucket)
            .is_some_and(|cached| Arc::ptr_eq(cached, handle))
        {
            handles.remove(bucket);
        }
    }

    /// Close the cached handle for `bucket` and destroy its unit.
    ///
    /// The cache lock is held throughout, so no caller can reopen the old
    /// unit before it is gone. Returns `true` if a unit existed.
    pub fn drop_unit(&self, bucket: &BucketId) -> StoreResult<bool> {
        let mut handles = self.handles.lock().expect("handle cache lock poisoned");
        if let Some(handle) = handles.remove(bucket) {
            handle.close();
        }
        let path = self.path_of(bucket);
        let existed = self.engine.destroy(&path)?;
        info!(bucket = %bucket, path = %path.display(), existed, "bucket dropped");
        Ok(existed)
    }

    /// Returns `true` if `bucket` has an open cached handle.
    pub fn is_cached(&self, bucket: &BucketId) -> bool {
        self.handles
            .lock()
            .expect("handle cache lock poisoned")
            .contains_key(bucket)
    }

    /// Number of open cached handles.
    pub fn cached_count(&self) -> usize {
        self.handles.lock().expect("handle cache lock poisoned").len()
    }

    /// Location of the unit backing `bucket`.
    pub fn path_of(&self, bucket: &BucketId) -> PathBuf {
        bucket_path(&self.root, bucket.as_str(), self.engine.extension())
    }

    /// Directory holding the bucket units.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The engine buckets are opened through.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }
}

impl std::fmt::Debug for BucketResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketResolver")
            .field("root", &self.root)
            .field("cached", &self.cached_count())
            .finish()
    }
}
