use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use shelf_types::BucketId;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BroadcastError, BroadcastResult};
use crate::event::ChangeEvent;
use crate::group::{BroadcastGroup, Member};

/// Default capacity of each group's fan-out channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Bucket -> broadcast group map.
///
/// Groups are created on the first [`subscribe`](BroadcastRegistry::subscribe)
/// for a bucket and live until [`close`](BroadcastRegistry::close) or
/// [`shutdown`](BroadcastRegistry::shutdown). The map lock is only held to
/// read or insert an entry, never while sending or joining.
pub struct BroadcastRegistry {
    groups: RwLock<HashMap<BucketId, Arc<BroadcastGroup>>>,
    capacity: usize,
    runtime: Option<Handle>,
}

impl BroadcastRegistry {
    /// Registry that runs groups on the current tokio runtime, if any.
    ///
    /// Without a runtime the registry still publishes (as a no-op) but
    /// subscribing fails with [`BroadcastError::NoRuntime`].
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Registry that runs groups on the given runtime.
    pub fn with_handle(capacity: usize, runtime: Handle) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity,
            runtime: Some(runtime),
        }
    }

    /// Join the group for `bucket`, creating and starting it if needed.
    pub fn subscribe(&self, bucket: &BucketId) -> BroadcastResult<Member> {
        let group = {
            let mut groups = self.groups.write().expect("registry lock poisoned");
            match groups.get(bucket) {
                Some(group) => Arc::clone(group),
                None => {
                    let runtime = self.runtime()?;
                    let group = Arc::new(BroadcastGroup::start(
                        bucket.clone(),
                        self.capacity,
                        &runtime,
                    ));
                    groups.insert(bucket.clone(), Arc::clone(&group));
                    info!(bucket = %bucket, "broadcast group created");
                    group
                }
            }
        };
        let member = group.join()?;
        debug!(bucket = %bucket, members = group.member_count(), "member joined");
        Ok(member)
    }

    /// Subscribe to `bucket` and run `callback` for every event.
    ///
    /// Each invocation runs on its own blocking task, so a slow callback
    /// never delays reading the next event; completion order across events
    /// is therefore not guaranteed. The listener runs until the group stops
    /// or [`CallbackSubscription::cancel`] is called. Dropping the returned
    /// handle leaves the listener running.
    pub fn subscribe_with_callback<F>(
        &self,
        bucket: &BucketId,
        callback: F,
    ) -> BroadcastResult<CallbackSubscription>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let runtime = self.runtime()?;
        let mut member = self.subscribe(bucket)?;
        let callback = Arc::new(callback);
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let label = bucket.clone();

        let task = runtime.spawn(async move {
            // A dropped handle closes the channel without cancelling.
            let mut cancellable = true;
            loop {
                tokio::select! {
                    signal = &mut cancelled, if cancellable => match signal {
                        Ok(()) => break,
                        Err(_) => cancellable = false,
                    },
                    event = member.recv() => match event {
                        Some(event) => {
                            let callback = Arc::clone(&callback);
                            tokio::task::spawn_blocking(move || callback(event));
                        }
                        None => break,
                    },
                }
            }
            debug!(bucket = %label, "callback listener finished");
        });

        Ok(CallbackSubscription {
            bucket: bucket.clone(),
            cancel: Some(cancel),
            task,
        })
    }

    /// Queue `event` for the members of `bucket`.
    ///
    /// Returns `false` without side effects when nobody has subscribed to
    /// the bucket; events are never kept for later subscribers.
    pub fn publish(&self, bucket: &BucketId, event: ChangeEvent) -> bool {
        let Some(group) = self.group(bucket) else {
            return false;
        };
        match group.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "publish to stopped group");
                false
            }
        }
    }

    /// The group for `bucket`, if one exists.
    pub fn group(&self, bucket: &BucketId) -> Option<Arc<BroadcastGroup>> {
        self.groups
            .read()
            .expect("registry lock poisoned")
            .get(bucket)
            .cloned()
    }

    /// Returns `true` if `bucket` has a group.
    pub fn has_group(&self, bucket: &BucketId) -> bool {
        self.groups
            .read()
            .expect("registry lock poisoned")
            .contains_key(bucket)
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.read().expect("registry lock poisoned").len()
    }

    /// Number of members joined to the group for `bucket`.
    pub fn member_count(&self, bucket: &BucketId) -> usize {
        self.group(bucket).map_or(0, |g| g.member_count())
    }

    /// Remove the group for `bucket`, deliver what it has queued, and wait
    /// for its distribution task. Returns `false` if there was no group.
    pub async fn close(&self, bucket: &BucketId) -> bool {
        let group = self
            .groups
            .write()
            .expect("registry lock poisoned")
            .remove(bucket);
        let Some(group) = group else {
            return false;
        };
        group.stop();
        group.stopped().await;
        info!(bucket = %bucket, "broadcast group closed");
        true
    }

    /// Stop every group and wait until each has drained.
    pub async fn shutdown(&self) {
        let groups: Vec<Arc<BroadcastGroup>> = self
            .groups
            .write()
            .expect("registry lock poisoned")
            .drain()
            .map(|(_, group)| group)
            .collect();

        for group in &groups {
            group.stop();
        }
        for group in &groups {
            group.stopped().await;
        }
        info!(groups = groups.len(), "broadcast registry shut down");
    }

    fn runtime(&self) -> BroadcastResult<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(BroadcastError::NoRuntime)
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for BroadcastRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRegistry")
            .field("groups", &self.group_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Handle to a callback listener started by
/// [`BroadcastRegistry::subscribe_with_callback`].
#[derive(Debug)]
pub struct CallbackSubscription {
    bucket: BucketId,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackSubscription {
    /// Bucket the listener is attached to.
    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    /// Returns `true` once the listener has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the listener and wait for it to exit. Callbacks already
    /// dispatched still run to completion.
    pub async fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(bucket = %self.bucket, error = %e, "callback listener ended abnormally");
        }
    }
}
