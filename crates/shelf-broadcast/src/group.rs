use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use shelf_types::BucketId;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{BroadcastError, BroadcastResult};
use crate::event::ChangeEvent;

/// Fan-out channel for one bucket: one input queue, many members.
///
/// Publishers hand events to an unbounded queue and return immediately. A
/// distribution task pops the queue and forwards each event into a bounded
/// broadcast channel, so every member sees every event in the same order.
/// A member that falls more than the channel capacity behind loses the
/// oldest events it has not read yet.
///
/// [`BroadcastGroup::stop`] closes the input queue. The distribution task
/// then forwards whatever is still queued and exits; members drain their
/// backlog and then observe the end of the stream.
pub struct BroadcastGroup {
    bucket: BucketId,
    input: Mutex<Option<mpsc::UnboundedSender<ChangeEvent>>>,
    fanout: Mutex<Option<broadcast::Sender<ChangeEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    published: Arc<AtomicU64>,
}

impl BroadcastGroup {
    /// Create the group and spawn its distribution task on `runtime`.
    pub fn start(bucket: BucketId, capacity: usize, runtime: &Handle) -> Self {
        let (input, queue) = mpsc::unbounded_channel();
        let (fanout, _) = broadcast::channel(capacity.max(1));
        let published = Arc::new(AtomicU64::new(0));

        let task = runtime.spawn(distribute(
            bucket.clone(),
            queue,
            fanout.clone(),
            Arc::clone(&published),
        ));
        debug!(bucket = %bucket, capacity, "broadcast group started");

        Self {
            bucket,
            input: Mutex::new(Some(input)),
            fanout: Mutex::new(Some(fanout)),
            task: Mutex::new(Some(task)),
            published,
        }
    }

    /// Bucket this group belongs to.
    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    /// Add a member. It receives events published from now on, never
    /// earlier ones.
    pub fn join(&self) -> BroadcastResult<Member> {
        let fanout = self.fanout.lock().expect("group lock poisoned");
        let sender = fanout
            .as_ref()
            .ok_or_else(|| BroadcastError::Stopped(self.bucket.clone()))?;
        Ok(Member::new(self.bucket.clone(), sender.subscribe()))
    }

    /// Queue `event` for distribution. Never blocks.
    pub fn send(&self, event: ChangeEvent) -> BroadcastResult<()> {
        let input = self.input.lock().expect("group lock poisoned");
        input
            .as_ref()
            .and_then(|tx| tx.send(event).ok())
            .ok_or_else(|| BroadcastError::Stopped(self.bucket.clone()))
    }

    /// Close the input queue. Already queued events are still delivered.
    pub fn stop(&self) {
        let input = self.input.lock().expect("group lock poisoned").take();
        let fanout = self.fanout.lock().expect("group lock poisoned").take();
        if input.is_some() || fanout.is_some() {
            debug!(bucket = %self.bucket, "broadcast group stopping");
        }
    }

    /// Wait for the distribution task to finish draining after [`stop`].
    ///
    /// [`stop`]: BroadcastGroup::stop
    pub async fn stopped(&self) {
        let task = self.task.lock().expect("group lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(bucket = %self.bucket, error = %e, "distribution task ended abnormally");
            }
        }
    }

    /// Returns `true` until [`BroadcastGroup::stop`] is called.
    pub fn is_running(&self) -> bool {
        self.input.lock().expect("group lock poisoned").is_some()
    }

    /// Number of members currently joined.
    pub fn member_count(&self) -> usize {
        self.fanout
            .lock()
            .expect("group lock poisoned")
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of events the distribution task has forwarded.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BroadcastGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastGroup")
            .field("bucket", &self.bucket)
            .field("running", &self.is_running())
            .field("members", &self.member_count())
            .field("published", &self.published())
            .finish()
    }
}

/// Distribution loop: runs until the input queue is closed and empty.
async fn distribute(
    bucket: BucketId,
    mut queue: mpsc::UnboundedReceiver<ChangeEvent>,
    fanout: broadcast::Sender<ChangeEvent>,
    published: Arc<AtomicU64>,
) {
    while let Some(event) = queue.recv().await {
        // An error only means nobody is listening right now.
        let delivered = fanout.send(event).unwrap_or(0);
        published.fetch_add(1, Ordering::Relaxed);
        trace!(bucket = %bucket, delivered, "event distributed");
    }
    debug!(bucket = %bucket, "distribution loop drained");
}

/// A subscriber's receive handle into a [`BroadcastGroup`].
#[derive(Debug)]
pub struct Member {
    bucket: BucketId,
    rx: broadcast::Receiver<ChangeEvent>,
    missed: u64,
}

impl Member {
    fn new(bucket: BucketId, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            bucket,
            rx,
            missed: 0,
        }
    }

    /// Bucket this member listens to.
    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    /// Wait for the next event. Returns `None` once the group has stopped
    /// and every remaining event was read.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already available.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Blocking variant of [`Member::recv`] for threads outside the runtime.
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.blocking_recv() {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events this member lost by falling behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// View this member's events as values of type `T`.
    pub fn typed<T: Any + Send + Sync>(self) -> TypedMember<T> {
        TypedMember {
            inner: self,
            _marker: PhantomData,
        }
    }

    fn record_lag(&mut self, n: u64) {
        self.missed += n;
        warn!(bucket = %self.bucket, skipped = n, "member lagging; events dropped");
    }
}

/// A [`Member`] that yields payloads of one concrete type.
///
/// Events carrying any other payload type are skipped.
#[derive(Debug)]
pub struct TypedMember<T> {
    inner: Member,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TypedMember<T> {
    /// Wait for the next `T`. `None` once the group has stopped and drained.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        loop {
            let event = self.inner.recv().await?;
            if let Some(value) = self.accept(event) {
                return Some(value);
            }
        }
    }

    /// Next `T` if one is already available.
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        loop {
            let event = self.inner.try_recv()?;
            if let Some(value) = self.accept(event) {
                return Some(value);
            }
        }
    }

    /// The untyped member underneath.
    pub fn into_inner(self) -> Member {
        self.inner
    }

    fn accept(&self, event: ChangeEvent) -> Option<Arc<T>> {
        let value = event.downcast::<T>();
        if value.is_none() {
            debug!(
                bucket = %self.inner.bucket,
                payload = event.payload_type_name(),
                "skipping event of another type"
            );
        }
        value
    }
}
