//! Background computation of expensive metadata.
//!
//! All threaded work goes through one [`Scheduler`]. The production
//! scheduler is a [`WorkerQueue`]: a single named thread draining a FIFO
//! channel, so jobs run one at a time in submission order. Results travel
//! back through a [`Delivery`], which the composing application chooses
//! (for example a [`ChannelDelivery`] drained by its interactive thread).

use std::collections::HashMap;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use super::{describe_kind, fill_in_base, fill_in_extra_logged, MetadataSource, PropertyConsumer};
use crate::config::TreeConfig;
use crate::tree::Member;

/// A unit of work for a [`Scheduler`] or [`Delivery`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs metadata jobs.
pub trait Scheduler: Send + Sync {
    /// Queue `job`. A scheduler that can no longer run jobs hands it back.
    fn submit(&self, job: Job) -> Result<(), Job>;
}

/// Runs each job immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn submit(&self, job: Job) -> Result<(), Job> {
        job();
        Ok(())
    }
}

/// A single background thread executing jobs strictly in FIFO order.
///
/// A panicking job is logged and the worker moves on to the next one.
/// Dropping the queue lets queued jobs finish, then joins the thread.
pub struct WorkerQueue {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerQueue {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        tracing::warn!("Metadata job panicked: {}", panic_message(panic.as_ref()));
                    }
                }
                tracing::debug!("Metadata worker stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting jobs, finish the queued ones and join the thread.
    pub fn shutdown(&self) {
        self.sender.lock().expect("worker lock poisoned").take();
        if let Some(handle) = self.handle.lock().expect("worker lock poisoned").take() {
            if handle.join().is_err() {
                tracing::warn!("Metadata worker panicked");
            }
        }
    }
}

impl Scheduler for WorkerQueue {
    fn submit(&self, job: Job) -> Result<(), Job> {
        let sender = self.sender.lock().expect("worker lock poisoned");
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|rejected| {
                tracing::warn!("Metadata worker is gone; rejecting job");
                rejected.0
            }),
            None => {
                tracing::warn!("Metadata worker is shut down; rejecting job");
                Err(job)
            }
        }
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hands finished results to whoever shows them.
pub trait Delivery: Send + Sync {
    fn deliver(&self, job: Job);
}

/// Delivers on whatever thread produced the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Delivery for Direct {
    fn deliver(&self, job: Job) {
        job();
    }
}

/// Queues results for the interactive thread, which runs them with
/// [`ChannelDelivery::pump`].
pub struct ChannelDelivery {
    sender: Mutex<Sender<Job>>,
    receiver: Mutex<Receiver<Job>>,
}

impl ChannelDelivery {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    /// Run every queued delivery. Returns how many ran.
    pub fn pump(&self) -> usize {
        let receiver = self.receiver.lock().expect("delivery lock poisoned");
        let mut ran = 0;
        while let Ok(job) = receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one delivery and run it.
    pub fn pump_one(&self, timeout: Duration) -> bool {
        let receiver = self.receiver.lock().expect("delivery lock poisoned");
        match receiver.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for ChannelDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl Delivery for ChannelDelivery {
    fn deliver(&self, job: Job) {
        let sender = self.sender.lock().expect("delivery lock poisoned");
        if sender.send(job).is_err() {
            tracing::warn!("Delivery channel closed; dropping result");
        }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct CacheEntry<P> {
    modified: Option<SystemTime>,
    payload: Arc<P>,
}

/// Computed payloads keyed by member identity.
///
/// An entry is only returned while the member's modification time matches
/// the one recorded with it, so edited files are recomputed. Payloads are
/// never mutated after insertion.
#[derive(Debug)]
pub struct MetadataCache<P> {
    entries: RwLock<HashMap<Uuid, CacheEntry<P>>>,
}

impl<P> MetadataCache<P> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, member: &Member) -> Option<Arc<P>> {
        let entries = self.entries.read().expect("metadata cache lock poisoned");
        let entry = entries.get(&member.id())?;
        (entry.modified == member.modified()).then(|| Arc::clone(&entry.payload))
    }

    /// Store `payload` for `member` as computed from the file state at
    /// `modified`, read before the computation started.
    pub fn insert(&self, member: &Member, modified: Option<SystemTime>, payload: Arc<P>) {
        self.entries
            .write()
            .expect("metadata cache lock poisoned")
            .insert(member.id(), CacheEntry { modified, payload });
    }

    pub fn invalidate(&self, id: Uuid) -> bool {
        self.entries
            .write()
            .expect("metadata cache lock poisoned")
            .remove(&id)
            .is_some()
    }

    pub fn reset(&self) {
        self.entries
            .write()
            .expect("metadata cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("metadata cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> Default for MetadataCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where threaded sources send their work and their results.
#[derive(Clone)]
pub struct MetadataEngine {
    scheduler: Arc<dyn Scheduler>,
    delivery: Arc<dyn Delivery>,
    debounce: Duration,
}

impl MetadataEngine {
    pub fn new(scheduler: Arc<dyn Scheduler>, delivery: Arc<dyn Delivery>, debounce: Duration) -> Self {
        Self {
            scheduler,
            delivery,
            debounce,
        }
    }

    /// An engine with its own worker thread and the configured debounce.
    pub fn spawn(config: &TreeConfig, delivery: Arc<dyn Delivery>) -> io::Result<Self> {
        let worker = WorkerQueue::spawn("metadata-worker")?;
        Ok(Self::new(Arc::new(worker), delivery, config.debounce()))
    }

    /// Everything on the calling thread, no debounce.
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineScheduler), Arc::new(Direct), Duration::ZERO)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// The expensive half of a threaded source.
pub trait ThreadedMetadata: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    fn name(&self) -> &str;

    fn applies_to(&self, member: &Member) -> bool;

    fn description(&self, member: &Member) -> String {
        describe_kind(member)
    }

    /// Cheap properties delivered with the base ones.
    fn fill_in_fast(&self, _member: &Member, _consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs on the worker. Only called when no valid cached payload exists.
    fn compute(&self, member: &Member) -> anyhow::Result<Self::Payload>;

    /// Turn a payload into properties.
    fn deliver(&self, payload: &Self::Payload, consumer: &dyn PropertyConsumer);
}

/// A [`MetadataSource`] that adds the result of a [`ThreadedMetadata`]
/// computation after the fast properties.
///
/// Per request: fast properties go out immediately; then a job on the
/// engine's scheduler sleeps for the debounce interval, gives up if the
/// consumer is no longer valid, reuses or computes the payload, checks
/// validity again and finally delivers the payload and the end of the
/// request through the engine's delivery. The end of the request is
/// delivered exactly once on every path.
pub struct ThreadedSource<T: ThreadedMetadata> {
    inner: Arc<T>,
    cache: Arc<MetadataCache<T::Payload>>,
    engine: MetadataEngine,
}

impl<T: ThreadedMetadata> ThreadedSource<T> {
    pub fn new(inner: T, engine: MetadataEngine) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: Arc::new(MetadataCache::new()),
            engine,
        }
    }

    pub fn cache(&self) -> &MetadataCache<T::Payload> {
        &self.cache
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: ThreadedMetadata> MetadataSource for ThreadedSource<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn applies_to(&self, member: &Member) -> bool {
        self.inner.applies_to(member)
    }

    fn description(&self, member: &Member) -> String {
        self.inner.description(member)
    }

    fn fill_in_extra(&self, member: &Member, consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        self.inner.fill_in_fast(member, consumer)
    }

    fn fill_in_metadata(&self, member: &Arc<Member>, consumer: Arc<dyn PropertyConsumer>) {
        fill_in_base(self, member, consumer.as_ref());
        fill_in_extra_logged(self, member, consumer.as_ref());

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let delivery = Arc::clone(&self.engine.delivery);
        let debounce = self.engine.debounce;
        let member = Arc::clone(member);
        let rejected_consumer = Arc::clone(&consumer);

        let job: Job = Box::new(move || {
            if !debounce.is_zero() {
                thread::sleep(debounce);
            }
            if !consumer.is_valid() {
                tracing::debug!("Abandoned metadata for {}", member.path().display());
                finish(delivery.as_ref(), consumer);
                return;
            }

            let payload = match cache.get(&member) {
                Some(payload) => payload,
                None => {
                    let modified = member.modified();
                    match compute_caught(inner.as_ref(), &member) {
                        Ok(payload) => {
                            let payload = Arc::new(payload);
                            cache.insert(&member, modified, Arc::clone(&payload));
                            payload
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Metadata source '{}' failed for {}: {:#}",
                                inner.name(),
                                member.path().display(),
                                e
                            );
                            finish(delivery.as_ref(), consumer);
                            return;
                        }
                    }
                }
            };

            if !consumer.is_valid() {
                finish(delivery.as_ref(), consumer);
                return;
            }

            delivery.deliver(Box::new(move || {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                    inner.deliver(&payload, consumer.as_ref())
                }));
                if let Err(panic) = delivered {
                    tracing::warn!(
                        "Metadata source '{}' panicked while delivering: {}",
                        inner.name(),
                        panic_message(panic.as_ref())
                    );
                }
                consumer.done_adding_properties();
            }));
        });

        if let Err(job) = self.engine.scheduler.submit(job) {
            drop(job);
            finish(self.engine.delivery.as_ref(), rejected_consumer);
        }
    }
}

/// Run `compute`, turning a panic into an error.
fn compute_caught<T: ThreadedMetadata>(inner: &T, member: &Member) -> anyhow::Result<T::Payload> {
    match panic::catch_unwind(AssertUnwindSafe(|| inner.compute(member))) {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn finish(delivery: &dyn Delivery, consumer: Arc<dyn PropertyConsumer>) {
    delivery.deliver(Box::new(move || consumer.done_adding_properties()));
}
