//! Descriptive metadata for members.
//!
//! A [`MetadataRegistry`] picks the most specific [`MetadataSource`] for a
//! member, and the source pushes `(label, value)` pairs into a
//! [`PropertyConsumer`]. Cheap properties are delivered synchronously; sources
//! built on [`ThreadedSource`] add expensive ones later from the background
//! worker of a [`MetadataEngine`].

mod engine;
mod sources;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::tree::{Member, MemberKind, TaskType};

pub use engine::{
    CancelToken, ChannelDelivery, Delivery, Direct, InlineScheduler, Job, MetadataCache,
    MetadataEngine, Scheduler, ThreadedMetadata, ThreadedSource, WorkerQueue,
};
pub use sources::{parse_locale, GenericSource, TaskSource, TextSource, TextStats};

/// Receiver of metadata properties for one request.
///
/// `add_property` may be called any number of times, base properties first.
/// `done_adding_properties` is called exactly once per request, possibly from
/// another thread and possibly after the consumer stopped being valid.
pub trait PropertyConsumer: Send + Sync {
    fn add_property(&self, label: &str, value: &str);

    /// Whether the requester still wants the result. Polled from the
    /// background worker before and after expensive work.
    fn is_valid(&self) -> bool {
        true
    }

    /// Optional checkpoint between groups of properties.
    fn done_adding_block(&self) {}

    fn done_adding_properties(&self);
}

/// A provider of metadata for some class of members.
pub trait MetadataSource: Send + Sync {
    /// Short identifier, used for logging and unregistering.
    fn name(&self) -> &str;

    fn applies_to(&self, member: &Member) -> bool;

    /// A more specific source to use for `member`, if this source has one.
    fn specific_instance_for(&self, _member: &Arc<Member>) -> Option<Arc<dyn MetadataSource>> {
        None
    }

    /// Human readable type of the member.
    fn description(&self, member: &Member) -> String {
        describe_kind(member)
    }

    /// Source-specific properties added after the base ones.
    fn fill_in_extra(&self, _member: &Member, _consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        Ok(())
    }

    /// Deliver every property for `member` and finish the request.
    fn fill_in_metadata(&self, member: &Arc<Member>, consumer: Arc<dyn PropertyConsumer>) {
        fill_in_base(self, member, consumer.as_ref());
        fill_in_extra_logged(self, member, consumer.as_ref());
        consumer.done_adding_properties();
    }
}

/// Add the properties every source reports: name, type, size, modification
/// time and the locale encoded in the file name.
pub fn fill_in_base<S: MetadataSource + ?Sized>(
    source: &S,
    member: &Member,
    consumer: &dyn PropertyConsumer,
) {
    consumer.add_property("Name", member.name());
    consumer.add_property("Type", &source.description(member));

    if let Ok(metadata) = std::fs::metadata(member.path()) {
        if metadata.is_file() {
            consumer.add_property("Size", &format_size(metadata.len()));
        }
        if let Ok(modified) = metadata.modified() {
            let local = chrono::DateTime::<Local>::from(modified);
            consumer.add_property("Modified", &local.format("%Y-%m-%d %H:%M:%S").to_string());
        }
    }

    let stem = member
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(locale) = parse_locale(&stem) {
        consumer.add_property("Locale", &locale);
    }
    consumer.done_adding_block();
}

/// Run `fill_in_extra`, logging instead of propagating a failure.
pub(crate) fn fill_in_extra_logged<S: MetadataSource + ?Sized>(
    source: &S,
    member: &Member,
    consumer: &dyn PropertyConsumer,
) {
    if let Err(e) = source.fill_in_extra(member, consumer) {
        tracing::warn!(
            "Metadata source '{}' failed for {}: {:#}",
            source.name(),
            member.path().display(),
            e
        );
    }
}

pub(crate) fn describe_kind(member: &Member) -> String {
    match member.kind() {
        MemberKind::Task(TaskType::Project) => "Project".to_string(),
        MemberKind::Task(TaskType::TaskGroup) => "Task Group".to_string(),
        MemberKind::Task(TaskType::Task(tag)) => format!("Task ({})", tag),
        MemberKind::Folder => "Folder".to_string(),
        MemberKind::File => match member.extension() {
            Some(ext) => format!("{} file", ext.to_uppercase()),
            None => "File".to_string(),
        },
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Picks the source for a member.
///
/// Sources registered later are more specific and are tried first; the
/// generic source answers for anything nobody else claims.
pub struct MetadataRegistry {
    sources: RwLock<Vec<Arc<dyn MetadataSource>>>,
    fallback: Arc<dyn MetadataSource>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            fallback: Arc::new(GenericSource),
        }
    }

    /// A registry with the built-in task and text sources.
    pub fn with_defaults(engine: &MetadataEngine) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TaskSource));
        registry.register(Arc::new(ThreadedSource::new(TextSource, engine.clone())));
        registry
    }

    pub fn register(&self, source: Arc<dyn MetadataSource>) {
        self.sources
            .write()
            .expect("metadata registry lock poisoned")
            .push(source);
    }

    /// Remove every source with the given name. Returns whether any was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut sources = self
            .sources
            .write()
            .expect("metadata registry lock poisoned");
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        sources.len() != before
    }

    pub fn source_for(&self, member: &Arc<Member>) -> Arc<dyn MetadataSource> {
        let source = self
            .sources
            .read()
            .expect("metadata registry lock poisoned")
            .iter()
            .rev()
            .find(|s| s.applies_to(member))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback));
        source.specific_instance_for(member).unwrap_or(source)
    }

    pub fn fill_in_metadata(&self, member: &Arc<Member>, consumer: Arc<dyn PropertyConsumer>) {
        self.source_for(member).fill_in_metadata(member, consumer);
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer that records everything it is given.
///
/// Validity is controlled through its [`CancelToken`]; callers can block on
/// [`CollectingConsumer::wait_done`] until the request has finished.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    properties: Mutex<Vec<(String, String)>>,
    blocks: AtomicUsize,
    done: Mutex<usize>,
    done_signal: Condvar,
    token: CancelToken,
}

impl CollectingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_token(token: CancelToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            ..Self::default()
        })
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn properties(&self) -> Vec<(String, String)> {
        self.properties
            .lock()
            .expect("consumer lock poisoned")
            .clone()
    }

    pub fn get(&self, label: &str) -> Option<String> {
        self.properties
            .lock()
            .expect("consumer lock poisoned")
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.clone())
    }

    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::SeqCst)
    }

    /// How many times the request was finished. Should never exceed one.
    pub fn done_count(&self) -> usize {
        *self.done.lock().expect("consumer lock poisoned")
    }

    /// Block until the request finishes or `timeout` passes.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().expect("consumer lock poisoned");
        while *done == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = self
                .done_signal
                .wait_timeout(done, deadline - now)
                .expect("consumer lock poisoned")
                .0;
        }
        true
    }
}

impl PropertyConsumer for CollectingConsumer {
    fn add_property(&self, label: &str, value: &str) {
        self.properties
            .lock()
            .expect("consumer lock poisoned")
            .push((label.to_string(), value.to_string()));
    }

    fn is_valid(&self) -> bool {
        !self.token.is_cancelled()
    }

    fn done_adding_block(&self) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
    }

    fn done_adding_properties(&self) {
        *self.done.lock().expect("consumer lock poisoned") += 1;
        self.done_signal.notify_all();
    }
}
