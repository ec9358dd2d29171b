use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use project_tree::config::TreeConfig;
use project_tree::metadata::{
    CancelToken, ChannelDelivery, CollectingConsumer, Direct, MetadataEngine, MetadataRegistry,
    MetadataSource, PropertyConsumer, ThreadedMetadata, ThreadedSource, WorkerQueue,
};
use project_tree::tree::{Member, Project, Task, TaskType};
use speculate2::speculate;
use tempfile::TempDir;

/// Counts how often the expensive half actually runs.
struct CountingMetadata {
    computed: Arc<AtomicUsize>,
    fail: bool,
}

impl ThreadedMetadata for CountingMetadata {
    type Payload = u64;

    fn name(&self) -> &str {
        "counting"
    }

    fn applies_to(&self, member: &Member) -> bool {
        !member.is_folder()
    }

    fn fill_in_fast(&self, _member: &Member, consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        consumer.add_property("Fast", "yes");
        Ok(())
    }

    fn compute(&self, member: &Member) -> anyhow::Result<u64> {
        self.computed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("cannot measure {}", member.name());
        }
        Ok(fs::metadata(member.path())?.len())
    }

    fn deliver(&self, payload: &u64, consumer: &dyn PropertyConsumer) {
        consumer.add_property("Measured", &payload.to_string());
    }
}

/// Blows up instead of measuring.
struct PanickingMetadata;

impl ThreadedMetadata for PanickingMetadata {
    type Payload = ();

    fn name(&self) -> &str {
        "panicking"
    }

    fn applies_to(&self, _member: &Member) -> bool {
        true
    }

    fn compute(&self, member: &Member) -> anyhow::Result<()> {
        panic!("decoder crashed on {}", member.name());
    }

    fn deliver(&self, _payload: &(), _consumer: &dyn PropertyConsumer) {}
}

struct BrokenSource;

impl MetadataSource for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    fn applies_to(&self, member: &Member) -> bool {
        member.name().ends_with(".bin")
    }

    fn fill_in_extra(&self, _member: &Member, consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        consumer.add_property("Partial", "1");
        anyhow::bail!("corrupt header")
    }
}

/// Claims every file, but hands `.special` files to a dedicated source.
struct DelegatingSource;

impl MetadataSource for DelegatingSource {
    fn name(&self) -> &str {
        "delegating"
    }

    fn applies_to(&self, member: &Member) -> bool {
        !member.is_folder()
    }

    fn specific_instance_for(&self, member: &Arc<Member>) -> Option<Arc<dyn MetadataSource>> {
        (member.extension().as_deref() == Some("special")).then(|| Arc::new(SpecialSource) as Arc<dyn MetadataSource>)
    }
}

struct SpecialSource;

impl MetadataSource for SpecialSource {
    fn name(&self) -> &str {
        "special"
    }

    fn applies_to(&self, _member: &Member) -> bool {
        true
    }
}

fn create_test_project(dir: &TempDir) -> (Project, PathBuf) {
    let root = dir.path().join("P");
    Task::create(&root, TaskType::Project).expect("Failed to create project");
    Task::create(&root.join("T"), TaskType::task()).expect("Failed to create task");
    fs::write(root.join("T/a.txt"), "one two\nthree\n").expect("Failed to write file");
    fs::write(root.join("blob.bin"), [0u8; 16]).expect("Failed to write file");
    fs::write(root.join("strings_fr_FR.properties"), "k=v\n").expect("Failed to write file");
    fs::write(root.join("odd.special"), "").expect("Failed to write file");
    let project = Project::open(&root).expect("Failed to open project");
    (project, root)
}

fn counting(fail: bool) -> (CountingMetadata, Arc<AtomicUsize>) {
    let computed = Arc::new(AtomicUsize::new(0));
    let metadata = CountingMetadata {
        computed: Arc::clone(&computed),
        fail,
    };
    (metadata, computed)
}

fn labels(consumer: &CollectingConsumer) -> Vec<String> {
    consumer.properties().into_iter().map(|(label, _)| label).collect()
}

speculate! {
    before {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let (project, root) = create_test_project(&dir);
        let file = project.find_member(root.join("T/a.txt")).expect("a.txt not found");
    }

    describe "registry" {
        it "falls back to the generic source" {
            let registry = MetadataRegistry::new();
            let source = registry.source_for(&file);
            assert_eq!(source.name(), "generic");

            let consumer = CollectingConsumer::new();
            registry.fill_in_metadata(&file, consumer.clone());
            assert_eq!(consumer.get("Name").as_deref(), Some("a.txt"));
            assert_eq!(consumer.get("Size").as_deref(), Some("14 bytes"));
            assert!(consumer.get("Modified").is_some());
            assert_eq!(consumer.done_count(), 1);
        }

        it "prefers the most recently registered source" {
            let registry = MetadataRegistry::new();
            registry.register(Arc::new(BrokenSource));
            registry.register(Arc::new(DelegatingSource));
            let blob = project.find_member(root.join("blob.bin")).expect("blob not found");
            assert_eq!(registry.source_for(&blob).name(), "delegating");

            assert!(registry.unregister("delegating"));
            assert!(!registry.unregister("delegating"));
            assert_eq!(registry.source_for(&blob).name(), "broken");
        }

        it "uses the specific instance a source offers" {
            let registry = MetadataRegistry::new();
            registry.register(Arc::new(DelegatingSource));
            let odd = project.find_member(root.join("odd.special")).expect("odd not found");
            assert_eq!(registry.source_for(&odd).name(), "special");
            assert_eq!(registry.source_for(&file).name(), "delegating");
        }

        it "describes tasks with the task source" {
            let registry = MetadataRegistry::with_defaults(&MetadataEngine::inline());
            let task = project.find_member(root.join("T")).expect("task not found");
            task.synchronize().expect("sync failed");

            let consumer = CollectingConsumer::new();
            registry.fill_in_metadata(&task, consumer.clone());
            assert_eq!(consumer.get("Task type").as_deref(), Some("TASK"));
            assert_eq!(consumer.get("Children").as_deref(), Some("1"));
            assert_eq!(consumer.done_count(), 1);
        }

        it "reports the locale encoded in the file name" {
            let registry = MetadataRegistry::new();
            let strings = project.find_member(root.join("strings_fr_FR.properties")).expect("not found");
            let consumer = CollectingConsumer::new();
            registry.fill_in_metadata(&strings, consumer.clone());
            assert_eq!(consumer.get("Locale").as_deref(), Some("fr_FR"));
        }
    }

    describe "synchronous sources" {
        it "deliver base properties before extra ones" {
            let registry = MetadataRegistry::with_defaults(&MetadataEngine::inline());
            let consumer = CollectingConsumer::new();
            registry.fill_in_metadata(&file, consumer.clone());

            let labels = labels(&consumer);
            let name = labels.iter().position(|l| l == "Name").expect("no name");
            let lines = labels.iter().position(|l| l == "Lines").expect("no lines");
            assert!(name < lines);
            assert_eq!(consumer.get("Type").as_deref(), Some("Text (txt)"));
            assert_eq!(consumer.get("Words").as_deref(), Some("3"));
            assert_eq!(consumer.blocks(), 1);
        }

        it "still finish the request when extra properties fail" {
            let registry = MetadataRegistry::new();
            registry.register(Arc::new(BrokenSource));
            let blob = project.find_member(root.join("blob.bin")).expect("blob not found");

            let consumer = CollectingConsumer::new();
            registry.fill_in_metadata(&blob, consumer.clone());
            assert_eq!(consumer.get("Name").as_deref(), Some("blob.bin"));
            assert_eq!(consumer.get("Partial").as_deref(), Some("1"));
            assert_eq!(consumer.done_count(), 1);
        }
    }

    describe "threaded sources" {
        it "reuse the cached payload while the file is unchanged" {
            let (metadata, computed) = counting(false);
            let source = ThreadedSource::new(metadata, MetadataEngine::inline());

            for _ in 0..3 {
                let consumer = CollectingConsumer::new();
                source.fill_in_metadata(&file, consumer.clone());
                assert_eq!(consumer.get("Measured").as_deref(), Some("14"));
                assert_eq!(consumer.done_count(), 1);
            }
            assert_eq!(computed.load(Ordering::SeqCst), 1);
            assert_eq!(source.cache().len(), 1);
        }

        it "recompute after the cache is invalidated" {
            let (metadata, computed) = counting(false);
            let source = ThreadedSource::new(metadata, MetadataEngine::inline());

            source.fill_in_metadata(&file, CollectingConsumer::new());
            assert!(source.cache().invalidate(file.id()));
            source.fill_in_metadata(&file, CollectingConsumer::new());
            source.cache().reset();
            source.fill_in_metadata(&file, CollectingConsumer::new());

            assert_eq!(computed.load(Ordering::SeqCst), 3);
        }

        it "deliver fast properties before measured ones" {
            let (metadata, _computed) = counting(false);
            let source = ThreadedSource::new(metadata, MetadataEngine::inline());
            let consumer = CollectingConsumer::new();
            source.fill_in_metadata(&file, consumer.clone());

            let labels = labels(&consumer);
            let name = labels.iter().position(|l| l == "Name").expect("no name");
            let fast = labels.iter().position(|l| l == "Fast").expect("no fast");
            let measured = labels.iter().position(|l| l == "Measured").expect("no measured");
            assert!(name < fast && fast < measured);
        }

        it "skip the computation for an abandoned request" {
            let (metadata, computed) = counting(false);
            let source = ThreadedSource::new(metadata, MetadataEngine::inline());
            let token = CancelToken::new();
            let consumer = CollectingConsumer::with_token(token.clone());
            token.cancel();

            source.fill_in_metadata(&file, consumer.clone());
            assert_eq!(computed.load(Ordering::SeqCst), 0);
            assert!(consumer.get("Measured").is_none());
            assert_eq!(consumer.get("Name").as_deref(), Some("a.txt"));
            assert_eq!(consumer.done_count(), 1);
        }

        it "finish the request exactly once when the computation fails" {
            let (metadata, computed) = counting(true);
            let source = ThreadedSource::new(metadata, MetadataEngine::inline());
            let consumer = CollectingConsumer::new();

            source.fill_in_metadata(&file, consumer.clone());
            assert_eq!(computed.load(Ordering::SeqCst), 1);
            assert!(consumer.get("Measured").is_none());
            assert_eq!(consumer.done_count(), 1);
            assert!(source.cache().is_empty());
        }
    }

    describe "worker thread" {
        it "delivers results through the pumped channel" {
            let (metadata, _computed) = counting(false);
            let delivery = Arc::new(ChannelDelivery::new());
            let engine = MetadataEngine::spawn(&TreeConfig { debounce_ms: 0, ..TreeConfig::default() }, delivery.clone())
                .expect("spawn failed");
            let source = ThreadedSource::new(metadata, engine);
            let consumer = CollectingConsumer::new();

            source.fill_in_metadata(&file, consumer.clone());
            assert!(delivery.pump_one(Duration::from_secs(5)));
            assert_eq!(consumer.get("Measured").as_deref(), Some("14"));
            assert_eq!(consumer.done_count(), 1);
        }

        it "abandons requests cancelled during the debounce" {
            let (metadata, computed) = counting(false);
            let worker = Arc::new(WorkerQueue::spawn("metadata-test").expect("spawn failed"));
            let engine = MetadataEngine::new(worker, Arc::new(Direct), Duration::from_millis(200));
            let source = ThreadedSource::new(metadata, engine);
            let consumer = CollectingConsumer::new();

            source.fill_in_metadata(&file, consumer.clone());
            consumer.token().cancel();

            assert!(consumer.wait_done(Duration::from_secs(5)));
            assert_eq!(computed.load(Ordering::SeqCst), 0);
            assert!(consumer.get("Measured").is_none());
            assert_eq!(consumer.done_count(), 1);
        }

        it "keeps serving other sources after a computation panics" {
            let (metadata, computed) = counting(false);
            let worker = Arc::new(WorkerQueue::spawn("metadata-test").expect("spawn failed"));
            let engine = MetadataEngine::new(worker, Arc::new(Direct), Duration::ZERO);
            let panicking = ThreadedSource::new(PanickingMetadata, engine.clone());
            let measuring = ThreadedSource::new(metadata, engine);

            let crashed = CollectingConsumer::new();
            let next = CollectingConsumer::new();
            panicking.fill_in_metadata(&file, crashed.clone());
            measuring.fill_in_metadata(&file, next.clone());

            assert!(crashed.wait_done(Duration::from_secs(5)));
            assert!(next.wait_done(Duration::from_secs(5)));
            assert_eq!(crashed.get("Name").as_deref(), Some("a.txt"));
            assert_eq!(crashed.done_count(), 1);
            assert!(panicking.cache().is_empty());
            assert_eq!(next.get("Measured").as_deref(), Some("14"));
            assert_eq!(next.done_count(), 1);
            assert_eq!(computed.load(Ordering::SeqCst), 1);
        }

        it "finishes requests submitted after shutdown" {
            let (metadata, computed) = counting(false);
            let worker = Arc::new(WorkerQueue::spawn("metadata-test").expect("spawn failed"));
            let engine = MetadataEngine::new(worker.clone(), Arc::new(Direct), Duration::ZERO);
            let source = ThreadedSource::new(metadata, engine);
            worker.shutdown();

            let consumer = CollectingConsumer::new();
            source.fill_in_metadata(&file, consumer.clone());
            assert_eq!(consumer.done_count(), 1);
            assert_eq!(consumer.get("Fast").as_deref(), Some("yes"));
            assert!(consumer.get("Measured").is_none());
            assert_eq!(computed.load(Ordering::SeqCst), 0);
        }

        it "serves queued requests in order" {
            let (metadata, computed) = counting(false);
            let worker = Arc::new(WorkerQueue::spawn("metadata-test").expect("spawn failed"));
            let engine = MetadataEngine::new(worker, Arc::new(Direct), Duration::ZERO);
            let source = ThreadedSource::new(metadata, engine);
            let blob = project.find_member(root.join("blob.bin")).expect("blob not found");

            let first = CollectingConsumer::new();
            let second = CollectingConsumer::new();
            source.fill_in_metadata(&file, first.clone());
            source.fill_in_metadata(&blob, second.clone());

            assert!(second.wait_done(Duration::from_secs(5)));
            assert_eq!(first.done_count(), 1);
            assert_eq!(second.get("Measured").as_deref(), Some("16"));
            assert_eq!(computed.load(Ordering::SeqCst), 2);
        }
    }
}
