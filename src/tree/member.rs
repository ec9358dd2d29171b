use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use std::time::SystemTime;

use uuid::Uuid;

use super::marker::{Marker, TaskType, MARKER_FILE};
use super::reconcile::{reconcile, Keyed};
use crate::error::{IoContext, Result};

/// What a member is on disk.
///
/// - `File`: anything that is not a directory
/// - `Folder`: a directory without a task marker
/// - `Task`: a directory whose marker records the given type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Folder,
    Task(TaskType),
}

impl MemberKind {
    pub fn is_folder(&self) -> bool {
        !matches!(self, Self::File)
    }
}

/// An in-memory node mirroring one filesystem entry of a project.
///
/// Members are shared as `Arc<Member>`; the `Arc` (and [`Member::id`]) is the
/// member's identity. Children are only created or dropped by
/// [`Member::synchronize`], so an entry that survives a rescan keeps the same
/// `Arc`, and with it any selection or cached metadata keyed on it.
#[derive(Debug)]
pub struct Member {
    id: Uuid,
    path: PathBuf,
    /// Raw file name; the key children are reconciled by.
    file_name: OsString,
    name: String,
    parent: Weak<Member>,
    kind: MemberKind,
    /// Persisted settings; only populated for task folders.
    settings: Option<RwLock<BTreeMap<String, String>>>,
    children: RwLock<Vec<Arc<Member>>>,
}

/// Members added and dropped by a synchronize.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: Vec<Arc<Member>>,
    pub removed: Vec<Arc<Member>>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn merge(&mut self, other: SyncReport) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }
}

impl Member {
    /// Build the root node of a tree for the (already canonical) `path`.
    pub(crate) fn new_root(path: PathBuf, marker: Option<Marker>) -> Arc<Self> {
        let kind = match &marker {
            Some(m) => MemberKind::Task(m.task_type.clone()),
            None if path.is_dir() => MemberKind::Folder,
            None => MemberKind::File,
        };
        Arc::new(Self::build(path, Weak::new(), kind, marker))
    }

    fn build(path: PathBuf, parent: Weak<Member>, kind: MemberKind, marker: Option<Marker>) -> Self {
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| path.clone().into_os_string());
        let name = file_name.to_string_lossy().into_owned();
        Self {
            id: Uuid::new_v4(),
            path,
            file_name,
            name,
            parent,
            kind,
            settings: marker.map(|m| RwLock::new(m.settings)),
            children: RwLock::new(Vec::new()),
        }
    }

    /// Identity key, unique for the lifetime of this node.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name, taken from the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &MemberKind {
        &self.kind
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    pub fn parent(&self) -> Option<Arc<Member>> {
        self.parent.upgrade()
    }

    /// The topmost ancestor still alive (the project root for a live tree).
    pub fn root(self: &Arc<Self>) -> Arc<Member> {
        let mut node = Arc::clone(self);
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    pub fn is_task(&self) -> bool {
        matches!(self.kind, MemberKind::Task(_))
    }

    pub fn is_project(&self) -> bool {
        matches!(self.kind, MemberKind::Task(TaskType::Project))
    }

    pub fn can_contain_tasks(&self) -> bool {
        matches!(&self.kind, MemberKind::Task(t) if t.can_contain_tasks())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// View this member as a task, if it is one.
    pub fn as_task(&self) -> Option<Task<'_>> {
        match (&self.kind, &self.settings) {
            (MemberKind::Task(task_type), Some(settings)) => Some(Task {
                member: self,
                task_type,
                settings,
            }),
            _ => None,
        }
    }

    /// The current, possibly stale, child list. Never touches the disk.
    pub fn children(&self) -> Vec<Arc<Member>> {
        self.children
            .read()
            .expect("member children lock poisoned")
            .clone()
    }

    pub fn child_count(&self) -> usize {
        self.children
            .read()
            .expect("member children lock poisoned")
            .len()
    }

    /// Look up a child by file name in the in-memory list.
    pub fn find_child(&self, name: impl AsRef<OsStr>) -> Option<Arc<Member>> {
        let name = name.as_ref();
        self.children
            .read()
            .expect("member children lock poisoned")
            .iter()
            .find(|c| c.file_name.as_os_str() == name)
            .cloned()
    }

    /// Bring the child list in line with the directory on disk.
    ///
    /// Children whose name and classification are unchanged are kept as the
    /// same `Arc`; their own children are left untouched until they are
    /// synchronized themselves. Calling this again without a change on disk
    /// is a no-op.
    pub fn synchronize(self: &Arc<Self>) -> Result<SyncReport> {
        if !self.is_folder() {
            return Ok(SyncReport::default());
        }

        let listing = list_directory(&self.path)?;
        let old = self.children();
        let parent = Arc::downgrade(self);

        let result = reconcile(
            &old,
            listing,
            |child: &Arc<Member>, entry: &DiskEntry| child.kind == entry.kind,
            |entry: DiskEntry| -> Result<Arc<Member>> {
                Ok(Arc::new(Member::build(
                    entry.path,
                    parent.clone(),
                    entry.kind,
                    entry.marker,
                )))
            },
        )?;

        *self
            .children
            .write()
            .expect("member children lock poisoned") = result.children;

        if !result.added.is_empty() || !result.removed.is_empty() {
            tracing::debug!(
                "Synchronized {}: {} added, {} removed",
                self.path.display(),
                result.added.len(),
                result.removed.len()
            );
        }

        Ok(SyncReport {
            added: result.added,
            removed: result.removed,
        })
    }

    /// Synchronize this member and every folder below it.
    pub fn synchronize_all(self: &Arc<Self>) -> Result<SyncReport> {
        let mut report = self.synchronize()?;
        for child in self.children() {
            if child.is_folder() {
                report.merge(child.synchronize_all()?);
            }
        }
        Ok(report)
    }
}

impl Keyed for Arc<Member> {
    fn key(&self) -> &OsStr {
        &self.file_name
    }
}

/// A task folder: a member with a type tag and persisted settings.
#[derive(Debug, Clone, Copy)]
pub struct Task<'a> {
    member: &'a Member,
    task_type: &'a TaskType,
    settings: &'a RwLock<BTreeMap<String, String>>,
}

impl<'a> Task<'a> {
    /// Turn `folder` into a task of the given type by writing its marker.
    /// Existing settings are kept when the folder already is a task.
    pub fn create(folder: &Path, task_type: TaskType) -> Result<()> {
        fs::create_dir_all(folder).at(folder)?;
        let mut marker = Marker::read(folder)?.unwrap_or_else(|| Marker::new(task_type.clone()));
        marker.task_type = task_type;
        marker.write(folder)
    }

    pub fn member(&self) -> &'a Member {
        self.member
    }

    pub fn task_type(&self) -> &'a TaskType {
        self.task_type
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings
            .read()
            .expect("task settings lock poisoned")
            .get(key)
            .cloned()
    }

    /// Store a setting in memory; returns `false` for the reserved `type` key.
    /// Call [`Task::write_settings`] to persist.
    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if Marker::is_reserved(&key) {
            tracing::warn!("Ignoring reserved task setting '{}'", key);
            return false;
        }
        self.settings
            .write()
            .expect("task settings lock poisoned")
            .insert(key, value.into());
        true
    }

    pub fn remove_setting(&self, key: &str) -> Option<String> {
        self.settings
            .write()
            .expect("task settings lock poisoned")
            .remove(key)
    }

    pub fn settings(&self) -> BTreeMap<String, String> {
        self.settings
            .read()
            .expect("task settings lock poisoned")
            .clone()
    }

    /// Persist the settings into the folder's marker file.
    pub fn write_settings(&self) -> Result<()> {
        let marker = Marker {
            task_type: self.task_type.clone(),
            settings: self.settings(),
        };
        marker.write(self.member.path())
    }
}

/// One directory entry, classified.
#[derive(Debug)]
struct DiskEntry {
    file_name: OsString,
    name: String,
    path: PathBuf,
    kind: MemberKind,
    marker: Option<Marker>,
}

impl Keyed for DiskEntry {
    fn key(&self) -> &OsStr {
        &self.file_name
    }
}

/// List and classify the entries of `dir`, folders first, then by name
/// ignoring case. The task marker itself is not an entry.
///
/// A child folder whose marker cannot be read is listed as a plain folder.
fn list_directory(dir: &Path) -> Result<Vec<DiskEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let file_name = entry.file_name();
        if file_name.as_os_str() == OsStr::new(MARKER_FILE) {
            continue;
        }
        let name = file_name.to_string_lossy().into_owned();
        let path = entry.path();

        // Follow symlinks so a linked folder is classified as a folder.
        let is_dir = match fs::metadata(&path) {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        };

        let (kind, marker) = if is_dir {
            match Marker::read(&path) {
                Ok(Some(marker)) => (MemberKind::Task(marker.task_type.clone()), Some(marker)),
                Ok(None) => (MemberKind::Folder, None),
                Err(e) => {
                    tracing::warn!("Treating {} as a plain folder: {}", path.display(), e);
                    (MemberKind::Folder, None)
                }
            }
        } else {
            (MemberKind::File, None)
        };

        entries.push(DiskEntry {
            file_name,
            name,
            path,
            kind,
            marker,
        });
    }

    entries.sort_by(|a, b| {
        b.kind
            .is_folder()
            .cmp(&a.kind.is_folder())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(entries)
}
