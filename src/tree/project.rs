use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};

use super::marker::{Marker, TaskType, MARKER_FILE};
use super::member::Member;
use crate::archive::{self, Progress};
use crate::config::TreeConfig;
use crate::error::{IoContext, Result, TreeError};

/// Receives notice that something under a path changed outside the tree.
pub trait ExternalChangeListener {
    fn on_external_change(&self, path: &Path);
}

/// The root of a member tree.
///
/// A project is either opened directly from a folder, or from a package
/// archive, in which case the live tree sits in a scratch folder that is
/// removed when the project is dropped.
#[derive(Debug)]
pub struct Project {
    root: Arc<Member>,
    package_file: Option<PathBuf>,
    scratch: Option<TempDir>,
}

impl Project {
    /// Open the project stored in `folder`, which must carry a PROJECT marker.
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        let folder = folder.as_ref();
        let path = folder.canonicalize().at(folder)?;
        match Marker::read(&path)? {
            Some(marker) if marker.task_type == TaskType::Project => Ok(Self {
                root: Member::new_root(path, Some(marker)),
                package_file: None,
                scratch: None,
            }),
            _ => Err(TreeError::NotAProject { path }),
        }
    }

    /// Unpack `package` into a scratch folder and open the project inside it.
    pub fn open_package(
        package: impl AsRef<Path>,
        config: &TreeConfig,
        progress: &dyn Progress,
    ) -> Result<Self> {
        let package = package.as_ref();
        let package_file = package.canonicalize().at(package)?;
        let unpacked = archive::unpack(&package_file, None, config, progress)?;

        let mut project = Self::open(unpacked.root())?;
        project.package_file = Some(package_file);
        project.scratch = unpacked.into_scratch();
        tracing::info!(
            "Opened package {} in {}",
            package.display(),
            project.path().display()
        );
        Ok(project)
    }

    /// Re-pack the live tree over the package it was opened from.
    ///
    /// The archive is written next to the package first and then renamed
    /// into place. Returns `Ok(None)` for a project without a package.
    pub fn save_package(
        &self,
        config: &TreeConfig,
        progress: &dyn Progress,
    ) -> Result<Option<PathBuf>> {
        let Some(package) = &self.package_file else {
            return Ok(None);
        };
        let dir = package.parent().unwrap_or_else(|| Path::new("."));
        let staging = NamedTempFile::new_in(dir).at(dir)?;

        archive::pack(self.path(), staging.path(), config, progress)?;
        staging
            .persist(package)
            .map_err(|e| TreeError::io(package, e.error))?;

        tracing::info!("Saved package {}", package.display());
        Ok(Some(package.clone()))
    }

    pub fn root(&self) -> &Arc<Member> {
        &self.root
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// The archive this project was opened from, if any.
    pub fn package_file(&self) -> Option<&Path> {
        self.package_file.as_deref()
    }

    /// Map `file` to its member.
    ///
    /// Walks down from the root one path component at a time, searching the
    /// in-memory children. A level whose children lack the next name is
    /// synchronized once and searched again, so files created since the
    /// last synchronize are found. Returns `None` for anything outside the
    /// project, anything that cannot be found after the retry, and anything
    /// that vanished while resolving.
    pub fn find_member(&self, file: impl AsRef<Path>) -> Option<Arc<Member>> {
        let target = file.as_ref().canonicalize().ok()?;
        if target == self.path() {
            return Some(Arc::clone(&self.root));
        }

        let relative = target.strip_prefix(self.path()).ok()?;
        let mut names: Vec<OsString> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => names.push(name.to_os_string()),
                _ => return None,
            }
        }
        if names.last().is_some_and(|name| name.as_os_str() == MARKER_FILE) {
            return None;
        }

        let mut node = Arc::clone(&self.root);
        for name in &names {
            let child = match node.find_child(name) {
                Some(child) => child,
                None => {
                    if let Err(e) = node.synchronize() {
                        tracing::warn!("Could not rescan {}: {}", node.path().display(), e);
                        return None;
                    }
                    node.find_child(name)?
                }
            };
            node = child;
        }

        node.exists().then_some(node)
    }
}

impl ExternalChangeListener for Project {
    /// Synchronize the nearest folder member at or above `path`.
    fn on_external_change(&self, path: &Path) {
        let folder = path
            .ancestors()
            .find_map(|candidate| self.find_member(candidate))
            .and_then(|member| {
                if member.is_folder() {
                    Some(member)
                } else {
                    member.parent()
                }
            });

        if let Some(folder) = folder {
            if let Err(e) = folder.synchronize() {
                tracing::warn!(
                    "Failed to synchronize {} after external change: {}",
                    folder.path().display(),
                    e
                );
            }
        }
    }
}
