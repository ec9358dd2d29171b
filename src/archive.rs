//! Packing a project folder into a ZIP archive and back.
//!
//! Entries are named by forward-slash paths relative to the parent of the
//! packed folder, so the archive holds one top-level folder. Modification
//! times are stored per entry (ZIP keeps them at two-second resolution in
//! local time) and restored on extraction.
//!
//! Both operations block for as long as the disk work takes. Run them off
//! any interactive thread (see [`crate::blocking::BlockingTask`]) and do not
//! pack or unpack overlapping trees concurrently.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};
use filetime::FileTime;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::config::TreeConfig;
use crate::error::{IoContext, Result, TreeError};
use crate::tree::{Marker, TaskType};

/// Progress reporting hook for long-running archive work.
pub trait Progress: Send + Sync {
    /// Called once with the number of entries about to be processed.
    fn begin(&self, _total: usize) {}
    /// Called after each entry.
    fn step(&self, entry: &str);
}

/// A [`Progress`] that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn step(&self, _entry: &str) {}
}

/// What [`pack`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// The result of [`unpack`].
///
/// When no target was given the files live in a scratch folder owned by this
/// value; dropping it removes them.
#[derive(Debug)]
pub struct Unpacked {
    root: PathBuf,
    destination: PathBuf,
    scratch: Option<TempDir>,
}

impl Unpacked {
    /// The project folder found in the archive.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder everything was extracted into.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub(crate) fn into_scratch(self) -> Option<TempDir> {
        self.scratch
    }
}

/// Write every file and folder under `source_root` into a new archive at
/// `archive_path`.
pub fn pack(
    source_root: &Path,
    archive_path: &Path,
    config: &TreeConfig,
    progress: &dyn Progress,
) -> Result<PackSummary> {
    let source_root = source_root.canonicalize().at(source_root)?;
    let base = source_root.parent().unwrap_or(&source_root).to_path_buf();
    let skip = archive_path.canonicalize().ok();

    let mut entries = Vec::new();
    for entry in WalkDir::new(&source_root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if skip.as_deref() == Some(entry.path()) {
            continue;
        }
        if entry.file_type().is_symlink() {
            tracing::warn!("Skipping symlink {}", entry.path().display());
            continue;
        }
        entries.push(entry);
    }
    progress.begin(entries.len());

    let file = File::create(archive_path).at(archive_path)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let mut summary = PackSummary::default();

    for entry in &entries {
        let path = entry.path();
        let name = entry_name(path, &base);
        let metadata = entry.metadata()?;

        let mut options = SimpleFileOptions::default()
            .compression_method(config.compression.method())
            .large_file(metadata.len() >= u32::MAX as u64);
        if let Some(time) = metadata.modified().ok().and_then(to_zip_time) {
            options = options.last_modified_time(time);
        }

        if metadata.is_dir() {
            if config.include_directory_entries {
                writer
                    .add_directory(name.clone(), options)
                    .map_err(|e| TreeError::archive(archive_path, e))?;
                summary.directories += 1;
            }
        } else {
            writer
                .start_file(name.clone(), options)
                .map_err(|e| TreeError::archive(archive_path, e))?;
            let mut input = BufReader::new(File::open(path).at(path)?);
            summary.bytes += io::copy(&mut input, &mut writer).at(path)?;
            summary.files += 1;
        }
        progress.step(&name);
    }

    writer
        .finish()
        .map_err(|e| TreeError::archive(archive_path, e))?;

    tracing::info!(
        "Packed {} into {} ({} files, {} bytes)",
        source_root.display(),
        archive_path.display(),
        summary.files,
        summary.bytes
    );
    Ok(summary)
}

/// Extract `archive_path` into `target_parent`, or into a fresh scratch
/// folder when `None`, and locate the single project folder it contains.
///
/// Fails with [`TreeError::NoProjectRoot`] or
/// [`TreeError::AmbiguousProjectRoot`] unless exactly one top-level folder
/// carries a PROJECT marker.
pub fn unpack(
    archive_path: &Path,
    target_parent: Option<&Path>,
    config: &TreeConfig,
    progress: &dyn Progress,
) -> Result<Unpacked> {
    let file = File::open(archive_path).at(archive_path)?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| TreeError::archive(archive_path, e))?;

    let (destination, scratch) = match target_parent {
        Some(target) => {
            fs::create_dir_all(target).at(target)?;
            (target.canonicalize().at(target)?, None)
        }
        None => {
            let scratch = tempfile::Builder::new()
                .prefix(&config.scratch_prefix)
                .tempdir()
                .at(std::env::temp_dir())?;
            let path = scratch.path().canonicalize().at(scratch.path())?;
            (path, Some(scratch))
        }
    };

    progress.begin(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| TreeError::archive(archive_path, e))?;
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {}", name);
            continue;
        };
        let out = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).at(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            let mut output = File::create(&out).at(&out)?;
            io::copy(&mut entry, &mut output).at(&out)?;
            drop(output);

            if let Some(time) = entry.last_modified().and_then(from_zip_time) {
                filetime::set_file_mtime(&out, FileTime::from_system_time(time)).at(&out)?;
            }
        }
        progress.step(&name);
    }

    let root = find_project_root(&destination, archive_path)?;
    tracing::info!(
        "Unpacked {} into {}",
        archive_path.display(),
        destination.display()
    );
    Ok(Unpacked {
        root,
        destination,
        scratch,
    })
}

/// The one immediate child of `destination` marked as a project.
fn find_project_root(destination: &Path, archive_path: &Path) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(destination).at(destination)? {
        let path = entry.at(destination)?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(marker) = Marker::read(&path)? {
            if marker.task_type == TaskType::Project {
                candidates.push(path);
            }
        }
    }

    match candidates.len() {
        0 => Err(TreeError::NoProjectRoot {
            archive: archive_path.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => {
            candidates.sort();
            Err(TreeError::AmbiguousProjectRoot {
                archive: archive_path.to_path_buf(),
                candidates,
            })
        }
    }
}

/// Forward-slash name of `path` relative to `base`.
fn entry_name(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert to the archive's local-time representation. Times outside the
/// DOS range (before 1980) yield `None`.
fn to_zip_time(time: SystemTime) -> Option<zip::DateTime> {
    let local = chrono::DateTime::<Local>::from(time);
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second().min(59) as u8,
    )
    .ok()
}

fn from_zip_time(time: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(SystemTime::from(local))
}
