//! Error type shared by the tree, the marker codec and the archive codec.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures at the synchronize/pack/unpack boundaries.
///
/// Every variant names the path it failed on so the caller can report it
/// without extra context.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error in {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Unreadable task marker {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Could not encode task marker {path}: {source}")]
    MarkerWrite {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },

    #[error("Archive {archive} does not contain a project folder")]
    NoProjectRoot { archive: PathBuf },

    #[error("Archive {archive} contains {} project folders", candidates.len())]
    AmbiguousProjectRoot {
        archive: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("Not a project folder: {path}")]
    NotAProject { path: PathBuf },
}

impl TreeError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;

/// Attach a path to a bare `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| TreeError::io(path, e))
    }
}
