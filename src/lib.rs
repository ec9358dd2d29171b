//! Project member tree, archive packaging and threaded member metadata.
//!
//! - [`tree`]: the in-memory mirror of a project folder and path resolution
//! - [`archive`]: packing a project into a ZIP archive and unpacking it
//! - [`metadata`]: pluggable metadata sources and the background engine

pub mod archive;
pub mod blocking;
pub mod config;
pub mod error;
pub mod metadata;
pub mod tree;

pub use error::{Result, TreeError};
