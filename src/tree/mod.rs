//! The project member tree.
//!
//! # Core Concepts
//!
//! - [`Member`]: one file or folder, shared as `Arc<Member>`. Its children are
//!   a cache of the directory listing, refreshed only by
//!   [`Member::synchronize`].
//! - [`Task`]: a folder marked by a [`MARKER_FILE`] that records its
//!   [`TaskType`] and persisted settings.
//! - [`Project`]: the root task, optionally backed by a package archive, and
//!   the entry point for resolving paths to members.

mod marker;
mod member;
mod project;
mod reconcile;
mod render;

pub use marker::{Marker, TaskType, MARKER_FILE};
pub use member::{Member, MemberKind, SyncReport, Task};
pub use project::{ExternalChangeListener, Project};
pub use reconcile::{reconcile, Keyed, Reconciled};
pub use render::render_tree;
