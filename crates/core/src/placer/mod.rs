//! Placer module for moving finished files to their final destinations.
//!
//! # Features
//!
//! - Atomic moves when source and destination are on the same filesystem
//! - Copy to a hidden temp file plus rename when they are not
//! - Collision policies: skip, overwrite, uniquify with ` (n)` suffixes
//! - Per-destination locking so concurrent jobs never clobber each other
//! - Automatic parent directory creation

mod error;
mod fs_placer;
mod types;

pub use error::PlacerError;
pub use fs_placer::FsPlacer;
pub use types::{PlacementAction, PlacementRequest, PlacementResult};
