//! Types for the placer module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::CollisionPolicy;

/// Move one finished file into the output directory.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    /// Used for logging only.
    pub job_id: String,
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    /// Already sanitized.
    pub file_name: String,
    pub policy: CollisionPolicy,
}

/// What the placer did with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementAction {
    /// Written to a previously free path.
    Placed,
    /// An existing file was replaced.
    Replaced,
    /// An existing file was kept and the new one discarded.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementResult {
    pub path: PathBuf,
    pub action: PlacementAction,
    pub size_bytes: u64,
}
