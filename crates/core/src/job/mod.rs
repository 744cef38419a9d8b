//! Jobs: identity, state machine, output profile and the in-memory registry.

mod profile;
mod registry;
mod types;

pub use profile::{CollisionPolicy, JobRequest, OutputProfile, ProfileError, SUPPORTED_BITRATES};
pub use registry::JobRegistry;
pub use types::{ErrorKind, Job, JobError, JobId, JobProgress, JobStatus, TransitionError};
