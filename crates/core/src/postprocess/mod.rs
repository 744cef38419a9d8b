//! Postprocess pipeline: transcode, tag, embed cover, place.
//!
//! Every intermediate file lives in the job's work directory; only the
//! placer ever writes into the output directory.

mod pipeline;
mod types;

pub use pipeline::Postprocessor;
pub use types::{PostprocessError, PostprocessObserver, PostprocessOutcome, PostprocessPlan};
