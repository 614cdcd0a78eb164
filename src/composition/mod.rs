//! # Composition Engine
//!
//! Runs one chroma-key job end to end: open the source, prepare the
//! background, stream frames through the keyer into a silent intermediate,
//! then reattach the original audio.

pub mod engine;

// Re-exports for convenience
pub use engine::{CancellationFlag, ChromaKeyJob, JobReport, JobState};
