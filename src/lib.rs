//! # Chroma-Compositor
//!
//! Replace the uniform green backdrop of a video with a still image, keeping
//! the original soundtrack.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chroma_compositor::{ChromaKeyJob, Config, JobPaths};
//!
//! # fn main() -> anyhow::Result<()> {
//! let job = ChromaKeyJob::new(Config::default());
//! let report = job.run(&JobPaths::new("greenscreen.mp4", "beach.jpg", "output.mp4"))?;
//!
//! println!("wrote {} frames to {:?}", report.frames_written, report.output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - frame types, ffmpeg-backed decoding ([`VideoFrameSource`](video::VideoFrameSource))
//!   and encoding ([`VideoFrameSink`](video::VideoFrameSink))
//! - [`keying`] - RGB to HSV conversion, key mask generation, background compositing
//! - [`audio`] - reattaching the original audio by stream copy
//! - [`composition`] - the end-to-end job and its state machine
//! - [`config`] - configuration management
//!
//! ## Custom Key Colors
//!
//! The key is an inclusive HSV box (hue in half-degrees `0..=179`, saturation
//! and value `0..=255`). The default matches a mid-range green screen; a blue
//! screen needs different bounds:
//!
//! ```rust
//! use chroma_compositor::{keying::HsvBound, Config};
//!
//! let mut config = Config::default();
//! config.key.lower = HsvBound::new(100, 150, 80);
//! config.key.upper = HsvBound::new(130, 255, 255);
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## External Tools
//!
//! `ffmpeg` and `ffprobe` must be installed; their locations can be changed
//! in [`VideoConfig`](config::VideoConfig).

pub mod audio;
pub mod composition;
pub mod config;
pub mod error;
pub mod keying;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{CancellationFlag, ChromaKeyJob, JobReport, JobState},
    config::{Config, JobPaths},
    error::{CompositorError, JobError, Result},
};
