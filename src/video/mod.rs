//! # Video Processing Module
//!
//! Frame types, container probing, frame-by-frame decoding and encoding.
//! Decoding and encoding are delegated to the system `ffmpeg`/`ffprobe`
//! binaries; frames cross the process boundary as packed RGB24.

pub mod probe;
pub mod sink;
pub mod source;
pub mod types;

pub use probe::{probe_media, MediaProbe, VideoStreamInfo};
pub use sink::{IntermediateVideo, VideoFrameSink};
pub use source::{FfmpegPipeDecoder, FrameDecoder, SourceStats, VideoFrameSource};
pub use types::{CompositeFrame, Frame, FrameRate, VideoMetadata};
