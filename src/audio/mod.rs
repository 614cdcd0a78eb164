//! # Audio Module
//!
//! Reattaches the original soundtrack to the composited video. Audio is
//! never decoded here: the stream is copied as-is by `ffmpeg`.

pub mod remux;

pub use remux::{AudioRemuxer, AudioTrack, MissingAudioPolicy, RemuxFailure, RemuxReport};
