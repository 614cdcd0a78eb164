use std::path::PathBuf;

use thiserror::Error;

use crate::composition::JobState;

/// Main error type for the chroma compositor library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Audio remux error: {0}")]
    Remux(#[from] RemuxError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job cancelled")]
    Cancelled,
}

/// Video decode, encode and compositing errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Cannot read source video {path}: {reason}")]
    UnreadableSource { path: String, reason: String },

    #[error("Dimension mismatch: expected {}x{}, got {}x{}", .expected.0, .expected.1, .actual.0, .actual.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Failed to decode frame {index}: {reason}")]
    FrameDecode { index: u64, reason: String },

    #[error("Video stream read failed: {reason}")]
    StreamRead { reason: String },

    #[error("Video encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Cannot prepare background image {path}: {reason}")]
    Background { path: String, reason: String },
}

/// Audio/video remux errors
#[derive(Error, Debug)]
pub enum RemuxError {
    #[error("No video stream in {path}")]
    MissingVideoStream { path: String },

    #[error("No audio stream in {path}")]
    MissingAudioStream { path: String },

    #[error("Failed to probe {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("Muxing failed: {reason}")]
    MuxFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Failure to delete a temporary file. Only ever logged.
#[derive(Error, Debug)]
#[error("Failed to remove temporary file {path}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A failed job: the phase it was in and what went wrong.
#[derive(Error, Debug)]
#[error("Job failed during {}: {error}", .phase.activity())]
pub struct JobError {
    pub phase: JobState,
    #[source]
    pub error: CompositorError,
    /// Silent intermediate video left on disk for diagnosis (remux failures only).
    pub preserved_intermediate: Option<PathBuf>,
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    /// Whether the frame loop may skip past this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Video(VideoError::FrameDecode { .. }))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Video(VideoError::UnreadableSource { path, reason }) => {
                format!("Could not read video '{}' ({}). Check the file exists and contains video frames.", path, reason)
            }
            Self::Video(VideoError::Background { path, .. }) => {
                format!("Could not load background image '{}'. Check the file exists and is a PNG or JPEG.", path)
            }
            Self::Remux(RemuxError::MissingAudioStream { path }) => {
                format!("Source '{}' has no audio track. Set remux.missing_audio = \"silent\" to allow a silent output.", path)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

impl JobError {
    pub fn new(phase: JobState, error: impl Into<CompositorError>) -> Self {
        Self {
            phase,
            error: error.into(),
            preserved_intermediate: None,
        }
    }

    pub fn user_message(&self) -> String {
        let mut message = format!("{} failed: {}", self.phase.activity(), self.error.user_message());
        if let Some(path) = &self.preserved_intermediate {
            message.push_str(&format!(" (intermediate video kept at {})", path.display()));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_frame_decode_is_recoverable() {
        let skip: CompositorError = VideoError::FrameDecode { index: 3, reason: "corrupt".into() }.into();
        assert!(skip.is_recoverable());

        let fatal: CompositorError = VideoError::Encode { reason: "pipe closed".into() }.into();
        assert!(!fatal.is_recoverable());
        assert!(!CompositorError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = VideoError::DimensionMismatch { expected: (640, 480), actual: (1920, 1080) };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 640x480, got 1920x1080");
    }

    #[test]
    fn test_job_error_names_phase_and_kept_file() {
        let mut err = JobError::new(
            JobState::SilentSinkClosed,
            RemuxError::MissingAudioStream { path: "in.mp4".into() },
        );
        err.preserved_intermediate = Some(PathBuf::from("/tmp/silent.mp4"));

        let message = err.user_message();
        assert!(message.starts_with("remux failed"));
        assert!(message.contains("/tmp/silent.mp4"));
    }
}
