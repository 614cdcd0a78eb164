use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RemuxConfig, VideoConfig};
use crate::error::{CompositorError, RemuxError, Result};
use crate::video::probe::probe_media;
use crate::video::IntermediateVideo;

/// What to do when the original video has no audio to carry over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAudioPolicy {
    /// Deliver the composited video without an audio track
    #[default]
    Silent,
    /// Fail the remux with `MissingAudioStream`
    Fail,
}

impl std::str::FromStr for MissingAudioPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown missing-audio policy '{other}' (expected silent or fail)")),
        }
    }
}

/// The audio stream of the original file, carried over without decoding
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    source: PathBuf,
}

impl AudioTrack {
    /// Locate the audio track of `source`, if it has one
    pub fn locate(ffprobe: &str, source: &Path) -> Result<Option<Self>> {
        let probe = probe_media(ffprobe, source).map_err(|reason| RemuxError::Probe {
            path: source.display().to_string(),
            reason,
        })?;
        Ok(probe.has_audio.then(|| Self {
            source: source.to_path_buf(),
        }))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemuxReport {
    pub output: PathBuf,
    pub audio_attached: bool,
}

/// A remux that failed, with the intermediate video kept for inspection
#[derive(Debug)]
pub struct RemuxFailure {
    pub error: CompositorError,
    pub preserved_intermediate: PathBuf,
}

/// Combines the silent composited video with the original audio
///
/// Both streams are stream-copied. The result is staged next to the output
/// and renamed into place, so a failed remux never leaves a file at the
/// output path.
#[derive(Debug, Clone)]
pub struct AudioRemuxer {
    ffmpeg: String,
    ffprobe: String,
    missing_audio: MissingAudioPolicy,
}

impl AudioRemuxer {
    pub fn new(video: &VideoConfig, remux: &RemuxConfig) -> Self {
        Self {
            ffmpeg: video.ffmpeg.clone(),
            ffprobe: video.ffprobe.clone(),
            missing_audio: remux.missing_audio,
        }
    }

    pub fn missing_audio(&self) -> MissingAudioPolicy {
        self.missing_audio
    }

    pub fn remux(&self, original: &Path, silent_video: &Path, output: &Path) -> Result<RemuxReport> {
        let silent = probe_media(&self.ffprobe, silent_video).map_err(|reason| RemuxError::Probe {
            path: silent_video.display().to_string(),
            reason,
        })?;
        if silent.video.is_none() {
            return Err(RemuxError::MissingVideoStream {
                path: silent_video.display().to_string(),
            }
            .into());
        }

        let audio = AudioTrack::locate(&self.ffprobe, original)?;
        if audio.is_none() {
            match self.missing_audio {
                MissingAudioPolicy::Fail => {
                    return Err(RemuxError::MissingAudioStream {
                        path: original.display().to_string(),
                    }
                    .into());
                }
                MissingAudioPolicy::Silent => {
                    warn!("{} has no audio track; output will be silent", original.display());
                }
            }
        }

        let parent = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let extension = output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let staging = tempfile::Builder::new()
            .prefix(".chroma-staging-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(&parent)?
            .into_temp_path();

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-nostdin", "-y", "-v", "error", "-i"]).arg(silent_video);
        if let Some(track) = &audio {
            cmd.arg("-i").arg(track.source());
        }
        cmd.args(["-map", "0:v:0"]);
        if audio.is_some() {
            cmd.args(["-map", "1:a:0"]);
        }
        cmd.args(["-c", "copy"]).arg(&*staging);

        debug!("Remuxing into {}", staging.display());
        let result = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RemuxError::MuxFailed {
                reason: format!("failed to run {} (is it installed and on PATH?): {e}", self.ffmpeg),
            })?;

        if !result.status.success() {
            return Err(RemuxError::MuxFailed {
                reason: format!(
                    "ffmpeg exited with status {}: {}",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            }
            .into());
        }

        staging.persist(output).map_err(|e| RemuxError::MuxFailed {
            reason: format!("failed to move result to {}: {}", output.display(), e.error),
        })?;

        info!(
            "Wrote {} ({})",
            output.display(),
            if audio.is_some() { "original audio attached" } else { "no audio" }
        );
        Ok(RemuxReport {
            output: output.to_path_buf(),
            audio_attached: audio.is_some(),
        })
    }

    /// Remux, then delete the intermediate on success or keep it on failure
    ///
    /// Failing to delete the intermediate is logged and otherwise ignored.
    pub fn remux_intermediate(
        &self,
        original: &Path,
        intermediate: IntermediateVideo,
        output: &Path,
    ) -> std::result::Result<RemuxReport, RemuxFailure> {
        match self.remux(original, intermediate.path(), output) {
            Ok(report) => {
                if let Err(e) = intermediate.discard() {
                    warn!("{}", e);
                }
                Ok(report)
            }
            Err(error) => {
                let preserved_intermediate = intermediate.preserve();
                warn!(
                    "Remux failed; keeping {} for inspection",
                    preserved_intermediate.display()
                );
                Err(RemuxFailure {
                    error,
                    preserved_intermediate,
                })
            }
        }
    }
}
