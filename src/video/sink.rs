use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::error::{CleanupError, Result, VideoError};
use crate::video::source::read_log;
use crate::video::types::{CompositeFrame, FrameRate};

/// Encodes composited frames into a new, video-only container
///
/// Frames are piped to `ffmpeg` as packed RGB24. [`close`](Self::close)
/// finalizes the container; a sink dropped without `close` is still
/// finalized, but any encoder error is only logged.
pub struct VideoFrameSink {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_log: File,
    frames_written: u64,
}

impl VideoFrameSink {
    pub fn open<P: AsRef<Path>>(
        path: P,
        frame_rate: FrameRate,
        width: u32,
        height: u32,
        config: &VideoConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        validate_geometry(width, height)?;

        let encode_error = |reason: String| VideoError::Encode { reason };
        let stderr_log = tempfile::tempfile()
            .and_then(|log| Ok((log.try_clone()?, log)))
            .map_err(|e| encode_error(format!("failed to create encoder log: {e}")))?;

        let mut cmd = Command::new(&config.ffmpeg);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_log.0));

        let size = format!("{width}x{height}");
        let rate = frame_rate.to_string();
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            size.as_str(),
            "-r",
            rate.as_str(),
            "-i",
            "pipe:0",
            "-an",
        ]);
        if let Some(filter) = even_padding(width, height, &config.pixel_format) {
            debug!(
                "{} needs even dimensions; padding {}x{} output",
                config.pixel_format, width, height
            );
            cmd.args(["-vf", filter]);
        }
        cmd.args([
            "-c:v",
            config.codec.as_str(),
            "-pix_fmt",
            config.pixel_format.as_str(),
        ]);
        if matches!(config.codec.as_str(), "libx264" | "libx265") {
            cmd.arg("-crf").arg(config.crf().to_string());
        }
        cmd.args(["-movflags", "+faststart"]).arg(path);

        let mut child = cmd.spawn().map_err(|e| {
            encode_error(format!(
                "failed to spawn {} (is it installed and on PATH?): {e}",
                config.ffmpeg
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| encode_error("failed to open ffmpeg stdin".to_string()))?;

        info!(
            "Encoding {}x{} @ {} ({}, {}) into {}",
            width,
            height,
            frame_rate,
            config.codec,
            config.pixel_format,
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            child,
            stdin: Some(stdin),
            stderr_log: stderr_log.1,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one frame
    ///
    /// A frame whose size differs from the sink's is a caller bug and fails
    /// with `Encode`.
    pub fn write(&mut self, frame: &CompositeFrame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            let (w, h) = frame.dimensions();
            return Err(VideoError::Encode {
                reason: format!(
                    "frame size mismatch: got {w}x{h}, expected {}x{}",
                    self.width, self.height
                ),
            }
            .into());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VideoError::Encode {
                reason: "encoder is already finalized".to_string(),
            }
            .into());
        };

        stdin.write_all(frame.as_frame().as_bytes()).map_err(|e| VideoError::Encode {
            reason: format!("failed to write frame {} to ffmpeg: {e}", self.frames_written),
        })?;

        self.frames_written += 1;
        Ok(())
    }

    /// Flush and finalize the container, returning the number of frames written
    pub fn close(mut self) -> Result<u64> {
        self.finalize()?;
        debug!("Closed {} after {} frames", self.path.display(), self.frames_written);
        Ok(self.frames_written)
    }

    fn finalize(&mut self) -> Result<()> {
        // Closing stdin is ffmpeg's end-of-input signal
        drop(self.stdin.take());

        let status = self.child.wait().map_err(|e| VideoError::Encode {
            reason: format!("failed to wait for ffmpeg to finish: {e}"),
        })?;

        if !status.success() {
            return Err(VideoError::Encode {
                reason: format!(
                    "ffmpeg exited with status {status}: {}",
                    read_log(&mut self.stderr_log)
                ),
            }
            .into());
        }

        Ok(())
    }
}

impl Drop for VideoFrameSink {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            warn!("Sink for {} dropped without close; finalizing", self.path.display());
            if let Err(e) = self.finalize() {
                warn!("Finalizing {} failed: {}", self.path.display(), e);
            }
        }
    }
}

fn validate_geometry(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(VideoError::Encode {
            reason: "sink width/height must be non-zero".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Filter that rounds odd dimensions up to even ones for chroma-subsampled
/// formats. The added row/column is black.
fn even_padding(width: u32, height: u32, pixel_format: &str) -> Option<&'static str> {
    let subsampled = ["yuv420", "yuvj420", "yuv422", "yuvj422", "nv12", "nv21"]
        .iter()
        .any(|prefix| pixel_format.starts_with(prefix));
    (subsampled && (width % 2 != 0 || height % 2 != 0)).then_some("pad=ceil(iw/2)*2:ceil(ih/2)*2")
}

/// The silent composited video that lives between encoding and remux
///
/// Created empty in the temp area; removed by [`discard`](Self::discard), or
/// left in place by [`preserve`](Self::preserve). Dropping it removes the file.
#[derive(Debug)]
pub struct IntermediateVideo {
    path: TempPath,
}

impl IntermediateVideo {
    /// Reserve a fresh `.mp4` path in `dir`, or the process temp dir
    pub fn create(dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chroma-silent-").suffix(".mp4");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file
    pub fn discard(self) -> std::result::Result<(), CleanupError> {
        let path = self.path.to_path_buf();
        self.path
            .close()
            .map_err(|source| CleanupError { path, source })
    }

    /// Keep the file on disk and hand back its path
    pub fn preserve(self) -> PathBuf {
        let path = self.path.to_path_buf();
        if let Err(e) = self.path.keep() {
            warn!("Could not keep {}: {}", path.display(), e);
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositorError;

    #[test]
    fn test_geometry_validation() {
        assert!(validate_geometry(640, 480).is_ok());
        assert!(validate_geometry(641, 481).is_ok());
        assert!(validate_geometry(0, 480).is_err());
        assert!(validate_geometry(640, 0).is_err());
    }

    #[test]
    fn test_odd_sizes_are_padded_for_subsampled_formats() {
        assert_eq!(even_padding(640, 480, "yuv420p"), None);
        assert!(even_padding(641, 481, "yuv420p").is_some());
        assert!(even_padding(640, 481, "yuvj420p").is_some());
        assert!(even_padding(641, 480, "yuv422p10le").is_some());
        assert_eq!(even_padding(641, 481, "yuv444p"), None);
        assert_eq!(even_padding(641, 481, "rgb24"), None);
    }

    #[test]
    fn test_intermediate_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let intermediate = IntermediateVideo::create(Some(dir.path())).unwrap();
        let path = intermediate.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        intermediate.discard().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_intermediate_can_be_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = IntermediateVideo::create(Some(dir.path())).unwrap().preserve();
        assert!(path.exists());
    }

    #[test]
    fn test_discard_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let intermediate = IntermediateVideo::create(Some(dir.path())).unwrap();
        std::fs::remove_file(intermediate.path()).unwrap();

        let err = intermediate.discard().unwrap_err();
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_open_with_missing_encoder() {
        let mut config = VideoConfig::default();
        config.ffmpeg = "definitely-not-an-ffmpeg-binary".to_string();

        let dir = tempfile::tempdir().unwrap();
        let err = VideoFrameSink::open(
            dir.path().join("out.mp4"),
            FrameRate::new(30, 1).unwrap(),
            64,
            48,
            &config,
        )
        .err()
        .unwrap();
        assert!(matches!(err, CompositorError::Video(VideoError::Encode { .. })));
    }
}
