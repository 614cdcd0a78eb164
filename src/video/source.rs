use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::error::{CompositorError, Result, VideoError};
use crate::video::probe::probe_media;
use crate::video::types::{Frame, VideoMetadata};

/// Pulls decoded frames out of some media backend, one at a time
///
/// Returning `Err(VideoError::FrameDecode { .. })` reports an isolated bad
/// frame; any other error ends the stream.
pub trait FrameDecoder: Send {
    /// Next frame in decode order, `None` once the stream is exhausted
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, VideoError>>;

    /// Release backend resources. Called at most once, after the last frame.
    fn finish(&mut self) -> std::result::Result<(), VideoError> {
        Ok(())
    }
}

/// Decodes through `ffmpeg ... -f rawvideo -pix_fmt rgb24 pipe:1`
pub struct FfmpegPipeDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_log: File,
    width: u32,
    height: u32,
    index: u64,
    exhausted: bool,
    finished: bool,
}

impl FfmpegPipeDecoder {
    pub fn spawn(ffmpeg: &str, path: &Path, width: u32, height: u32) -> io::Result<Self> {
        // stderr goes to an anonymous file so a chatty ffmpeg can never block on a full pipe
        let stderr_log = tempfile::tempfile()?;

        // ffmpeg autorotates by default; `width`/`height` are the displayed geometry
        let mut child = Command::new(ffmpeg)
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_log.try_clone()?))
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "ffmpeg stdout unavailable"))?;

        debug!("Spawned ffmpeg decoder for {}", path.display());
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr_log,
            width,
            height,
            index: 0,
            exhausted: false,
            finished: false,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl FrameDecoder for FfmpegPipeDecoder {
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, VideoError>> {
        if self.exhausted {
            return None;
        }

        let index = self.index;
        self.index += 1;

        let frame_len = self.frame_len();
        let mut buffer = vec![0u8; frame_len];
        match read_full(&mut self.stdout, &mut buffer) {
            Ok(0) => {
                self.exhausted = true;
                None
            }
            Ok(n) if n < frame_len => {
                self.exhausted = true;
                Some(Err(VideoError::FrameDecode {
                    index,
                    reason: format!("truncated frame: got {n} of {frame_len} bytes"),
                }))
            }
            Ok(_) => Some(
                Frame::from_rgb_bytes(self.width, self.height, buffer).ok_or(
                    VideoError::FrameDecode {
                        index,
                        reason: "buffer does not match frame dimensions".to_string(),
                    },
                ),
            ),
            Err(e) => {
                self.exhausted = true;
                Some(Err(VideoError::StreamRead {
                    reason: format!("reading ffmpeg output failed: {e}"),
                }))
            }
        }
    }

    fn finish(&mut self) -> std::result::Result<(), VideoError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if !self.exhausted {
            // Stopped early; nobody wants the rest of the stream
            let _ = self.child.kill();
        }

        let status = self.child.wait().map_err(|e| VideoError::StreamRead {
            reason: format!("failed to wait for ffmpeg decoder: {e}"),
        })?;

        if self.exhausted && !status.success() {
            return Err(VideoError::StreamRead {
                reason: format!(
                    "ffmpeg decoder exited with status {status}: {}",
                    read_log(&mut self.stderr_log)
                ),
            });
        }

        Ok(())
    }
}

impl Drop for FfmpegPipeDecoder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Frame counters for a finished source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub decoded: u64,
    pub skipped: u64,
    /// Frames the container announced that never came out of the decoder
    pub missing: u64,
    /// Why the decoder backend reported failure on shutdown, if it did
    pub decoder_error: Option<String>,
}

/// Sequential, non-restartable stream of frames from one video
///
/// Isolated undecodable frames are logged and skipped; the frames that
/// follow are renumbered, so a skip shifts everything after it one frame
/// earlier against the audio.
pub struct VideoFrameSource {
    path: PathBuf,
    metadata: VideoMetadata,
    decoder: Box<dyn FrameDecoder>,
    max_consecutive_failures: u32,
    position: u64,
    decoded: u64,
    skipped: u64,
    consecutive_failures: u32,
    finished: bool,
    reached_end: bool,
}

impl VideoFrameSource {
    /// Probe `path` and start decoding it
    ///
    /// Fails with `UnreadableSource` if the container cannot be opened, has
    /// no video stream, or declares zero frames.
    pub fn open<P: AsRef<Path>>(path: P, config: &VideoConfig) -> Result<Self> {
        let path = path.as_ref();
        let unreadable = |reason: String| VideoError::UnreadableSource {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(unreadable("file does not exist".to_string()).into());
        }

        let probe = probe_media(&config.ffprobe, path).map_err(unreadable)?;
        let video = probe
            .video
            .ok_or_else(|| unreadable("no video stream".to_string()))?;
        let frame_rate = video
            .frame_rate
            .ok_or_else(|| unreadable("unknown frame rate".to_string()))?;
        let frame_count = video.frame_count.unwrap_or(0);
        if frame_count == 0 {
            return Err(unreadable("video stream has no frames".to_string()).into());
        }

        if video.rotation != 0 {
            debug!(
                "{} is rotated {} degrees; decoding upright as {}x{}",
                path.display(),
                video.rotation,
                video.width,
                video.height
            );
        }

        let metadata = VideoMetadata {
            frame_rate,
            width: video.width,
            height: video.height,
            frame_count,
            has_audio: probe.has_audio,
        };

        let decoder = FfmpegPipeDecoder::spawn(&config.ffmpeg, path, metadata.width, metadata.height)
            .map_err(|e| unreadable(format!("failed to spawn {} (is it installed and on PATH?): {e}", config.ffmpeg)))?;

        info!(
            "Opened {}: {}x{} @ {:.2} fps, {} frames, audio: {}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps(),
            metadata.frame_count,
            if metadata.has_audio { "yes" } else { "no" }
        );

        Ok(Self::from_decoder(
            path,
            metadata,
            Box::new(decoder),
            config.max_consecutive_decode_failures,
        ))
    }

    /// Wrap an arbitrary decoder backend
    pub fn from_decoder(
        path: impl Into<PathBuf>,
        metadata: VideoMetadata,
        decoder: Box<dyn FrameDecoder>,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            path: path.into(),
            metadata,
            decoder,
            max_consecutive_failures: max_consecutive_failures.max(1),
            position: 0,
            decoded: 0,
            skipped: 0,
            consecutive_failures: 0,
            finished: false,
            reached_end: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Available straight after `open`, before any frame is pulled
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next good frame, `None` at end of stream
    ///
    /// An `Err` is fatal and ends the stream.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        while !self.finished {
            let position = self.position;
            let failure = match self.decoder.next_frame() {
                None => {
                    self.finished = true;
                    self.reached_end = true;
                    return None;
                }
                Some(Ok(frame)) if frame.dimensions() == self.metadata.dimensions() => {
                    self.position += 1;
                    self.decoded += 1;
                    self.consecutive_failures = 0;
                    return Some(Ok(frame));
                }
                Some(Ok(frame)) => CompositorError::from(VideoError::FrameDecode {
                    index: position,
                    reason: format!(
                        "frame is {}x{}, stream is {}x{}",
                        frame.width(),
                        frame.height(),
                        self.metadata.width,
                        self.metadata.height
                    ),
                }),
                Some(Err(e)) => {
                    let e = CompositorError::from(e);
                    if !e.is_recoverable() {
                        self.finished = true;
                        return Some(Err(e));
                    }
                    e
                }
            };

            self.position += 1;
            self.skipped += 1;
            self.consecutive_failures += 1;
            warn!("Skipping frame {} of {}: {}", position, self.path.display(), failure);

            if self.consecutive_failures >= self.max_consecutive_failures {
                self.finished = true;
                return Some(Err(VideoError::StreamRead {
                    reason: format!(
                        "{} consecutive frames could not be decoded",
                        self.consecutive_failures
                    ),
                }
                .into()));
            }
        }
        None
    }

    /// Stop decoding and release the backend
    pub fn close(mut self) -> SourceStats {
        let decoder_error = match self.decoder.finish() {
            Ok(()) => None,
            Err(e) => {
                warn!("Decoder for {} reported: {}", self.path.display(), e);
                Some(e.to_string())
            }
        };

        // The backend may drop damaged packets without reporting them.
        // Only meaningful once the whole stream was read.
        let missing = if self.reached_end {
            self.metadata
                .frame_count
                .saturating_sub(self.decoded + self.skipped)
        } else {
            0
        };
        if missing > 0 {
            warn!(
                "{} announced {} frames but only {} came out of the decoder",
                self.path.display(),
                self.metadata.frame_count,
                self.decoded + self.skipped
            );
        }

        debug!(
            "Closed {}: {} decoded, {} skipped, {} missing",
            self.path.display(),
            self.decoded,
            self.skipped,
            missing
        );
        SourceStats {
            decoded: self.decoded,
            skipped: self.skipped,
            missing,
            decoder_error,
        }
    }
}

impl Iterator for VideoFrameSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn read_log(log: &mut File) -> String {
    let mut text = String::new();
    if log.seek(SeekFrom::Start(0)).is_ok() {
        let _ = log.read_to_string(&mut text);
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::FrameRate;
    use std::collections::VecDeque;

    struct ScriptedDecoder {
        items: VecDeque<std::result::Result<Frame, VideoError>>,
    }

    impl FrameDecoder for ScriptedDecoder {
        fn next_frame(&mut self) -> Option<std::result::Result<Frame, VideoError>> {
            self.items.pop_front()
        }
    }

    fn metadata(width: u32, height: u32) -> VideoMetadata {
        VideoMetadata {
            frame_rate: FrameRate::new(30, 1).unwrap(),
            width,
            height,
            frame_count: 10,
            has_audio: false,
        }
    }

    fn source_with(items: Vec<std::result::Result<Frame, VideoError>>, max_failures: u32) -> VideoFrameSource {
        VideoFrameSource::from_decoder(
            "scripted.mp4",
            metadata(4, 4),
            Box::new(ScriptedDecoder { items: items.into() }),
            max_failures,
        )
    }

    fn good(shade: u8) -> std::result::Result<Frame, VideoError> {
        Ok(Frame::new_filled(4, 4, [shade, shade, shade]))
    }

    fn corrupt(index: u64) -> std::result::Result<Frame, VideoError> {
        Err(VideoError::FrameDecode { index, reason: "corrupt".to_string() })
    }

    #[test]
    fn test_metadata_available_before_first_frame() {
        let source = source_with(vec![good(1)], 3);
        assert_eq!(source.metadata().dimensions(), (4, 4));
        assert_eq!(source.decoded(), 0);
    }

    #[test]
    fn test_corrupt_frames_are_skipped_in_order() {
        let mut source = source_with(vec![good(1), corrupt(1), good(2), corrupt(3), good(3)], 3);

        let shades: Vec<u8> = source
            .by_ref()
            .map(|frame| frame.unwrap().get_pixel(0, 0)[0])
            .collect();

        assert_eq!(shades, vec![1, 2, 3]);
        assert_eq!(source.skipped(), 2);
        assert_eq!(source.decoded(), 3);
        assert!(source.next().is_none());

        let stats = source.close();
        assert_eq!(
            stats,
            SourceStats { decoded: 3, skipped: 2, missing: 5, decoder_error: None }
        );
    }

    #[test]
    fn test_wrong_sized_frame_counts_as_corrupt() {
        let mut source = source_with(vec![Ok(Frame::new_filled(2, 2, [0, 0, 0])), good(9)], 3);
        let frame = source.next().unwrap().unwrap();
        assert_eq!(frame.get_pixel(0, 0), [9, 9, 9]);
        assert_eq!(source.skipped(), 1);
    }

    #[test]
    fn test_too_many_consecutive_failures_is_fatal() {
        let mut source = source_with(vec![good(1), corrupt(1), corrupt(2), good(2)], 2);
        assert!(source.next().unwrap().is_ok());

        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, CompositorError::Video(VideoError::StreamRead { .. })));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_fatal_backend_error_ends_stream() {
        let mut source = source_with(
            vec![Err(VideoError::StreamRead { reason: "pipe broke".to_string() }), good(1)],
            3,
        );
        assert!(source.next().unwrap().is_err());
        assert!(source.next().is_none());
    }

    #[test]
    fn test_stream_ending_early_is_counted_as_missing() {
        // Container says 10 frames; the backend silently stops after 8
        let items = (0..8).map(|i| good(i as u8)).collect();
        let mut source = source_with(items, 3);
        assert_eq!(source.by_ref().count(), 8);

        let stats = source.close();
        assert_eq!(stats.decoded, 8);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.missing, 2);
    }

    #[test]
    fn test_stopping_early_is_not_counted_as_missing() {
        let items = (0..10).map(|i| good(i as u8)).collect();
        let mut source = source_with(items, 3);
        assert!(source.next().unwrap().is_ok());
        assert_eq!(source.close().missing, 0);
    }

    #[test]
    fn test_full_stream_has_nothing_missing() {
        let items = (0..10).map(|i| if i == 4 { corrupt(4) } else { good(i as u8) }).collect();
        let mut source = source_with(items, 3);
        assert_eq!(source.by_ref().filter(|f| f.is_ok()).count(), 9);
        assert_eq!(source.close().missing, 0);
    }

    #[test]
    fn test_read_full_reports_short_reads() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = &data[..];
        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        let err = VideoFrameSource::open("/no/such/video.mp4", &VideoConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, CompositorError::Video(VideoError::UnreadableSource { .. })));
    }
}
