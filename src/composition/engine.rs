use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioRemuxer,
    config::{Config, JobPaths},
    error::{CompositorError, JobError, Result, VideoError},
    keying::{hsv, BackgroundImage, FrameCompositor, KeyMaskGenerator},
    video::{IntermediateVideo, VideoFrameSink, VideoFrameSource, VideoMetadata},
};

/// Where a job is in its single pass. States are only ever entered in
/// declaration order; `Failed` can follow any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    Idle,
    SourceOpened,
    BackgroundPrepared,
    Streaming,
    SilentSinkClosed,
    Remuxed,
    Done,
    Failed,
}

impl JobState {
    /// What the job is busy with while in this state
    pub fn activity(&self) -> &'static str {
        match self {
            Self::Idle => "source open",
            Self::SourceOpened => "background preparation",
            Self::BackgroundPrepared => "encoder setup",
            Self::Streaming => "frame streaming",
            Self::SilentSinkClosed => "remux",
            Self::Remuxed => "cleanup",
            Self::Done => "completion",
            Self::Failed => "failure handling",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SourceOpened => "source opened",
            Self::BackgroundPrepared => "background prepared",
            Self::Streaming => "streaming",
            Self::SilentSinkClosed => "silent sink closed",
            Self::Remuxed => "remuxed",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative stop request, checked once per frame
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a successful job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub metadata: VideoMetadata,
    pub frames_decoded: u64,
    pub frames_skipped: u64,
    /// Announced by the container but never produced by the decoder
    pub frames_missing: u64,
    pub frames_written: u64,
    pub audio_attached: bool,
    pub output: PathBuf,
    /// Where the silent intermediate lived; deleted by the time the job returns
    pub intermediate: PathBuf,
    /// Every state the job passed through, in order
    pub states: Vec<JobState>,
    pub elapsed: Duration,
}

struct StateTracker {
    current: JobState,
    history: Vec<JobState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            current: JobState::Idle,
            history: vec![JobState::Idle],
        }
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(next > self.current, "job state went backwards: {} -> {}", self.current, next);
        debug!("Job state: {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: impl Into<CompositorError>) -> JobError {
        let phase = self.current;
        let error = error.into();
        error!("Job failed during {}: {}", phase.activity(), error);
        self.current = JobState::Failed;
        self.history.push(JobState::Failed);
        JobError::new(phase, error)
    }
}

/// One chroma-key job: source video + background still -> composited video with original audio
///
/// The pipeline runs synchronously, one frame at a time:
/// 1. Open the source and read its metadata
/// 2. Load the background and resize it to the source once
/// 3. Decode, key, composite and encode each frame into a silent intermediate
/// 4. Remux the intermediate with the source's audio into the output
pub struct ChromaKeyJob {
    config: Config,
    cancel: CancellationFlag,
}

impl ChromaKeyJob {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationFlag::new(),
        }
    }

    /// Use an externally owned cancellation flag
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Run the whole pipeline for `paths`
    pub fn run(&self, paths: &JobPaths) -> std::result::Result<JobReport, JobError> {
        let started = Instant::now();
        let mut tracker = StateTracker::new();

        info!("🎬 Starting chroma-key job");
        info!("   Source: {:?}", paths.source);
        info!("   Background: {:?}", paths.background);
        info!("   Output: {:?}", paths.output);

        self.preflight(paths).map_err(|e| tracker.fail(e))?;

        let source = VideoFrameSource::open(&paths.source, &self.config.video)
            .map_err(|e| tracker.fail(e))?;
        tracker.advance(JobState::SourceOpened);

        self.execute(tracker, source, paths, started)
    }

    /// Run the pipeline on an already opened source
    ///
    /// `paths.source` must still name the file the source came from, since
    /// its audio is taken from there.
    pub fn run_with_source(
        &self,
        source: VideoFrameSource,
        paths: &JobPaths,
    ) -> std::result::Result<JobReport, JobError> {
        let started = Instant::now();
        let mut tracker = StateTracker::new();

        self.preflight(paths).map_err(|e| tracker.fail(e))?;
        tracker.advance(JobState::SourceOpened);

        self.execute(tracker, source, paths, started)
    }

    fn preflight(&self, paths: &JobPaths) -> Result<()> {
        self.config.validate()?;
        paths.validate()
    }

    fn execute(
        &self,
        mut tracker: StateTracker,
        mut source: VideoFrameSource,
        paths: &JobPaths,
        started: Instant,
    ) -> std::result::Result<JobReport, JobError> {
        let metadata = source.metadata().clone();
        let (width, height) = metadata.dimensions();

        // ==========================================
        // BACKGROUND PREPARATION
        // ==========================================

        let background = BackgroundImage::load(&paths.background, width, height)
            .map_err(|e| tracker.fail(e))?;
        let compositor =
            FrameCompositor::new(&background, width, height).map_err(|e| tracker.fail(e))?;
        let keyer = KeyMaskGenerator::new(self.config.key.lower, self.config.key.upper);
        debug!("Key range: {} ..= {}", keyer.lower(), keyer.upper());
        tracker.advance(JobState::BackgroundPrepared);

        // ==========================================
        // FRAME LOOP
        // ==========================================

        let intermediate = IntermediateVideo::create(self.config.video.intermediate_dir.as_deref())
            .map_err(|e| tracker.fail(e))?;
        let mut sink = match VideoFrameSink::open(
            intermediate.path(),
            metadata.frame_rate,
            width,
            height,
            &self.config.video,
        ) {
            Ok(sink) => sink,
            Err(e) => {
                discard(intermediate);
                return Err(tracker.fail(e));
            }
        };
        tracker.advance(JobState::Streaming);
        info!("🎨 Compositing {} frames...", metadata.frame_count);

        let streamed = self.stream_frames(&mut source, &keyer, &compositor, &mut sink);
        let closed = sink.close();
        let stats = source.close();

        let outcome: Result<u64> = match (streamed, closed) {
            (Ok(()), _) if stats.decoded == 0 => Err(VideoError::UnreadableSource {
                path: paths.source.display().to_string(),
                reason: stats
                    .decoder_error
                    .clone()
                    .unwrap_or_else(|| "no frame could be decoded".to_string()),
            }
            .into()),
            (Ok(()), closed) => closed,
            (Err(e), closed) => {
                if let Err(close_error) = closed {
                    warn!("Encoder also failed while closing: {}", close_error);
                }
                Err(e)
            }
        };
        let frames_written = match outcome {
            Ok(written) => written,
            Err(e) => {
                discard(intermediate);
                return Err(tracker.fail(e));
            }
        };

        let lost = stats.skipped + stats.missing;
        if lost > 0 {
            warn!(
                "{} frame(s) lost ({} skipped, {} missing from the stream); audio will drift ahead of video",
                lost, stats.skipped, stats.missing
            );
        }
        info!(
            "   ✅ Encoded {} frames ({} skipped)",
            frames_written, stats.skipped
        );
        tracker.advance(JobState::SilentSinkClosed);

        // ==========================================
        // AUDIO REMUX
        // ==========================================

        info!("🔊 Reattaching original audio...");
        let intermediate_path = intermediate.path().to_path_buf();
        let remuxer = AudioRemuxer::new(&self.config.video, &self.config.remux);
        let remuxed = remuxer
            .remux_intermediate(&paths.source, intermediate, &paths.output)
            .map_err(|failure| {
                let mut error = tracker.fail(failure.error);
                error.preserved_intermediate = Some(failure.preserved_intermediate);
                error
            })?;
        tracker.advance(JobState::Remuxed);
        tracker.advance(JobState::Done);

        let elapsed = started.elapsed();
        info!(
            "🎉 Done in {:.1}s. Output saved to: {:?}",
            elapsed.as_secs_f64(),
            remuxed.output
        );

        Ok(JobReport {
            metadata,
            frames_decoded: stats.decoded,
            frames_skipped: stats.skipped,
            frames_missing: stats.missing,
            frames_written,
            audio_attached: remuxed.audio_attached,
            output: remuxed.output,
            intermediate: intermediate_path,
            states: tracker.history,
            elapsed,
        })
    }

    /// Decode -> key -> composite -> encode, one frame at a time
    fn stream_frames(
        &self,
        source: &mut VideoFrameSource,
        keyer: &KeyMaskGenerator,
        compositor: &FrameCompositor<'_>,
        sink: &mut VideoFrameSink,
    ) -> Result<()> {
        let progress_interval = self.config.video.progress_interval;
        let total = source.metadata().frame_count;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CompositorError::Cancelled);
            }

            let Some(frame) = source.next_frame() else {
                return Ok(());
            };
            let frame = frame?;

            let mask = keyer.generate(&hsv::convert(&frame));
            let composite = compositor.composite(frame, &mask);
            sink.write(&composite)?;

            let written = sink.frames_written();
            if written % progress_interval == 0 {
                info!("   Composited {}/{} frames", written, total);
            }
        }
    }
}

fn discard(intermediate: IntermediateVideo) {
    if let Err(e) = intermediate.discard() {
        warn!("{}", e);
    }
}
