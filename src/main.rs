use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chroma_compositor::{
    audio::MissingAudioPolicy,
    keying::HsvBound,
    ChromaKeyJob, Config, JobPaths,
};

#[derive(Parser)]
#[command(
    name = "chroma-compositor",
    version,
    about = "Replace a green-screen backdrop with a still image",
    long_about = "Chroma-Compositor keys out a uniform backdrop color in a video, shows a still image in its place, and reattaches the original audio track."
)]
struct Cli {
    /// Source video with a uniform backdrop
    #[arg(short, long)]
    input: PathBuf,

    /// Still image to show behind the subject (PNG, JPEG)
    #[arg(short, long)]
    background: PathBuf,

    /// Output video file path
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lower key bound as H,S,V (hue 0-179)
    #[arg(long, value_name = "H,S,V")]
    lower: Option<HsvBound>,

    /// Upper key bound as H,S,V (hue 0-179)
    #[arg(long, value_name = "H,S,V")]
    upper: Option<HsvBound>,

    /// What to do when the source has no audio (silent, fail)
    #[arg(long)]
    missing_audio: Option<MissingAudioPolicy>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Chroma-Compositor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    if let Some(lower) = cli.lower {
        config.key.lower = lower;
    }
    if let Some(upper) = cli.upper {
        config.key.upper = upper;
    }
    if let Some(policy) = cli.missing_audio {
        config.remux.missing_audio = policy;
    }
    config.validate()?;

    let paths = JobPaths::new(cli.input, cli.background, cli.output);
    let job = ChromaKeyJob::new(config);

    let cancel = job.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current frame...");
            cancel.cancel();
        }
    });

    // The pipeline is synchronous; keep it off the async workers
    let outcome = tokio::task::spawn_blocking(move || job.run(&paths)).await?;

    match outcome {
        Ok(report) => {
            info!(
                "Composition complete! {} frames ({} skipped, {} missing), audio {}, saved to {:?}",
                report.frames_written,
                report.frames_skipped,
                report.frames_missing,
                if report.audio_attached { "attached" } else { "absent" },
                report.output
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e.user_message())),
    }
}
