//! reelcast - record a rendered surface into an H.264 MP4 file
//!
//! Drives a test pattern (or a panned still image) through a recording
//! session, then moves the finished file into the video library.

use anyhow::{bail, Context, Result};
use clap::Parser;
use reelcast_capture::{ImageSurface, PatternSurface, Surface};
use reelcast_core::{LogicalSize, RecorderConfig, RecordingEvent};
use reelcast_recorder::RecordingSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// reelcast - Record a surface at a fixed frame rate
#[derive(Parser, Debug)]
#[command(name = "reelcast")]
#[command(version, about, long_about = None)]
struct Args {
    /// Surface width in logical units
    #[arg(short = 'W', long, default_value = "640")]
    width: f64,

    /// Surface height in logical units
    #[arg(short = 'H', long, default_value = "360")]
    height: f64,

    /// Target frame rate
    #[arg(short, long)]
    fps: Option<u32>,

    /// Pixels per logical unit
    #[arg(short, long)]
    scale: Option<f64>,

    /// Video bitrate in kbps
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Recording length in seconds
    #[arg(short, long, default_value = "5")]
    duration: f64,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record a PNG panned across the surface instead of the test pattern
    #[arg(long)]
    source: Option<PathBuf>,

    /// Resize the test pattern after this many seconds
    #[arg(long)]
    resize_after: Option<f64>,

    /// Library directory the finished recording is moved into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("reelcast v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    let library = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => dirs::video_dir()
            .or_else(dirs::home_dir)
            .context("No video directory found, pass --output-dir")?,
    };
    std::fs::create_dir_all(&library)
        .with_context(|| format!("Failed to create {}", library.display()))?;

    let logical = LogicalSize::new(args.width, args.height);
    let pattern = Arc::new(PatternSurface::new(logical));
    let surface: Arc<dyn Surface> = match &args.source {
        Some(path) => Arc::new(ImageSurface::open(path)?),
        None => pattern.clone(),
    };

    let (session, mut events) = RecordingSession::new(config);
    let id = session.start(surface, session.config().fps)?;
    info!("Recording {} for {:.1}s", id, args.duration);

    let length = Duration::from_secs_f64(args.duration.max(0.0));
    let stopped_early = match args.resize_after {
        Some(after) if args.source.is_none() => {
            let after = Duration::from_secs_f64(after.max(0.0)).min(length);
            tokio::time::sleep(after).await;
            let grown = LogicalSize::new(logical.width + 16.0, logical.height);
            info!("Resizing surface to {}", grown);
            pattern.resize(grown);
            tokio::time::sleep(length - after).await;
            true
        }
        Some(_) => {
            warn!("--resize-after only applies to the test pattern");
            tokio::time::sleep(length).await;
            false
        }
        None => {
            tokio::time::sleep(length).await;
            false
        }
    };

    if session.is_recording() {
        let path = session.stop()?;
        info!("Stopped, finalizing {}", path.display());
    } else if !stopped_early {
        warn!("Recording ended before the requested duration");
    }

    let saved = wait_for_outcome(&mut events).await?;
    let destination = move_to_library(&saved, &library)?;
    println!("{}", destination.display());
    Ok(())
}

fn build_config(args: &Args) -> Result<RecorderConfig> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => RecorderConfig::new(),
    };
    if let Some(fps) = args.fps {
        config = config.with_fps(fps);
    }
    if let Some(scale) = args.scale {
        config = config.with_scale_factor(scale);
    }
    if let Some(bitrate) = args.bitrate {
        config = config.with_bitrate(bitrate);
    }
    config.validate()?;
    Ok(config)
}

/// Wait for the terminal event and return the saved file
async fn wait_for_outcome(events: &mut UnboundedReceiver<RecordingEvent>) -> Result<PathBuf> {
    match events.recv().await {
        Some(RecordingEvent::FinishedSaving { summary, .. }) => {
            info!(
                "Saved {} frames ({} dropped), {:.2}s",
                summary.frames_written,
                summary.frames_dropped,
                summary.duration.as_secs_f64()
            );
            Ok(summary.path)
        }
        Some(RecordingEvent::FinishedWithoutExplicitStop {
            summary: Some(summary),
            ..
        }) => {
            warn!("Surface changed size, recording ended early");
            Ok(summary.path)
        }
        Some(RecordingEvent::FinishedWithoutExplicitStop {
            failure: Some(reason),
            ..
        }) => bail!("Surface changed size and the recording could not be saved: {}", reason),
        Some(RecordingEvent::FinishedWithoutExplicitStop { summary: None, .. }) => {
            bail!("Surface changed size before any frame was recorded")
        }
        Some(RecordingEvent::Failed { reason, .. }) => bail!("Recording failed: {}", reason),
        None => bail!("Recorder went away without reporting an outcome"),
    }
}

fn move_to_library(file: &Path, library: &Path) -> Result<PathBuf> {
    let name = file.file_name().context("Recording has no file name")?;
    let destination = library.join(name);
    if std::fs::rename(file, &destination).is_err() {
        // Different filesystem
        std::fs::copy(file, &destination)
            .with_context(|| format!("Failed to copy into {}", library.display()))?;
        std::fs::remove_file(file)?;
    }
    info!("Recording available at {}", destination.display());
    Ok(destination)
}
