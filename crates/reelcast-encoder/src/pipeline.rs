//! Frame encoding pipeline running on a dedicated worker
//!
//! [`FrameEncoder`] is the handle the capture side talks to. Every call only
//! enqueues a command; cropping, pixel conversion and stream writes all happen
//! on one worker thread, in submission order. Because `Finish` is queued
//! behind every earlier `Append`, the stream is closed only after all of them
//! were processed.

use crate::crop::crop_centered;
use crate::pixel::I420Buffer;
use crate::writer::{Mp4FileWriter, VideoSink};
use image::RgbaImage;
use reelcast_core::geometry;
use reelcast_core::{
    Error, LogicalSize, PixelSize, PresentationTime, RecorderConfig, RecordingSummary, Result,
    MAX_REFRESH_RATE,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Receiver resolved once the worker is done with the stream
pub type Completion = oneshot::Receiver<Result<RecordingSummary>>;

/// Parameters of one encoder instance
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Baseline logical size of the recorded surface
    pub logical_size: LogicalSize,
    /// Pixels per logical unit
    pub scale_factor: f64,
    /// Frames per second of the output timeline
    pub fps: u32,
    /// Video bitrate in kbps
    pub bitrate: u32,
    /// Frames allowed to queue behind the one being processed
    pub max_pending_frames: usize,
    /// Directory the output file is created in
    pub output_dir: PathBuf,
}

impl EncoderSettings {
    pub fn from_config(config: &RecorderConfig, logical_size: LogicalSize, fps: u32) -> Self {
        Self {
            logical_size,
            scale_factor: config.scale_factor,
            fps,
            bitrate: config.bitrate,
            max_pending_frames: config.max_pending_frames,
            output_dir: config.resolved_output_dir(),
        }
    }
}

enum Command {
    Append(RgbaImage),
    Finish,
    Abort,
}

/// Handle to a running encoder. One instance per recording, never reused.
pub struct FrameEncoder {
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicUsize>,
    output_path: PathBuf,
    dimensions: PixelSize,
    fps: u32,
    completion: Option<Completion>,
    closed: bool,
}

impl FrameEncoder {
    /// Create an encoder writing an H.264 MP4 file
    pub fn new(settings: EncoderSettings) -> Result<Self> {
        let bitrate = settings.bitrate;
        Self::with_sink(settings, move |path, size, fps| {
            Mp4FileWriter::create(path, size, fps, bitrate)
        })
    }

    /// Create an encoder whose stream is produced by `open_sink`.
    ///
    /// The sink is opened lazily on the worker when the first frame arrives.
    pub fn with_sink<S, F>(settings: EncoderSettings, open_sink: F) -> Result<Self>
    where
        S: VideoSink + 'static,
        F: FnOnce(&Path, PixelSize, u32) -> Result<S> + Send + 'static,
    {
        if settings.fps == 0 || settings.fps > MAX_REFRESH_RATE {
            return Err(Error::InvalidFrameRate(settings.fps));
        }

        let dimensions = geometry::normalize(settings.logical_size, settings.scale_factor);
        if dimensions.is_degenerate() {
            return Err(Error::DegenerateGeometry {
                width: dimensions.width,
                height: dimensions.height,
            });
        }

        if !settings.output_dir.is_dir() {
            return Err(Error::output_stream(format!(
                "output directory {} does not exist",
                settings.output_dir.display()
            )));
        }
        let output_path = settings
            .output_dir
            .join(format!("{}.mp4", Uuid::new_v4()));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        let worker_path = output_path.clone();
        let fps = settings.fps;
        let max_pending = settings.max_pending_frames;

        // The sink may not be Send, so it is built on the worker thread
        std::thread::Builder::new()
            .name("reelcast-encoder".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = done_tx.send(Err(Error::EncoderError(format!(
                            "Failed to create encoder runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                let worker = EncoderWorker {
                    open_sink: Some(open_sink),
                    sink: None,
                    path: worker_path,
                    dimensions,
                    fps,
                    max_pending,
                    pending: worker_pending,
                    frame_count: 0,
                    frames_written: 0,
                    frames_dropped: 0,
                };
                rt.block_on(worker.run(command_rx, done_tx));
            })
            .map_err(|e| Error::EncoderError(format!("Failed to spawn encoder worker: {}", e)))?;

        info!(
            "Frame encoder ready: {} ({} of {}) @ {} fps -> {}",
            dimensions,
            geometry::to_logical(dimensions, settings.scale_factor),
            settings.logical_size,
            fps,
            output_path.display()
        );

        Ok(Self {
            commands: command_tx,
            pending,
            output_path,
            dimensions,
            fps,
            completion: Some(done_rx),
            closed: false,
        })
    }

    /// Queue a captured raster. Never blocks.
    pub fn append(&self, image: RgbaImage) -> Result<()> {
        if self.closed {
            return Err(Error::NotRecording);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.commands.send(Command::Append(image)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::WorkerGone
        })
    }

    /// Close the stream after every queued frame has been written.
    ///
    /// Returns the output location at once. The file is only complete when
    /// the completion receiver resolves.
    pub fn finish(&mut self) -> PathBuf {
        self.close(Command::Finish);
        self.output_path.clone()
    }

    /// Stop without producing a file
    pub fn abort(&mut self) {
        self.close(Command::Abort);
    }

    /// Take the receiver that resolves when the worker is done
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Encoded frame size
    pub fn dimensions(&self) -> PixelSize {
        self.dimensions
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    fn close(&mut self, command: Command) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.commands.send(command).is_err() {
            warn!("Encoder worker already stopped");
        }
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// State owned exclusively by the worker thread
struct EncoderWorker<S, F> {
    open_sink: Option<F>,
    sink: Option<S>,
    path: PathBuf,
    dimensions: PixelSize,
    fps: u32,
    max_pending: usize,
    pending: Arc<AtomicUsize>,
    frame_count: u64,
    frames_written: u64,
    frames_dropped: u64,
}

impl<S, F> EncoderWorker<S, F>
where
    S: VideoSink,
    F: FnOnce(&Path, PixelSize, u32) -> Result<S>,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        done: oneshot::Sender<Result<RecordingSummary>>,
    ) {
        debug!("Encoder worker started");

        let outcome = loop {
            match commands.recv().await {
                Some(Command::Append(image)) => {
                    let backlog = self.pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                    if let Err(e) = self.append(image, backlog) {
                        error!("Encoder failed: {}", e);
                        self.discard();
                        break Err(e);
                    }
                }
                Some(Command::Finish) => break self.finish(),
                Some(Command::Abort) | None => {
                    self.discard();
                    break Err(Error::Aborted);
                }
            }
        };

        if done.send(outcome).is_err() {
            debug!("Nobody waiting for encoder completion");
        }
        debug!("Encoder worker stopped");
    }

    fn append(&mut self, image: RgbaImage, backlog: usize) -> Result<()> {
        if self.sink.is_none() {
            let open_sink = self.open_sink.take().ok_or(Error::WorkerGone)?;
            self.sink = Some(open_sink(&self.path, self.dimensions, self.fps)?);
        }
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return Err(Error::WorkerGone),
        };

        // The slot is consumed even if the frame is dropped below
        self.frame_count += 1;

        if !sink.is_ready_for_more_data() || backlog > self.max_pending {
            self.frames_dropped += 1;
            debug!(
                "Dropped frame {} (backlog {}, {} dropped so far)",
                self.frame_count, backlog, self.frames_dropped
            );
            return Ok(());
        }

        let pts = PresentationTime::for_frame(self.frame_count, self.fps);
        let cropped = crop_centered(&image, self.dimensions)?;
        let buffer = I420Buffer::from_rgba(&cropped)?;
        sink.append(buffer, pts)?;
        self.frames_written += 1;

        trace!("Appended frame {} at {}", self.frame_count, pts);
        Ok(())
    }

    fn finish(&mut self) -> Result<RecordingSummary> {
        let mut sink = match self.sink.take() {
            Some(sink) => sink,
            None => return Err(Error::EmptyRecording),
        };

        let end = PresentationTime::for_frame(self.frame_count, self.fps);
        match sink.finish(end) {
            Ok(duration) => {
                info!(
                    "Recording saved: {} frames written, {} dropped, {:.2}s",
                    self.frames_written,
                    self.frames_dropped,
                    duration.as_secs_f64()
                );
                Ok(RecordingSummary {
                    path: self.path.clone(),
                    frames_written: self.frames_written,
                    frames_dropped: self.frames_dropped,
                    duration,
                })
            }
            Err(Error::EmptyRecording) => {
                // Nothing was kept, and the sink already cleaned up
                warn!("No frame of {} was written", self.path.display());
                Err(Error::EmptyRecording)
            }
            Err(e) => {
                error!("Failed to finalize {}: {}", self.path.display(), e);
                sink.abort();
                Err(e)
            }
        }
    }

    fn discard(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.abort();
        }
    }
}
