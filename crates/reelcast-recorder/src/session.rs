//! Recording session state machine
//!
//! A session moves through `Idle -> Recording -> Finishing -> Idle`. Only
//! [`RecordingSession::start`] leaves `Idle`, and only the completion watcher
//! spawned by it returns there. The watcher is the single place a terminal
//! [`RecordingEvent`] is sent from, so every recording produces exactly one.

use crate::clock::FrameClock;
use reelcast_capture::Surface;
use reelcast_core::{
    Error, LogicalSize, RecorderConfig, RecordingEvent, RecordingSummary, Result, SessionId,
};
use reelcast_encoder::pipeline::Completion;
use reelcast_encoder::{EncoderSettings, FrameEncoder};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not recording; `start` is accepted
    Idle,
    /// The clock is armed and frames are being captured
    Recording,
    /// Capture has stopped and the encoder is draining
    Finishing,
}

/// Builds the encoder for each recording
pub type EncoderFactory = Box<dyn Fn(EncoderSettings) -> Result<FrameEncoder> + Send + Sync>;

/// How the current recording left `Recording`
enum StopReason {
    Requested,
    GeometryChanged,
    Failed(String),
}

/// Resources of the recording in progress
struct Active {
    id: SessionId,
    surface: Arc<dyn Surface>,
    baseline: LogicalSize,
    encoder: FrameEncoder,
}

struct Inner {
    state: SessionState,
    active: Option<Active>,
    clock: FrameClock,
    stop_reason: StopReason,
    output_path: Option<PathBuf>,
}

impl Inner {
    fn is_current(&self, id: SessionId) -> bool {
        self.state == SessionState::Recording
            && self.active.as_ref().is_some_and(|active| active.id == id)
    }

    /// Halt capture and let the encoder close the file
    fn finish(&mut self, reason: StopReason) -> Option<PathBuf> {
        self.clock.stop();
        self.state = SessionState::Finishing;
        self.stop_reason = reason;
        let path = self.active.as_mut().map(|active| active.encoder.finish());
        self.output_path = path.clone();
        path
    }

    /// Halt capture and throw the partial file away
    fn fail(&mut self, error: &Error) {
        self.clock.stop();
        self.state = SessionState::Finishing;
        self.stop_reason = StopReason::Failed(error.to_string());
        if let Some(active) = self.active.as_mut() {
            active.encoder.abort();
        }
    }
}

fn lock(shared: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records one surface at a time into a video file.
///
/// Terminal notifications arrive on the receiver returned by
/// [`RecordingSession::new`].
pub struct RecordingSession {
    config: RecorderConfig,
    inner: Arc<Mutex<Inner>>,
    events: mpsc::UnboundedSender<RecordingEvent>,
    encoder_factory: EncoderFactory,
}

impl RecordingSession {
    pub fn new(config: RecorderConfig) -> (Self, mpsc::UnboundedReceiver<RecordingEvent>) {
        Self::with_encoder_factory(config, Box::new(FrameEncoder::new))
    }

    /// Create a session whose encoders come from `encoder_factory`
    pub fn with_encoder_factory(
        config: RecorderConfig,
        encoder_factory: EncoderFactory,
    ) -> (Self, mpsc::UnboundedReceiver<RecordingEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            state: SessionState::Idle,
            active: None,
            clock: FrameClock::new(),
            stop_reason: StopReason::Requested,
            output_path: None,
        };
        let session = Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            events,
            encoder_factory,
        };
        (session, receiver)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    /// Location of the last file handed to the encoder.
    ///
    /// Set by `stop`, before the file is complete. It is only safe to read
    /// once the matching terminal event has arrived, and it is cleared when
    /// the recording failed.
    pub fn output_path(&self) -> Option<PathBuf> {
        lock(&self.inner).output_path.clone()
    }

    /// Identifier of the recording in progress
    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.inner).active.as_ref().map(|active| active.id)
    }

    /// Start recording `surface` at `fps` frames per second.
    ///
    /// Must be called from within a tokio runtime. Never blocks on the encoder.
    pub fn start(&self, surface: Arc<dyn Surface>, fps: u32) -> Result<SessionId> {
        let mut inner = lock(&self.inner);
        if inner.state != SessionState::Idle {
            warn!("Start rejected: recorder is {:?}", inner.state);
            return Err(Error::AlreadyRecording);
        }
        if fps == 0 {
            return Err(Error::InvalidFrameRate(fps));
        }
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let rate = FrameClock::effective_rate(fps, self.config.display_refresh_rate);
        if rate != fps {
            warn!(
                "{} fps exceeds the {} Hz display, recording at {} fps",
                fps, self.config.display_refresh_rate, rate
            );
        }

        let baseline = surface.logical_size();
        let settings = EncoderSettings::from_config(&self.config, baseline, rate);
        let mut encoder = (self.encoder_factory)(settings)?;
        let completion = encoder.take_completion().ok_or(Error::WorkerGone)?;

        let id = SessionId::new();
        let scale = self.config.scale_factor;
        let shared = Arc::downgrade(&self.inner);
        inner.clock.start(rate, move || match shared.upgrade() {
            Some(shared) => on_tick(&shared, id, scale),
            None => ControlFlow::Break(()),
        })?;

        inner.active = Some(Active {
            id,
            surface,
            baseline,
            encoder,
        });
        inner.state = SessionState::Recording;
        inner.stop_reason = StopReason::Requested;
        inner.output_path = None;

        runtime.spawn(watch_completion(
            Arc::clone(&self.inner),
            completion,
            self.events.clone(),
            id,
        ));

        info!("Recording {} started: {} at {} fps", id, baseline, rate);
        Ok(id)
    }

    /// Stop capturing and close the file.
    ///
    /// Returns the output location at once; the file is ready when the
    /// `FinishedSaving` event arrives.
    pub fn stop(&self) -> Result<PathBuf> {
        let mut inner = lock(&self.inner);
        if inner.state != SessionState::Recording {
            debug!("Stop rejected: recorder is {:?}", inner.state);
            return Err(Error::NotRecording);
        }
        let path = inner
            .finish(StopReason::Requested)
            .ok_or(Error::NotRecording)?;
        info!("Recording stopped, finalizing {}", path.display());
        Ok(path)
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if inner.state == SessionState::Recording {
            warn!("Recorder dropped while recording, discarding file");
            inner.fail(&Error::Aborted);
        }
    }
}

fn on_tick(shared: &Mutex<Inner>, id: SessionId, scale: f64) -> ControlFlow<()> {
    let (surface, baseline) = {
        let inner = lock(shared);
        match &inner.active {
            Some(active) if inner.is_current(id) => (Arc::clone(&active.surface), active.baseline),
            _ => return ControlFlow::Break(()),
        }
    };

    // Rendering happens without the lock so stop() is never held up by it
    let frame = surface.snapshot(scale);

    let mut inner = lock(shared);
    if !inner.is_current(id) {
        return ControlFlow::Break(());
    }

    let frame = match frame {
        Some(frame) => frame,
        None => {
            error!("Surface returned no image, aborting recording {}", id);
            inner.fail(&Error::CaptureUnavailable);
            return ControlFlow::Break(());
        }
    };

    if frame.logical_size != baseline {
        warn!(
            "Surface changed from {} to {}, stopping recording {}",
            baseline, frame.logical_size, id
        );
        inner.finish(StopReason::GeometryChanged);
        return ControlFlow::Break(());
    }

    let appended = match &inner.active {
        Some(active) => active.encoder.append(frame.into_image()),
        None => return ControlFlow::Break(()),
    };
    match appended {
        Ok(()) => ControlFlow::Continue(()),
        Err(Error::WorkerGone) => {
            // The watcher reports the worker's own error
            debug!("Encoder worker exited during recording {}", id);
            inner.clock.stop();
            ControlFlow::Break(())
        }
        Err(e) => {
            error!("Failed to queue frame: {}", e);
            inner.fail(&e);
            ControlFlow::Break(())
        }
    }
}

async fn watch_completion(
    shared: Arc<Mutex<Inner>>,
    completion: Completion,
    events: mpsc::UnboundedSender<RecordingEvent>,
    id: SessionId,
) {
    let outcome = completion.await.unwrap_or(Err(Error::WorkerGone));

    let event = {
        let mut inner = lock(&shared);
        inner.clock.stop();
        let reason = std::mem::replace(&mut inner.stop_reason, StopReason::Requested);
        let event = terminal_event(id, reason, outcome);
        if event.summary().is_none() {
            inner.output_path = None;
        }
        inner.active = None;
        inner.state = SessionState::Idle;
        event
    };

    match &event {
        RecordingEvent::FinishedSaving { summary, .. } => {
            info!("Recording {} saved to {}", id, summary.path.display())
        }
        RecordingEvent::FinishedWithoutExplicitStop {
            failure: Some(reason),
            ..
        } => error!(
            "Recording {} ended after the surface changed, but was not saved: {}",
            id, reason
        ),
        RecordingEvent::FinishedWithoutExplicitStop { .. } => {
            info!("Recording {} ended after the surface changed", id)
        }
        RecordingEvent::Failed { reason, .. } => error!("Recording {} failed: {}", id, reason),
    }

    if events.send(event).is_err() {
        debug!("No listener for recording events");
    }
}

fn terminal_event(
    session: SessionId,
    reason: StopReason,
    outcome: Result<RecordingSummary>,
) -> RecordingEvent {
    match (reason, outcome) {
        (StopReason::Failed(reason), _) => RecordingEvent::Failed { session, reason },
        (StopReason::GeometryChanged, Ok(summary)) => RecordingEvent::FinishedWithoutExplicitStop {
            session,
            summary: Some(summary),
            failure: None,
        },
        (StopReason::GeometryChanged, Err(Error::EmptyRecording)) => {
            warn!("Nothing was saved before the surface changed");
            RecordingEvent::FinishedWithoutExplicitStop {
                session,
                summary: None,
                failure: None,
            }
        }
        (StopReason::GeometryChanged, Err(e)) => RecordingEvent::FinishedWithoutExplicitStop {
            session,
            summary: None,
            failure: Some(e.to_string()),
        },
        (StopReason::Requested, Ok(summary)) => RecordingEvent::FinishedSaving { session, summary },
        (StopReason::Requested, Err(e)) => RecordingEvent::Failed {
            session,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcast_capture::PatternSurface;
    use reelcast_core::PresentationTime;
    use reelcast_encoder::{I420Buffer, VideoSink};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session(dir: &TempDir) -> (RecordingSession, UnboundedReceiver<RecordingEvent>) {
        let config = RecorderConfig::new()
            .with_output_dir(dir.path())
            .with_max_pending_frames(64);
        RecordingSession::new(config)
    }

    /// Accepts every frame, then cannot close the stream
    struct UnfinishableSink;

    impl VideoSink for UnfinishableSink {
        fn append(&mut self, _buffer: I420Buffer, _pts: PresentationTime) -> Result<()> {
            Ok(())
        }

        fn finish(&mut self, _end: PresentationTime) -> Result<Duration> {
            Err(Error::output_stream("disk full while finalizing"))
        }

        fn abort(&mut self) {}
    }

    fn surface() -> Arc<PatternSurface> {
        Arc::new(PatternSurface::new(LogicalSize::new(50.0, 40.0)))
    }

    async fn next_event(events: &mut UnboundedReceiver<RecordingEvent>) -> RecordingEvent {
        tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("no terminal event")
            .expect("event channel closed")
    }

    async fn assert_no_more_events(events: &mut UnboundedReceiver<RecordingEvent>) {
        let extra = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(extra.is_err(), "unexpected event: {:?}", extra);
    }

    #[test]
    fn test_stop_while_idle_fails() {
        let dir = tempdir().unwrap();
        let (session, _events) = session(&dir);
        assert!(matches!(session.stop(), Err(Error::NotRecording)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.output_path().is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let dir = tempdir().unwrap();
        let (session, _events) = session(&dir);
        let result = session.start(surface(), 30);
        assert!(matches!(result, Err(Error::NoRuntime)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_fps() {
        let dir = tempdir().unwrap();
        let (session, _events) = session(&dir);
        assert!(matches!(
            session.start(surface(), 0),
            Err(Error::InvalidFrameRate(0))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_scale() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new()
            .with_output_dir(dir.path())
            .with_scale_factor(0.0);
        let (session, _events) = RecordingSession::new(config);
        let result = session.start(surface(), 30);
        assert!(matches!(result, Err(Error::InvalidScaleFactor(_))));
        assert!(!result.unwrap_err().is_fatal());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_degenerate_surface() {
        let dir = tempdir().unwrap();
        let (session, _events) = session(&dir);
        let tiny = Arc::new(PatternSurface::new(LogicalSize::new(5.0, 5.0)));
        assert!(matches!(
            session.start(tiny, 30),
            Err(Error::DegenerateGeometry { .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_saves_exactly_once() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        let surface = surface();
        let id = session.start(surface.clone(), 20).unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.session_id(), Some(id));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let path = session.stop().unwrap();
        let captured = surface.snapshots_taken();
        assert_eq!(session.state(), SessionState::Finishing);
        assert_eq!(session.output_path(), Some(path.clone()));

        match next_event(&mut events).await {
            RecordingEvent::FinishedSaving { session: sid, summary } => {
                assert_eq!(sid, id);
                assert_eq!(summary.path, path);
                assert!(summary.frames_written >= 1);
                // Every frame captured before stop reached the encoder
                assert_eq!(summary.frames_written + summary.frames_dropped, captured);
            }
            other => panic!("expected FinishedSaving, got {:?}", other),
        }
        assert!(path.exists());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.session_id().is_none());
        assert_no_more_events(&mut events).await;
    }

    #[tokio::test]
    async fn test_start_while_recording_is_rejected() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        let id = session.start(surface(), 20).unwrap();

        assert!(matches!(
            session.start(surface(), 20),
            Err(Error::AlreadyRecording)
        ));
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.session_id(), Some(id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().unwrap();

        // Still busy while the encoder drains
        assert!(matches!(
            session.start(surface(), 20),
            Err(Error::AlreadyRecording)
        ));
        assert_eq!(session.state(), SessionState::Finishing);

        let event = next_event(&mut events).await;
        assert_eq!(event.session(), id);
        assert!(matches!(event, RecordingEvent::FinishedSaving { .. }));
    }

    #[tokio::test]
    async fn test_resize_stops_without_explicit_stop() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        let surface = surface();
        let id = session.start(surface.clone(), 30).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        surface.resize(LogicalSize::new(60.0, 40.0));

        match next_event(&mut events).await {
            RecordingEvent::FinishedWithoutExplicitStop {
                session: sid,
                summary,
                failure,
            } => {
                assert_eq!(sid, id);
                assert!(failure.is_none());
                let summary = summary.expect("frames before the resize are kept");
                assert!(summary.path.exists());
            }
            other => panic!("expected FinishedWithoutExplicitStop, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(session.stop(), Err(Error::NotRecording)));
        assert_no_more_events(&mut events).await;
    }

    #[tokio::test]
    async fn test_resize_before_first_frame_saves_nothing() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        let surface = surface();
        let id = session.start(surface.clone(), 30).unwrap();

        // The first tick has not run yet
        surface.resize(LogicalSize::new(60.0, 40.0));

        match next_event(&mut events).await {
            RecordingEvent::FinishedWithoutExplicitStop {
                session: sid,
                summary,
                failure,
            } => {
                assert_eq!(sid, id);
                assert!(summary.is_none());
                assert!(failure.is_none());
            }
            other => panic!("expected FinishedWithoutExplicitStop, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.output_path().is_none());
        assert_no_more_events(&mut events).await;
    }

    #[tokio::test]
    async fn test_resize_reports_finalize_failure() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new().with_output_dir(dir.path());
        let (session, mut events) = RecordingSession::with_encoder_factory(
            config,
            Box::new(|settings: EncoderSettings| {
                FrameEncoder::with_sink(settings, |_, _, _| Ok(UnfinishableSink))
            }),
        );
        let surface = surface();
        let id = session.start(surface.clone(), 20).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        surface.resize(LogicalSize::new(60.0, 40.0));

        match next_event(&mut events).await {
            RecordingEvent::FinishedWithoutExplicitStop {
                session: sid,
                summary,
                failure,
            } => {
                assert_eq!(sid, id);
                assert!(summary.is_none());
                let failure = failure.expect("finalize error reaches the caller");
                assert!(failure.contains("disk full while finalizing"), "{}", failure);
            }
            other => panic!("expected FinishedWithoutExplicitStop, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.output_path().is_none());
        assert_no_more_events(&mut events).await;
    }

    #[tokio::test]
    async fn test_capture_failure_fails_and_returns_to_idle() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        let surface = surface();
        session.start(surface.clone(), 20).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        surface.set_available(false);

        match next_event(&mut events).await {
            RecordingEvent::Failed { reason, .. } => {
                assert_eq!(reason, Error::CaptureUnavailable.to_string())
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.output_path().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // A later attempt can proceed
        surface.set_available(true);
        session.start(surface.clone(), 20).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            RecordingEvent::FinishedSaving { .. }
        ));
    }

    #[tokio::test]
    async fn test_frame_rate_capped_by_display() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new()
            .with_output_dir(dir.path())
            .with_display_refresh_rate(30);
        let seen = Arc::new(Mutex::new(None));
        let factory_seen = seen.clone();
        let (session, mut events) = RecordingSession::with_encoder_factory(
            config,
            Box::new(move |settings: EncoderSettings| {
                *factory_seen.lock().unwrap() = Some(settings.fps);
                FrameEncoder::new(settings)
            }),
        );

        session.start(surface(), 120).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(30));

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().unwrap();
        next_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_encoder_setup_failure_is_reported() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new().with_output_dir(dir.path().join("missing"));
        let (session, _events) = RecordingSession::new(config);

        let result = session.start(surface(), 30);
        assert!(matches!(result, Err(Error::OutputStream(_))));
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_dropping_session_discards_recording() {
        let dir = tempdir().unwrap();
        let (session, mut events) = session(&dir);
        session.start(surface(), 20).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(session);

        assert!(matches!(
            next_event(&mut events).await,
            RecordingEvent::Failed { .. }
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
