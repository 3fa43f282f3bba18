use crate::camera::{CameraDevice, CameraError, CameraStream};
use crate::config::{AppConfig, CallBudget, DisplayMode};
use crate::detect::{DetectError, ExpressionDetector, FaceLandmarks};
use crate::emotion::{dominant, DominantEmotion, ExpressionScores};
use crate::narrate::{NarrateError, NarrativeGenerator};
use crate::playback::{NarrationSink, PlaybackError};
use crate::voice::{VoiceClip, VoiceError, VoiceSynthesizer};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ModelLoading,
    CameraRequested,
    CameraReady,
    Analyzing,
    Resulted,
}

/// The detection half of a finished capture. Discarded on reset.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureResult {
    pub expressions: ExpressionScores,
    pub landmarks: Option<FaceLandmarks>,
}

/// The narration half. `clip` is `None` when voice synthesis failed but the
/// text survived.
#[derive(Clone, Debug, PartialEq)]
pub struct NarrationAsset {
    pub text: String,
    pub clip: Option<VoiceClip>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureReport {
    pub emotion: DominantEmotion,
    pub text: String,
    pub voice_error: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("the camera is not ready")]
    NotReady,

    #[error("detection models are not loaded")]
    ModelsNotLoaded,

    #[error("no face detected")]
    NoFaceDetected,

    #[error("capture superseded by reset")]
    Superseded,

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("detection failed: {0}")]
    Detect(DetectError),

    #[error("narration failed: {0}")]
    Narrate(#[from] NarrateError),
}

fn map_detect(e: DetectError) -> SessionError {
    match e {
        DetectError::ModelsNotLoaded => SessionError::ModelsNotLoaded,
        other => SessionError::Detect(other),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    pub budget: CallBudget,
    pub display: DisplayMode,
}

impl SessionOptions {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            budget: app.budget,
            display: app.display,
        }
    }
}

struct Meta {
    state: SessionState,
    result: Option<CaptureResult>,
    narration: Option<NarrationAsset>,
}

/// One webcam wellness session: owns the camera handle, the latest capture
/// and the latest narration, and drives the capture -> detect -> narrate ->
/// speak pipeline.
///
/// All handles are fields of this object; there are no process-wide
/// globals. Dropping the session releases them through the component
/// destructors, while [`CaptureSession::shutdown`] releases them
/// deterministically. A reset bumps the session generation; an in-flight
/// capture notices at its next suspension point and discards its result
/// instead of applying it.
pub struct CaptureSession<D, X, N, V, S> {
    camera_device: D,
    detector: X,
    narrator: N,
    voice: V,
    sink: S,
    options: SessionOptions,
    generation: AtomicU64,
    meta: Mutex<Meta>,
    stream: tokio::sync::Mutex<Option<Box<dyn CameraStream>>>,
}

impl<D, X, N, V, S> CaptureSession<D, X, N, V, S>
where
    D: CameraDevice,
    X: ExpressionDetector,
    N: NarrativeGenerator,
    V: VoiceSynthesizer,
    S: NarrationSink,
{
    pub fn new(
        camera_device: D,
        detector: X,
        narrator: N,
        voice: V,
        sink: S,
        options: SessionOptions,
    ) -> Self {
        Self {
            camera_device,
            detector,
            narrator,
            voice,
            sink,
            options,
            generation: AtomicU64::new(0),
            meta: Mutex::new(Meta {
                state: SessionState::Idle,
                result: None,
                narration: None,
            }),
            stream: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.meta().state
    }

    pub fn capture_result(&self) -> Option<CaptureResult> {
        self.meta().result.clone()
    }

    pub fn narration(&self) -> Option<NarrationAsset> {
        self.meta().narration.clone()
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        match self.meta.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.meta().state = state;
    }

    fn still_current(&self, generation: u64) -> Result<(), SessionError> {
        if self.generation.load(Ordering::Acquire) != generation {
            return Err(SessionError::Superseded);
        }
        Ok(())
    }

    /// Loads the detector models, then opens the camera. Both are awaited
    /// state transitions; the session is capture-ready only once this
    /// returns.
    pub async fn start(&self) -> Result<(), SessionError> {
        {
            let meta = self.meta();
            if meta.state != SessionState::Idle {
                tracing::debug!(state = ?meta.state, "start ignored, session already running");
                return Ok(());
            }
        }

        self.set_state(SessionState::ModelLoading);
        if let Err(e) = self.detector.warm_up().await {
            self.set_state(SessionState::Idle);
            return Err(map_detect(e));
        }

        self.set_state(SessionState::CameraRequested);
        match self.camera_device.open().await {
            Ok(stream) => {
                *self.stream.lock().await = Some(stream);
                self.set_state(SessionState::CameraReady);
                tracing::info!("camera ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Idle);
                Err(SessionError::Camera(e))
            }
        }
    }

    /// The user-triggered operation: one detection attempt on the current
    /// frame, freeze on success, then the narrative and voice calls.
    /// Re-entrant only after [`CaptureSession::reset`].
    pub async fn capture_and_narrate(&self) -> Result<CaptureReport, SessionError> {
        let generation = self.generation.load(Ordering::Acquire);

        {
            let mut meta = self.meta();
            match meta.state {
                SessionState::CameraReady => meta.state = SessionState::Analyzing,
                SessionState::ModelLoading => return Err(SessionError::ModelsNotLoaded),
                _ => return Err(SessionError::NotReady),
            }
        }

        let outcome = self.run_pipeline(generation).await;
        if let Err(e) = &outcome {
            match e {
                // The reset that superseded us already set a safe state.
                SessionError::Superseded => {}
                // Recoverable before the freeze: the camera is still live.
                SessionError::NoFaceDetected
                | SessionError::Detect(_)
                | SessionError::Camera(_)
                | SessionError::ModelsNotLoaded => {
                    if self.still_current(generation).is_ok() {
                        self.set_state(SessionState::CameraReady);
                    }
                }
                _ => {}
            }
        }
        outcome
    }

    async fn run_pipeline(&self, generation: u64) -> Result<CaptureReport, SessionError> {
        let frame = {
            let mut guard = self.stream.lock().await;
            let stream = guard.as_mut().ok_or(SessionError::NotReady)?;
            stream.grab_frame().await.map_err(SessionError::Camera)?
        };
        self.still_current(generation)?;

        // Single attempt; an empty result is a normal outcome, not a retry
        // trigger.
        let faces = match timeout(self.options.budget.detect(), self.detector.detect(frame)).await
        {
            Ok(Ok(faces)) => faces,
            Ok(Err(e)) => return Err(map_detect(e)),
            Err(_) => return Err(SessionError::Detect(DetectError::Timeout)),
        };
        self.still_current(generation)?;

        // Additional faces are ignored.
        let Some(face) = faces.into_iter().next() else {
            return Err(SessionError::NoFaceDetected);
        };

        // Freeze transition: release the camera. One-way until reset. The
        // generation is re-checked under the stream lock so a reset's
        // freshly opened stream can never be closed by a stale capture.
        {
            let mut guard = self.stream.lock().await;
            self.still_current(generation)?;
            if let Some(mut stream) = guard.take() {
                if let Err(e) = stream.close().await {
                    tracing::warn!(error = %e, "camera close during freeze reported an error");
                }
            }
        }
        tracing::info!("frame frozen, camera released");

        let emotion = dominant(&face.expressions);
        {
            let mut meta = self.meta();
            meta.result = Some(CaptureResult {
                expressions: face.expressions,
                landmarks: face.landmarks,
            });
        }
        tracing::info!(label = %emotion.label, intensity = emotion.intensity, "dominant emotion selected");

        let text = match timeout(
            self.options.budget.narrate(),
            self.narrator.generate(emotion.label, emotion.intensity),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                // Terminal partial state: the freeze is not rolled back.
                self.still_current(generation)?;
                self.set_state(SessionState::Resulted);
                return Err(SessionError::Narrate(e));
            }
            Err(_) => {
                self.still_current(generation)?;
                self.set_state(SessionState::Resulted);
                return Err(SessionError::Narrate(NarrateError::Timeout));
            }
        };
        self.still_current(generation)?;

        // Voice failure does not discard the text.
        let (clip, voice_error) = match timeout(
            self.options.budget.voice(),
            self.voice.synthesize(text.clone()),
        )
        .await
        {
            Ok(Ok(clip)) => (Some(clip), None),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "voice synthesis failed, keeping text-only narration");
                (None, Some(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("voice synthesis timed out, keeping text-only narration");
                (None, Some(VoiceError::Timeout.to_string()))
            }
        };
        self.still_current(generation)?;

        {
            let mut meta = self.meta();
            meta.narration = Some(NarrationAsset {
                text: text.clone(),
                clip: clip.clone(),
            });
            meta.state = SessionState::Resulted;
        }

        if self.options.display == DisplayMode::AutoPlay {
            if let Some(clip) = clip {
                if let Err(e) = self.sink.play(clip).await {
                    tracing::warn!(error = %e, "narration auto-play failed");
                }
            }
        }

        Ok(CaptureReport {
            emotion,
            text,
            voice_error,
        })
    }

    /// Plays the stored narration clip, if there is one. Returns whether a
    /// clip was available.
    pub async fn play_narration(&self) -> Result<bool, PlaybackError> {
        let clip = self.meta().narration.as_ref().and_then(|n| n.clip.clone());
        match clip {
            Some(clip) => {
                self.sink.play(clip).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops any playing audio, discards the capture and narration, and
    /// re-opens the camera. Any in-flight capture becomes stale. Safe to
    /// call repeatedly.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.sink.stop();
        {
            let mut meta = self.meta();
            meta.result = None;
            meta.narration = None;
        }

        let mut guard = self.stream.lock().await;
        // Release before reacquiring; handles are never reused.
        if let Some(mut stream) = guard.take() {
            if let Err(e) = stream.close().await {
                tracing::warn!(error = %e, "camera close during reset reported an error");
            }
        }
        match self.camera_device.open().await {
            Ok(stream) => {
                *guard = Some(stream);
                drop(guard);
                self.set_state(SessionState::CameraReady);
                tracing::info!("session reset, camera ready");
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.set_state(SessionState::Idle);
                Err(SessionError::Camera(e))
            }
        }
    }

    /// Deterministic teardown: stops audio and releases the camera.
    pub async fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.sink.stop();
        {
            let mut meta = self.meta();
            meta.result = None;
            meta.narration = None;
            meta.state = SessionState::Idle;
        }
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            if let Err(e) = stream.close().await {
                tracing::warn!(error = %e, "camera close during shutdown reported an error");
            }
        }
        tracing::info!("session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraFrame;
    use crate::detect::Face;
    use crate::emotion::Emotion;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct StubCamera {
        opens: Arc<AtomicUsize>,
        live_streams: Arc<AtomicUsize>,
    }

    struct StubStream {
        live_streams: Arc<AtomicUsize>,
        closed: bool,
    }

    impl CameraDevice for StubCamera {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>> {
            let opens = Arc::clone(&self.opens);
            let live = Arc::clone(&self.live_streams);
            async move {
                opens.fetch_add(1, Ordering::Relaxed);
                live.fetch_add(1, Ordering::Relaxed);
                Ok(Box::new(StubStream {
                    live_streams: live,
                    closed: false,
                }) as Box<dyn CameraStream>)
            }
            .boxed()
        }
    }

    impl CameraStream for StubStream {
        fn grab_frame(&mut self) -> BoxFuture<'_, Result<CameraFrame, CameraError>> {
            let closed = self.closed;
            async move {
                if closed {
                    return Err(CameraError::NotOpen);
                }
                Ok(CameraFrame {
                    width: 2,
                    height: 2,
                    rgb: Bytes::from_static(&[0; 12]),
                })
            }
            .boxed()
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), CameraError>> {
            if !self.closed {
                self.closed = true;
                self.live_streams.fetch_sub(1, Ordering::Relaxed);
            }
            async { Ok(()) }.boxed()
        }
    }

    impl Drop for StubStream {
        fn drop(&mut self) {
            if !self.closed {
                self.live_streams.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    fn happy_face() -> Face {
        Face {
            expressions: ExpressionScores {
                happy: 0.8,
                neutral: 0.1,
                sad: 0.1,
                ..Default::default()
            },
            landmarks: None,
        }
    }

    #[derive(Clone)]
    struct FacesDetector {
        faces: Vec<Face>,
    }

    impl ExpressionDetector for FacesDetector {
        fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>> {
            async { Ok(()) }.boxed()
        }

        fn detect(&self, _frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>> {
            let faces = self.faces.clone();
            async move { Ok(faces) }.boxed()
        }
    }

    #[derive(Clone)]
    struct GatedDetector {
        entered: Arc<Notify>,
        gate: Arc<Notify>,
    }

    impl ExpressionDetector for GatedDetector {
        fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>> {
            async { Ok(()) }.boxed()
        }

        fn detect(&self, _frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>> {
            let entered = Arc::clone(&self.entered);
            let gate = Arc::clone(&self.gate);
            async move {
                entered.notify_one();
                gate.notified().await;
                Ok(vec![happy_face()])
            }
            .boxed()
        }
    }

    #[derive(Clone)]
    struct StubNarrator;

    impl NarrativeGenerator for StubNarrator {
        fn generate(
            &self,
            _emotion: Emotion,
            _intensity: u8,
        ) -> BoxFuture<'_, Result<String, NarrateError>> {
            async { Ok("take one slow breath".to_owned()) }.boxed()
        }
    }

    #[derive(Clone)]
    struct StubVoice {
        fail: bool,
    }

    impl VoiceSynthesizer for StubVoice {
        fn synthesize(&self, _text: String) -> BoxFuture<'_, Result<VoiceClip, VoiceError>> {
            let fail = self.fail;
            async move {
                if fail {
                    return Err(VoiceError::Api(500, "synthesis unavailable".to_owned()));
                }
                Ok(VoiceClip {
                    sample_rate_hz: 8_000,
                    channels: 1,
                    pcm_i16: vec![0; 800],
                })
            }
            .boxed()
        }
    }

    #[derive(Clone, Default)]
    struct CountingSink {
        plays: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl NarrationSink for CountingSink {
        fn play(&self, _clip: VoiceClip) -> BoxFuture<'_, Result<(), PlaybackError>> {
            self.plays.fetch_add(1, Ordering::Relaxed);
            async { Ok(()) }.boxed()
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn options(display: DisplayMode) -> SessionOptions {
        SessionOptions {
            budget: CallBudget::default(),
            display,
        }
    }

    fn session(
        camera: StubCamera,
        faces: Vec<Face>,
        voice_fails: bool,
        display: DisplayMode,
    ) -> CaptureSession<StubCamera, FacesDetector, StubNarrator, StubVoice, CountingSink> {
        CaptureSession::new(
            camera,
            FacesDetector { faces },
            StubNarrator,
            StubVoice { fail: voice_fails },
            CountingSink::default(),
            options(display),
        )
    }

    #[tokio::test]
    async fn capture_before_start_is_not_ready() {
        let s = session(
            StubCamera::default(),
            vec![happy_face()],
            false,
            DisplayMode::Manual,
        );
        assert!(matches!(
            s.capture_and_narrate().await,
            Err(SessionError::NotReady)
        ));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn full_run_freezes_camera_and_stores_narration() {
        let camera = StubCamera::default();
        let live = Arc::clone(&camera.live_streams);
        let s = session(camera, vec![happy_face()], false, DisplayMode::Manual);

        s.start().await.expect("start");
        assert_eq!(s.state(), SessionState::CameraReady);
        assert_eq!(live.load(Ordering::Relaxed), 1);

        let report = s.capture_and_narrate().await.expect("capture");
        assert_eq!(report.emotion.label, Emotion::Happy);
        assert_eq!(report.emotion.intensity, 8);
        assert_eq!(report.text, "take one slow breath");
        assert!(report.voice_error.is_none());

        assert_eq!(s.state(), SessionState::Resulted);
        assert_eq!(live.load(Ordering::Relaxed), 0, "camera must be released");
        let narration = s.narration().expect("narration stored");
        assert!(narration.clip.is_some());
        assert!(s.capture_result().is_some());
    }

    #[tokio::test]
    async fn empty_detection_leaves_camera_live() {
        let camera = StubCamera::default();
        let live = Arc::clone(&camera.live_streams);
        let s = session(camera, Vec::new(), false, DisplayMode::Manual);

        s.start().await.expect("start");
        assert!(matches!(
            s.capture_and_narrate().await,
            Err(SessionError::NoFaceDetected)
        ));
        assert_eq!(s.state(), SessionState::CameraReady);
        assert_eq!(live.load(Ordering::Relaxed), 1, "no freeze on empty detection");
        assert!(s.capture_result().is_none());
        assert!(s.narration().is_none());
    }

    #[tokio::test]
    async fn voice_failure_preserves_text_only_narration() {
        let s = session(
            StubCamera::default(),
            vec![happy_face()],
            true,
            DisplayMode::Manual,
        );
        s.start().await.expect("start");

        let report = s.capture_and_narrate().await.expect("capture succeeds");
        assert!(report.voice_error.is_some());
        assert_eq!(s.state(), SessionState::Resulted);

        let narration = s.narration().expect("text-only narration stored");
        assert_eq!(narration.text, "take one slow breath");
        assert!(narration.clip.is_none());
    }

    #[tokio::test]
    async fn auto_play_mode_plays_the_clip_once() {
        let camera = StubCamera::default();
        let s = session(camera, vec![happy_face()], false, DisplayMode::AutoPlay);
        let plays = Arc::clone(&s.sink.plays);

        s.start().await.expect("start");
        s.capture_and_narrate().await.expect("capture");
        assert_eq!(plays.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn manual_mode_does_not_auto_play() {
        let s = session(
            StubCamera::default(),
            vec![happy_face()],
            false,
            DisplayMode::Manual,
        );
        let plays = Arc::clone(&s.sink.plays);

        s.start().await.expect("start");
        s.capture_and_narrate().await.expect("capture");
        assert_eq!(plays.load(Ordering::Relaxed), 0);

        assert!(s.play_narration().await.expect("play"));
        assert_eq!(plays.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn reset_releases_audio_and_reopens_camera() {
        let camera = StubCamera::default();
        let opens = Arc::clone(&camera.opens);
        let live = Arc::clone(&camera.live_streams);
        let s = session(camera, vec![happy_face()], false, DisplayMode::AutoPlay);
        let stops = Arc::clone(&s.sink.stops);

        s.start().await.expect("start");
        s.capture_and_narrate().await.expect("capture");

        s.reset().await.expect("reset");
        assert!(stops.load(Ordering::Relaxed) >= 1, "audio must be stopped");
        assert!(s.narration().is_none());
        assert!(s.capture_result().is_none());
        assert_eq!(s.state(), SessionState::CameraReady);
        assert_eq!(opens.load(Ordering::Relaxed), 2, "camera reopened");
        assert_eq!(live.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn double_reset_is_harmless() {
        let camera = StubCamera::default();
        let opens = Arc::clone(&camera.opens);
        let s = session(camera, vec![happy_face()], false, DisplayMode::Manual);

        s.start().await.expect("start");
        s.reset().await.expect("first reset");
        s.reset().await.expect("second reset");
        assert_eq!(s.state(), SessionState::CameraReady);
        assert_eq!(opens.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn reset_supersedes_an_inflight_capture() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let camera = StubCamera::default();
        let opens = Arc::clone(&camera.opens);

        let s = Arc::new(CaptureSession::new(
            camera,
            GatedDetector {
                entered: Arc::clone(&entered),
                gate: Arc::clone(&gate),
            },
            StubNarrator,
            StubVoice { fail: false },
            CountingSink::default(),
            options(DisplayMode::Manual),
        ));

        s.start().await.expect("start");

        let capture = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.capture_and_narrate().await })
        };

        // Wait until the capture is suspended inside the detector, then
        // reset underneath it.
        entered.notified().await;
        s.reset().await.expect("reset");
        gate.notify_one();

        let outcome = capture.await.expect("capture task");
        assert!(matches!(outcome, Err(SessionError::Superseded)));
        assert_eq!(s.state(), SessionState::CameraReady);
        assert!(s.narration().is_none());
        assert!(s.capture_result().is_none());
        assert_eq!(opens.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn shutdown_releases_every_handle() {
        let camera = StubCamera::default();
        let live = Arc::clone(&camera.live_streams);
        let s = session(camera, vec![happy_face()], false, DisplayMode::AutoPlay);
        let stops = Arc::clone(&s.sink.stops);

        s.start().await.expect("start");
        s.capture_and_narrate().await.expect("capture");
        s.reset().await.expect("reset");

        s.shutdown().await;
        assert_eq!(live.load(Ordering::Relaxed), 0);
        assert!(stops.load(Ordering::Relaxed) >= 2);
        assert_eq!(s.state(), SessionState::Idle);
    }
}
