//! Interactive session
//!
//! The session owns every piece of shared state (surface, pen, capture mode,
//! recognition loop, presentation) and processes one [`SessionEvent`] at a
//! time from a single queue. Handlers are synchronous and never await, so an
//! event can never observe another one half-applied. Work that has to wait
//! (prediction calls, camera acquisition, microphone permission, debounce
//! and restart timers) runs in spawned tasks that post their completion back
//! onto the queue.
//!
//! Pointer input, UI controls and voice commands all end up in
//! [`Session::perform`], so a spoken "clear" and a clicked clear are the
//! same code path.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::camera::{CameraSource, VideoStream};
use crate::compositor::{self, Snapshot};
use crate::config::Config;
use crate::controller::{RecognitionLoop, ResponseOutcome};
use crate::error::TransportError;
use crate::input::{InputCapture, PointerSample, ScreenRect};
use crate::prediction::{Predictor, RecognitionRequest, RecognitionResult, RequestMode};
use crate::presentation::{
    self, DetailPanel, DigitDisplay, NoticeLevel, Presentation, PresentationUpdate,
    VoiceIndicator,
};
use crate::surface::{BACKGROUND, Surface, TRANSPARENT};
use crate::voice::{
    RestartPolicy, SpeechBackend, VoiceCommand, VoiceDispatcher, VoiceEvent, VoiceOutcome,
    VoiceState,
};
use crate::Result;

/// What the surface is currently fed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Nothing drawn since the last clear
    Idle,
    /// Freehand strokes or an uploaded image
    FreehandDrawing,
    /// Camera feed under the surface, streaming recognition
    LiveCamera,
}

/// User-level operations shared by controls and voice commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Clear the surface and readout
    Clear,
    /// Recognize the current surface once
    Recognize,
    /// Start or stop the live camera
    ToggleCamera,
    /// Switch between pen and eraser
    ToggleEraser,
    /// Start or stop voice commands
    ToggleVoice,
    /// Draw an encoded image onto the surface and recognize it
    Upload(Vec<u8>),
}

/// Pointer or touch gesture
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    /// Button pressed or finger down
    Down(PointerSample),
    /// Pointer moved
    Move(PointerSample),
    /// Button released or finger lifted
    Up,
    /// Pointer left the surface
    Leave,
}

/// Everything the session reacts to
pub enum SessionEvent {
    /// Pointer input
    Pointer(PointerEvent),
    /// Control or voice action
    Action(Action),
    /// Debounce after a stroke elapsed
    StrokeSettled {
        /// Stroke number, for tracing
        stroke: u64,
    },
    /// A prediction call completed
    PredictionFinished {
        /// Request mode
        mode: RequestMode,
        /// Snapshot sequence
        sequence: u64,
        /// Outcome
        result: std::result::Result<RecognitionResult, TransportError>,
    },
    /// Camera acquisition completed
    CameraAcquired {
        /// Attempt number, stale attempts are released
        attempt: u64,
        /// Acquired stream
        result: Result<Box<dyn VideoStream>>,
    },
    /// Voice task report
    Voice(VoiceEvent),
    /// Stop the event loop
    Shutdown,
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pointer(p) => f.debug_tuple("Pointer").field(p).finish(),
            Self::Action(a) => f.debug_tuple("Action").field(a).finish(),
            Self::StrokeSettled { stroke } => {
                f.debug_struct("StrokeSettled").field("stroke", stroke).finish()
            }
            Self::PredictionFinished {
                mode,
                sequence,
                result,
            } => f
                .debug_struct("PredictionFinished")
                .field("mode", mode)
                .field("sequence", sequence)
                .field("ok", &result.is_ok())
                .finish(),
            Self::CameraAcquired { attempt, result } => f
                .debug_struct("CameraAcquired")
                .field("attempt", attempt)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Voice(v) => f.debug_tuple("Voice").field(v).finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Session timing and size
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Surface width
    pub width: u32,
    /// Surface height
    pub height: u32,
    /// Streaming cycle period
    pub stream_interval: Duration,
    /// Stroke debounce
    pub debounce: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            width: config.surface.width,
            height: config.surface.height,
            stream_interval: config.recognition.stream_interval,
            debounce: config.recognition.debounce,
        }
    }
}

/// Cloneable sender into a session's queue
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Queue an event; false if the session is gone
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queue a pointer event
    pub fn pointer(&self, event: PointerEvent) -> bool {
        self.send(SessionEvent::Pointer(event))
    }

    /// Queue an action
    pub fn action(&self, action: Action) -> bool {
        self.send(SessionEvent::Action(action))
    }

    /// Ask the session to stop
    pub fn shutdown(&self) -> bool {
        self.send(SessionEvent::Shutdown)
    }
}

/// The single-threaded interaction core
pub struct Session {
    settings: SessionSettings,
    surface: Surface,
    input: InputCapture,
    mode: CaptureMode,
    camera: CameraSource,
    camera_attempt: u64,
    camera_pending: Option<JoinHandle<()>>,
    recognition: RecognitionLoop,
    presentation: Presentation,
    voice: VoiceDispatcher,
    predictor: Arc<dyn Predictor>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    ticker: Option<Interval>,
    strokes: u64,
    running: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("camera", &self.camera)
            .field("recognition", &self.recognition)
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with voice unavailable
    #[must_use]
    pub fn new(settings: SessionSettings, predictor: Arc<dyn Predictor>, camera: CameraSource) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let surface = Surface::new(settings.width, settings.height);
        let input = InputCapture::new(ScreenRect::identity(&surface));
        let voice = VoiceDispatcher::new(None, RestartPolicy::default(), voice_emitter(&tx));

        let mut presentation = Presentation::new();
        presentation.set_voice(VoiceIndicator::Hidden);

        Self {
            settings,
            surface,
            input,
            mode: CaptureMode::Idle,
            camera,
            camera_attempt: 0,
            camera_pending: None,
            recognition: RecognitionLoop::new(),
            presentation,
            voice,
            predictor,
            tx,
            rx,
            ticker: None,
            strokes: 0,
            running: true,
        }
    }

    /// Attach a speech backend
    #[must_use]
    pub fn with_voice(mut self, backend: Arc<dyn SpeechBackend>, policy: RestartPolicy) -> Self {
        self.voice.disable();
        self.voice = VoiceDispatcher::new(Some(backend), policy, voice_emitter(&self.tx));
        self.presentation.set_voice(VoiceIndicator::Off);
        self
    }

    /// Sender for feeding events from other tasks
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to presentation changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationUpdate> {
        self.presentation.subscribe()
    }

    /// Settings the session was built with
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Drawing surface
    #[must_use]
    pub const fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Presentation state
    #[must_use]
    pub const fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    /// Recognition loop state
    #[must_use]
    pub const fn recognition(&self) -> &RecognitionLoop {
        &self.recognition
    }

    /// Current capture mode
    #[must_use]
    pub const fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Whether a camera stream is held
    #[must_use]
    pub const fn camera_active(&self) -> bool {
        self.camera.is_active()
    }

    /// Whether a camera acquisition is outstanding
    #[must_use]
    pub const fn camera_pending(&self) -> bool {
        self.camera_pending.is_some()
    }

    /// Voice dispatcher state
    #[must_use]
    pub const fn voice_state(&self) -> VoiceState {
        self.voice.state()
    }

    /// Most recent voice utterance
    #[must_use]
    pub fn last_utterance(&self) -> Option<&str> {
        self.voice.last_utterance()
    }

    /// Update where the surface is displayed, for coordinate mapping
    pub const fn set_screen_rect(&mut self, bounds: ScreenRect) {
        self.input.set_bounds(bounds);
    }

    /// Render the surface, camera frame and overlays as the user sees them
    #[must_use]
    pub fn render(&self) -> RgbaImage {
        let frame = if self.mode == CaptureMode::LiveCamera {
            self.camera.current_frame().ok()
        } else {
            None
        };
        presentation::render(&self.surface, &self.presentation, frame.as_deref())
    }

    /// Process events until shutdown
    pub async fn run(&mut self) {
        tracing::info!(
            width = self.settings.width,
            height = self.settings.height,
            "session started"
        );
        while self.step().await {}
        self.close();
    }

    /// Wait for and process one event or stream tick
    ///
    /// Returns false once the session has been shut down. Cancel safe.
    pub async fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }

        let event = tokio::select! {
            biased;
            event = self.rx.recv() => event,
            () = next_tick(&mut self.ticker) => {
                self.on_stream_tick();
                return self.running;
            }
        };

        match event {
            Some(event) => self.handle_event(event),
            None => self.running = false,
        }
        self.running
    }

    /// Apply one event
    pub fn handle_event(&mut self, event: SessionEvent) {
        tracing::trace!(?event, "session event");
        match event {
            SessionEvent::Pointer(pointer) => self.on_pointer(pointer),
            SessionEvent::Action(action) => self.perform(action),
            SessionEvent::StrokeSettled { stroke } => self.on_stroke_settled(stroke),
            SessionEvent::PredictionFinished {
                mode,
                sequence,
                result,
            } => {
                let outcome =
                    self.recognition
                        .on_response(mode, sequence, result, &mut self.presentation);
                if let ResponseOutcome::Rejected(reason) = outcome {
                    tracing::trace!(sequence, ?reason, "response rejected");
                }
            }
            SessionEvent::CameraAcquired { attempt, result } => {
                self.on_camera_acquired(attempt, result);
            }
            SessionEvent::Voice(event) => {
                let outcome = self.voice.handle(event);
                self.on_voice_outcome(outcome);
            }
            SessionEvent::Shutdown => self.running = false,
        }
    }

    /// Run a user-level action
    pub fn perform(&mut self, action: Action) {
        tracing::debug!(?action, mode = ?self.mode, "action");
        match action {
            Action::Clear => self.clear(),
            Action::Recognize => self.recognize(),
            Action::ToggleCamera => self.toggle_camera(),
            Action::ToggleEraser => {
                let mode = self.surface.toggle_eraser();
                self.presentation.set_eraser(mode);
            }
            Action::ToggleVoice => {
                let outcome = self.voice.toggle();
                self.on_voice_outcome(outcome);
            }
            Action::Upload(bytes) => self.upload(&bytes),
        }
    }

    fn clear(&mut self) {
        self.surface.clear();
        self.recognition.invalidate_issued();
        self.presentation.show_cleared();
        if self.mode == CaptureMode::FreehandDrawing && !self.input.is_drawing() {
            self.mode = CaptureMode::Idle;
        }
    }

    fn recognize(&mut self) {
        let (surface, camera, mode) = (&self.surface, &self.camera, self.mode);
        let request = self.recognition.request_single(
            |sequence| snapshot_of(surface, camera, mode, sequence),
            &mut self.presentation,
        );
        self.dispatch(request);
    }

    fn upload(&mut self, bytes: &[u8]) {
        // Decode first so a bad file changes nothing
        let image = match image::load_from_memory(bytes) {
            Ok(image) => image,
            Err(e) => {
                self.presentation
                    .notify(NoticeLevel::Warning, format!("could not read image: {e}"));
                return;
            }
        };

        if self.mode == CaptureMode::LiveCamera || self.camera_pending.is_some() {
            self.stop_camera();
        }
        self.input.cancel();
        self.surface.draw_image_fitted(&image);
        self.mode = CaptureMode::FreehandDrawing;
        tracing::info!(width = image.width(), height = image.height(), "image uploaded");
        self.recognize();
    }

    fn toggle_camera(&mut self) {
        if self.mode == CaptureMode::LiveCamera {
            self.stop_camera();
            return;
        }
        if self.camera_pending.is_some() {
            tracing::info!(attempt = self.camera_attempt, "camera start cancelled");
            self.stop_camera();
            return;
        }

        // Release if held, even though we think it's off
        self.camera.stop();
        self.camera_attempt += 1;
        let attempt = self.camera_attempt;
        let acquire = self.camera.acquire();
        let tx = self.tx.clone();
        self.camera_pending = Some(tokio::spawn(async move {
            let result = acquire.await;
            let _ = tx.send(SessionEvent::CameraAcquired { attempt, result });
        }));
        tracing::debug!(attempt, "camera acquisition started");
    }

    fn on_camera_acquired(&mut self, attempt: u64, result: Result<Box<dyn VideoStream>>) {
        if attempt != self.camera_attempt || self.camera_pending.is_none() {
            if let Ok(mut stream) = result {
                stream.stop();
                tracing::debug!(attempt, "stray camera stream released");
            }
            return;
        }
        self.camera_pending = None;

        match result {
            Ok(stream) => self.enter_live_camera(stream),
            Err(e) => {
                self.presentation.set_camera(false);
                self.presentation
                    .notify(NoticeLevel::Warning, format!("camera failed to start: {e}"));
            }
        }
    }

    fn enter_live_camera(&mut self, stream: Box<dyn VideoStream>) {
        self.input.cancel();
        self.camera.install(stream);

        self.surface.set_background(TRANSPARENT);
        self.clear();
        self.mode = CaptureMode::LiveCamera;

        self.recognition.set_streaming(true);
        let period = self.settings.stream_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);

        self.presentation.set_camera(true);
    }

    fn stop_camera(&mut self) {
        if let Some(pending) = self.camera_pending.take() {
            pending.abort();
        }
        // Bump so a completion already queued is treated as stray
        self.camera_attempt += 1;
        self.camera.stop();

        self.recognition.set_streaming(false);
        self.ticker = None;

        if self.mode == CaptureMode::LiveCamera {
            self.input.cancel();
            self.surface.set_background(BACKGROUND);
            self.surface.clear();
            self.presentation.set_overlays(Vec::new());
            self.mode = CaptureMode::Idle;
        }
        self.presentation.set_camera(false);
    }

    fn on_pointer(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down(sample) => {
                let Some(point) = InputCapture::locate(&sample) else {
                    return;
                };
                if self.mode == CaptureMode::Idle {
                    self.mode = CaptureMode::FreehandDrawing;
                }
                self.input.on_stroke_start(&mut self.surface, point);
            }
            PointerEvent::Move(sample) => {
                if let Some(point) = InputCapture::locate(&sample) {
                    self.input.on_stroke_move(&mut self.surface, point);
                }
            }
            PointerEvent::Up | PointerEvent::Leave => {
                if self.input.on_stroke_end().is_some() {
                    self.schedule_settle();
                }
            }
        }
    }

    fn schedule_settle(&mut self) {
        if self.mode == CaptureMode::LiveCamera {
            return;
        }

        self.strokes += 1;
        let stroke = self.strokes;
        let delay = self.settings.debounce;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::StrokeSettled { stroke });
        });
    }

    fn on_stroke_settled(&mut self, stroke: u64) {
        if self.mode == CaptureMode::LiveCamera {
            tracing::trace!(stroke, "stroke recognition suspended by live camera");
            return;
        }
        tracing::trace!(stroke, "stroke settled");
        self.recognize();
    }

    fn on_stream_tick(&mut self) {
        let (surface, camera, mode) = (&self.surface, &self.camera, self.mode);
        if let Some(request) = self
            .recognition
            .on_tick(|sequence| snapshot_of(surface, camera, mode, sequence))
        {
            self.dispatch(request);
        }
    }

    fn dispatch(&self, request: RecognitionRequest) {
        let predictor = Arc::clone(&self.predictor);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let RecognitionRequest { snapshot, mode } = request;
            let sequence = snapshot.sequence();
            let result = predictor.predict(&snapshot, mode).await;
            let _ = tx.send(SessionEvent::PredictionFinished {
                mode,
                sequence,
                result,
            });
        });
    }

    fn on_voice_outcome(&mut self, outcome: VoiceOutcome) {
        match outcome {
            VoiceOutcome::None => {}
            VoiceOutcome::State(state) => self.presentation.set_voice(indicator(state)),
            VoiceOutcome::Command(command) => match command {
                VoiceCommand::ClearCanvas => self.perform(Action::Clear),
                VoiceCommand::StartRecognition => self.perform(Action::Recognize),
                VoiceCommand::ToggleCamera => self.perform(Action::ToggleCamera),
                VoiceCommand::ToggleEraser => self.perform(Action::ToggleEraser),
                VoiceCommand::FreeText(text) => {
                    self.presentation.set_display(DigitDisplay::Speech(text.clone()));
                    self.presentation.set_details(DetailPanel::Speech(text));
                }
            },
            VoiceOutcome::Disabled { reason } => {
                self.presentation.set_voice(VoiceIndicator::Off);
                self.presentation.notify(NoticeLevel::Warning, reason);
            }
            VoiceOutcome::Unsupported => {
                self.presentation.set_voice(VoiceIndicator::Hidden);
                self.presentation.notify(
                    NoticeLevel::Warning,
                    "voice recognition is not available in this environment",
                );
            }
        }
    }

    /// Stop the session and release the camera and microphone
    pub fn close(&mut self) {
        self.running = false;
        self.voice.disable();
        self.stop_camera();
        tracing::info!("session stopped");
    }
}

/// Flatten the surface over the camera frame when live
fn snapshot_of(surface: &Surface, camera: &CameraSource, mode: CaptureMode, sequence: u64) -> Snapshot {
    if mode != CaptureMode::LiveCamera {
        return compositor::compose(surface, None, sequence);
    }
    match camera.current_frame() {
        Ok(frame) => compositor::compose(surface, Some(&*frame), sequence),
        Err(_) => compositor::compose_without_frame(surface, sequence),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

const fn indicator(state: VoiceState) -> VoiceIndicator {
    match state {
        VoiceState::Disabled => VoiceIndicator::Off,
        VoiceState::Starting => VoiceIndicator::Starting,
        VoiceState::Listening => VoiceIndicator::On,
    }
}

fn voice_emitter(
    tx: &mpsc::UnboundedSender<SessionEvent>,
) -> impl Fn(VoiceEvent) -> bool + Send + Sync + 'static {
    let tx = tx.clone();
    move |event| tx.send(SessionEvent::Voice(event)).is_ok()
}
