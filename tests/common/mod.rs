//! Shared test utilities: scripted collaborators for driving a session
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};

use digit_canvas::camera::{CameraConstraints, CameraSource, Frame, VideoDevice, VideoStream};
use digit_canvas::compositor::Snapshot;
use digit_canvas::input::PointerSample;
use digit_canvas::prediction::{
    BoundingBox, DigitDetail, Predictor, RecognitionResult, RequestMode,
};
use digit_canvas::session::{PointerEvent, Session, SessionEvent, SessionSettings};
use digit_canvas::voice::{SpeechBackend, UtteranceSink};
use digit_canvas::{Error, Result, TransportError};

/// Confidence every scripted digit is reported with
pub const CONFIDENCE: f32 = 0.97;

/// One scripted predictor reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub outcome: std::result::Result<String, TransportError>,
}

impl Reply {
    pub fn digits(digits: &str, delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            outcome: Ok(digits.to_string()),
        }
    }

    pub fn fail(error: TransportError, delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            outcome: Err(error),
        }
    }
}

/// A request the predictor received
#[derive(Debug, Clone)]
pub struct Call {
    pub sequence: u64,
    pub mode: RequestMode,
    pub snapshot: Snapshot,
}

/// Predictor that replays scripted replies, then a fallback
pub struct ScriptedPredictor {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedPredictor {
    pub fn new(fallback: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), fallback)
    }

    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_in(&self, mode: RequestMode) -> usize {
        self.calls().iter().filter(|c| c.mode == mode).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn predict(
        &self,
        snapshot: &Snapshot,
        mode: RequestMode,
    ) -> std::result::Result<RecognitionResult, TransportError> {
        self.calls.lock().unwrap().push(Call {
            sequence: snapshot.sequence(),
            mode,
            snapshot: snapshot.clone(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        tokio::time::sleep(reply.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let digits = reply.outcome?;
        let details = digits
            .chars()
            .enumerate()
            .map(|(i, c)| DigitDetail {
                digit: c.to_string(),
                confidence: CONFIDENCE,
                bounding_box: mode.is_realtime().then(|| BoundingBox {
                    x: 20 + 60 * i32::try_from(i).unwrap(),
                    y: 20,
                    w: 50,
                    h: 80,
                }),
            })
            .collect();

        Ok(RecognitionResult {
            full_digit: (!digits.is_empty()).then_some(digits),
            details,
            sequence: snapshot.sequence(),
        })
    }
}

/// Camera frame color used by [`ScriptedCamera`]
pub const FRAME_COLOR: Rgba<u8> = Rgba([30, 60, 90, 255]);

/// Camera that opens after a delay, or fails
pub struct ScriptedCamera {
    pub delay: Duration,
    pub fail: bool,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedCamera {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            fail: false,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(5)
        }
    }
}

struct StaticStream {
    frame: Frame,
    released: Arc<AtomicUsize>,
    stopped: bool,
}

impl VideoStream for StaticStream {
    fn latest_frame(&self) -> Option<Frame> {
        (!self.stopped).then(|| Arc::clone(&self.frame))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl VideoDevice for ScriptedCamera {
    async fn open(&self, constraints: CameraConstraints) -> Result<Box<dyn VideoStream>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::DeviceUnavailable("permission denied".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticStream {
            frame: Arc::new(RgbaImage::from_pixel(
                constraints.width,
                constraints.height,
                FRAME_COLOR,
            )),
            released: Arc::clone(&self.released),
            stopped: false,
        }))
    }
}

/// One scripted listening session
#[derive(Debug, Clone)]
pub enum Listen {
    /// Say each phrase, then end normally
    Say(Vec<&'static str>),
    /// Fail immediately
    Fail(&'static str),
    /// Never end
    Hang,
}

/// Speech backend that replays scripted sessions, then hangs
pub struct ScriptedSpeech {
    permission: std::result::Result<(), &'static str>,
    sessions: Mutex<VecDeque<Listen>>,
    pub starts: AtomicUsize,
}

impl ScriptedSpeech {
    pub fn new(sessions: Vec<Listen>) -> Arc<Self> {
        Arc::new(Self {
            permission: Ok(()),
            sessions: Mutex::new(sessions.into()),
            starts: AtomicUsize::new(0),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            permission: Err("NotAllowedError"),
            sessions: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for ScriptedSpeech {
    async fn request_permission(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.permission
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))
    }

    fn listen(&self, sink: UtteranceSink) -> BoxFuture<'static, Result<()>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Listen::Hang);

        Box::pin(async move {
            match session {
                Listen::Say(phrases) => {
                    for phrase in phrases {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        let _ = sink.send(phrase);
                    }
                    Ok(())
                }
                Listen::Fail(reason) => Err(Error::Voice(reason.to_string())),
                Listen::Hang => std::future::pending().await,
            }
        })
    }
}

/// Small surface so tests stay fast
pub fn settings() -> SessionSettings {
    SessionSettings {
        width: 140,
        height: 80,
        ..SessionSettings::default()
    }
}

/// Session over a scripted predictor and camera
///
/// Camera frames match the surface size so snapshots need no rescaling.
pub fn session(predictor: Arc<ScriptedPredictor>, camera: ScriptedCamera) -> Session {
    let settings = settings();
    let camera = CameraSource::new(
        Arc::new(camera),
        CameraConstraints {
            width: settings.width,
            height: settings.height,
            ..CameraConstraints::default()
        },
    );
    Session::new(settings, predictor, camera)
}

/// Process events for `duration` of (virtual) time
pub async fn drive(session: &mut Session, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while let Ok(alive) = tokio::time::timeout_at(deadline, session.step()).await {
        if !alive {
            break;
        }
    }
}

/// Shorthand for [`drive`] in milliseconds
pub async fn drive_ms(session: &mut Session, ms: u64) {
    drive(session, Duration::from_millis(ms)).await;
}

pub fn mouse(x: f32, y: f32) -> PointerSample {
    PointerSample::Mouse { x, y }
}

/// Press at the first point and move through the rest, without lifting
pub fn press_and_drag(session: &mut Session, points: &[(f32, f32)]) {
    let mut points = points.iter();
    if let Some(&(x, y)) = points.next() {
        session.handle_event(SessionEvent::Pointer(PointerEvent::Down(mouse(x, y))));
    }
    for &(x, y) in points {
        session.handle_event(SessionEvent::Pointer(PointerEvent::Move(mouse(x, y))));
    }
}

/// A complete stroke
pub fn stroke(session: &mut Session, points: &[(f32, f32)]) {
    press_and_drag(session, points);
    session.handle_event(SessionEvent::Pointer(PointerEvent::Up));
}

/// Encode an image as PNG bytes
pub fn png(image: &RgbaImage) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}
