//! Presentation state and its projections
//!
//! Holds what the user sees (digit display, detail lines, overlay boxes,
//! control states, notices) and broadcasts every change to subscribers.
//! Rendering is a pure function of the surface and this state.

use std::fmt;

use image::{Rgba, RgbaImage};
use tokio::sync::broadcast;

use crate::compositor;
use crate::prediction::{BoundingBox, RecognitionResult};
use crate::surface::{PenMode, Surface};

/// Channel capacity for presentation updates
const CHANNEL_CAPACITY: usize = 64;

/// Overlay stroke color
const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Overlay rectangle line width
const OVERLAY_LINE: i32 = 3;

/// Pixel scale of overlay label glyphs
const LABEL_SCALE: i32 = 4;

/// Big digit readout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigitDisplay {
    /// Nothing recognized
    Empty,
    /// Single-shot request outstanding
    Pending,
    /// Recognized digits
    Digits(String),
    /// Last single-shot request failed
    Failed,
    /// Free text heard by the voice dispatcher
    Speech(String),
}

impl fmt::Display for DigitDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "---"),
            Self::Pending => write!(f, "..."),
            Self::Digits(d) | Self::Speech(d) => write!(f, "{d}"),
            Self::Failed => write!(f, "?"),
        }
    }
}

/// Detail panel under the readout
#[derive(Debug, Clone, PartialEq)]
pub enum DetailPanel {
    /// Waiting for a digit to be recognized
    Waiting,
    /// Canvas was just cleared
    Cleared,
    /// Per-digit results as `(digit, confidence)`
    Digits(Vec<(String, f32)>),
    /// Voice free-text echo
    Speech(String),
}

impl fmt::Display for DetailPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting for a digit in view"),
            Self::Cleared => write!(f, "canvas cleared"),
            Self::Speech(text) => write!(f, "voice: {text}"),
            Self::Digits(digits) => {
                for (i, (digit, confidence)) in digits.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "digit {}: {digit} ({:.1}%)", i + 1, confidence * 100.0)?;
                }
                Ok(())
            }
        }
    }
}

/// A box drawn around a detected digit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    /// Box in surface coordinates
    pub bounding_box: BoundingBox,
    /// Digit label drawn above the box
    pub label: String,
}

/// Voice control state as shown on its toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceIndicator {
    /// Voice control unavailable in this runtime; toggle hidden
    Hidden,
    /// Voice control off
    Off,
    /// Acquiring microphone / starting listener
    Starting,
    /// Listening
    On,
}

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational
    Info,
    /// Something failed but the session continues
    Warning,
}

/// A user-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Message text
    pub message: String,
}

/// One change to presentation state
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationUpdate {
    /// Readout changed
    Display(DigitDisplay),
    /// Detail panel changed
    Details(DetailPanel),
    /// Overlay list replaced
    Overlays(Vec<Overlay>),
    /// Eraser toggle changed
    Eraser(PenMode),
    /// Camera toggle changed
    Camera(bool),
    /// Voice toggle changed
    Voice(VoiceIndicator),
    /// Notice raised
    Notice(Notice),
}

/// Current presentation state
#[derive(Debug)]
pub struct Presentation {
    display: DigitDisplay,
    details: DetailPanel,
    overlays: Vec<Overlay>,
    eraser: PenMode,
    camera: bool,
    voice: VoiceIndicator,
    tx: broadcast::Sender<PresentationUpdate>,
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new()
    }
}

impl Presentation {
    /// Create an empty presentation
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            display: DigitDisplay::Empty,
            details: DetailPanel::Waiting,
            overlays: Vec::new(),
            eraser: PenMode::Draw,
            camera: false,
            voice: VoiceIndicator::Off,
            tx,
        }
    }

    /// Subscribe to presentation updates
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationUpdate> {
        self.tx.subscribe()
    }

    fn emit(&self, update: PresentationUpdate) {
        // No subscribers is fine
        let _ = self.tx.send(update);
    }

    /// Current readout
    #[must_use]
    pub const fn display(&self) -> &DigitDisplay {
        &self.display
    }

    /// Current detail panel
    #[must_use]
    pub const fn details(&self) -> &DetailPanel {
        &self.details
    }

    /// Current overlays
    #[must_use]
    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    /// Eraser toggle state
    #[must_use]
    pub const fn eraser(&self) -> PenMode {
        self.eraser
    }

    /// Camera toggle state
    #[must_use]
    pub const fn camera(&self) -> bool {
        self.camera
    }

    /// Voice toggle state
    #[must_use]
    pub const fn voice(&self) -> VoiceIndicator {
        self.voice
    }

    /// Set the readout
    pub fn set_display(&mut self, display: DigitDisplay) {
        if self.display != display {
            self.display = display.clone();
            self.emit(PresentationUpdate::Display(display));
        }
    }

    /// Set the detail panel
    pub fn set_details(&mut self, details: DetailPanel) {
        if self.details != details {
            self.details = details.clone();
            self.emit(PresentationUpdate::Details(details));
        }
    }

    /// Replace the overlay list
    pub fn set_overlays(&mut self, overlays: Vec<Overlay>) {
        if self.overlays != overlays {
            self.overlays = overlays.clone();
            self.emit(PresentationUpdate::Overlays(overlays));
        }
    }

    /// Show a recognition result in full
    ///
    /// `with_overlays` is false for single-shot results, which carry no boxes
    /// worth drawing.
    pub fn show_result(&mut self, result: &RecognitionResult, with_overlays: bool) {
        self.set_display(
            result
                .full_digit
                .clone()
                .map_or(DigitDisplay::Empty, DigitDisplay::Digits),
        );

        if result.details.is_empty() {
            self.set_details(DetailPanel::Waiting);
        } else {
            self.set_details(DetailPanel::Digits(
                result
                    .details
                    .iter()
                    .map(|d| (d.digit.clone(), d.confidence))
                    .collect(),
            ));
        }

        let overlays = if with_overlays {
            result
                .details
                .iter()
                .filter_map(|d| {
                    d.bounding_box.map(|bounding_box| Overlay {
                        bounding_box,
                        label: d.digit.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        self.set_overlays(overlays);
    }

    /// Reset readout, details and overlays after a clear
    pub fn show_cleared(&mut self) {
        self.set_display(DigitDisplay::Empty);
        self.set_details(DetailPanel::Cleared);
        self.set_overlays(Vec::new());
    }

    /// Update the eraser toggle
    pub fn set_eraser(&mut self, mode: PenMode) {
        if self.eraser != mode {
            self.eraser = mode;
            self.emit(PresentationUpdate::Eraser(mode));
        }
    }

    /// Update the camera toggle
    pub fn set_camera(&mut self, live: bool) {
        if self.camera != live {
            self.camera = live;
            self.emit(PresentationUpdate::Camera(live));
        }
    }

    /// Update the voice toggle
    pub fn set_voice(&mut self, voice: VoiceIndicator) {
        if self.voice != voice {
            self.voice = voice;
            self.emit(PresentationUpdate::Voice(voice));
        }
    }

    /// Raise a user-visible notice
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notice = Notice {
            level,
            message: message.into(),
        };
        match level {
            NoticeLevel::Info => tracing::info!(message = %notice.message, "notice"),
            NoticeLevel::Warning => tracing::warn!(message = %notice.message, "notice"),
        }
        self.emit(PresentationUpdate::Notice(notice));
    }
}

/// Render the surface (over an optional backdrop) with overlay annotations
#[must_use]
pub fn render(surface: &Surface, presentation: &Presentation, backdrop: Option<&RgbaImage>) -> RgbaImage {
    let mut image = compositor::compose(surface, backdrop, 0).image().clone();
    for overlay in presentation.overlays() {
        draw_overlay(&mut image, overlay);
    }
    image
}

fn draw_overlay(image: &mut RgbaImage, overlay: &Overlay) {
    let BoundingBox { x, y, w, h } = overlay.bounding_box;
    for t in 0..OVERLAY_LINE {
        fill_rect(image, x - t, y - t, w + 2 * t, 1);
        fill_rect(image, x - t, y + h + t - 1, w + 2 * t, 1);
        fill_rect(image, x - t, y - t, 1, h + 2 * t);
        fill_rect(image, x + w + t - 1, y - t, 1, h + 2 * t);
    }

    let label_top = y - 5 - GLYPH_HEIGHT * LABEL_SCALE;
    let mut pen_x = x;
    for ch in overlay.label.chars() {
        if let Some(glyph) = glyph(ch) {
            draw_glyph(image, glyph, pen_x, label_top);
        }
        pen_x += (GLYPH_WIDTH + 1) * LABEL_SCALE;
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn fill_rect(image: &mut RgbaImage, x: i32, y: i32, w: i32, h: i32) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for py in y.max(0)..(y + h).min(height) {
        for px in x.max(0)..(x + w).min(width) {
            image.put_pixel(px as u32, py as u32, OVERLAY_COLOR);
        }
    }
}

const GLYPH_WIDTH: i32 = 3;
const GLYPH_HEIGHT: i32 = 5;

/// 3x5 bitmap digits, one row per byte, high bit on the left
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

fn glyph(ch: char) -> Option<&'static [u8; 5]> {
    let index = ch.to_digit(10)?;
    DIGIT_GLYPHS.get(index as usize)
}

fn draw_glyph(image: &mut RgbaImage, rows: &[u8; 5], x: i32, y: i32) {
    for (row, bits) in (0..).zip(rows.iter()) {
        for col in 0..GLYPH_WIDTH {
            if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                fill_rect(
                    image,
                    x + col * LABEL_SCALE,
                    y + row * LABEL_SCALE,
                    LABEL_SCALE,
                    LABEL_SCALE,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::DigitDetail;
    use crate::surface::BACKGROUND;

    fn result(full: Option<&str>, boxed: bool) -> RecognitionResult {
        RecognitionResult {
            full_digit: full.map(ToString::to_string),
            details: vec![DigitDetail {
                digit: "7".to_string(),
                confidence: 0.9,
                bounding_box: boxed.then_some(BoundingBox { x: 40, y: 40, w: 20, h: 30 }),
            }],
            sequence: 1,
        }
    }

    #[test]
    fn display_text_matches_states() {
        assert_eq!(DigitDisplay::Empty.to_string(), "---");
        assert_eq!(DigitDisplay::Failed.to_string(), "?");
        assert_eq!(DigitDisplay::Digits("12".into()).to_string(), "12");
    }

    #[test]
    fn detail_panel_formats_confidences() {
        let panel = DetailPanel::Digits(vec![("4".into(), 0.985), ("2".into(), 0.91)]);
        assert_eq!(panel.to_string(), "digit 1: 4 (98.5%); digit 2: 2 (91.0%)");
    }

    #[test]
    fn show_result_sets_overlays_only_when_asked() {
        let mut p = Presentation::new();
        p.show_result(&result(Some("7"), true), false);
        assert_eq!(p.display(), &DigitDisplay::Digits("7".into()));
        assert!(p.overlays().is_empty());

        p.show_result(&result(Some("7"), true), true);
        assert_eq!(p.overlays().len(), 1);
        assert_eq!(p.overlays()[0].label, "7");
    }

    #[test]
    fn missing_full_digit_shows_empty() {
        let mut p = Presentation::new();
        p.show_result(&result(None, false), false);
        assert_eq!(p.display(), &DigitDisplay::Empty);
    }

    #[tokio::test]
    async fn changes_are_broadcast_once() {
        let mut p = Presentation::new();
        let mut rx = p.subscribe();

        p.set_display(DigitDisplay::Pending);
        p.set_display(DigitDisplay::Pending);
        p.set_camera(true);

        assert_eq!(rx.recv().await.unwrap(), PresentationUpdate::Display(DigitDisplay::Pending));
        assert_eq!(rx.recv().await.unwrap(), PresentationUpdate::Camera(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn render_draws_overlay_box_and_label() {
        let surface = Surface::new(100, 100);
        let mut p = Presentation::new();
        p.show_result(&result(Some("7"), true), true);

        let image = render(&surface, &p, None);
        assert_eq!(*image.get_pixel(40, 50), OVERLAY_COLOR);
        assert_eq!(*image.get_pixel(50, 55), BACKGROUND);
        // Top row of the "7" glyph sits above the box
        assert_eq!(*image.get_pixel(41, 16), OVERLAY_COLOR);
    }
}
