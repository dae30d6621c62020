//! Pointer and touch input capture
//!
//! Maps device coordinates onto the surface and turns pointer gestures into
//! strokes. Only the first touch contact is tracked; gestures with more than
//! one contact are ignored.

use std::time::Duration;

use crate::surface::{Point, Surface};

/// Delay between a finished stroke and the recognition it triggers
pub const STROKE_DEBOUNCE: Duration = Duration::from_millis(100);

/// On-screen bounding rectangle of the surface, in device coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    /// Left edge
    pub left: f32,
    /// Top edge
    pub top: f32,
    /// Displayed width
    pub width: f32,
    /// Displayed height
    pub height: f32,
}

impl ScreenRect {
    /// Rectangle at the origin matching the surface size one-to-one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn identity(surface: &Surface) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: surface.width() as f32,
            height: surface.height() as f32,
        }
    }
}

/// A raw pointer sample before coordinate mapping
#[derive(Debug, Clone, PartialEq)]
pub enum PointerSample {
    /// Mouse or pen position
    Mouse {
        /// Client x coordinate
        x: f32,
        /// Client y coordinate
        y: f32,
    },
    /// Active touch contacts, in contact order
    Touch {
        /// Client coordinates of each contact
        contacts: Vec<Point>,
    },
}

/// Result of ending a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeFinished {
    /// Number of points the stroke received
    pub points: usize,
}

/// Converts pointer gestures into strokes on a [`Surface`]
#[derive(Debug, Clone)]
pub struct InputCapture {
    bounds: ScreenRect,
    last: Option<Point>,
    points: usize,
}

impl InputCapture {
    /// Create input capture for a surface displayed at `bounds`
    #[must_use]
    pub const fn new(bounds: ScreenRect) -> Self {
        Self {
            bounds,
            last: None,
            points: 0,
        }
    }

    /// Update the on-screen rectangle (layout changed)
    pub const fn set_bounds(&mut self, bounds: ScreenRect) {
        self.bounds = bounds;
    }

    /// Current on-screen rectangle
    #[must_use]
    pub const fn bounds(&self) -> ScreenRect {
        self.bounds
    }

    /// Whether a stroke is in progress
    #[must_use]
    pub const fn is_drawing(&self) -> bool {
        self.last.is_some()
    }

    /// Resolve a raw sample to a client point
    ///
    /// Returns `None` for multi-touch or empty touch samples.
    #[must_use]
    pub fn locate(sample: &PointerSample) -> Option<Point> {
        match sample {
            PointerSample::Mouse { x, y } => Some(Point::new(*x, *y)),
            PointerSample::Touch { contacts } => match contacts.as_slice() {
                [single] => Some(*single),
                _ => None,
            },
        }
    }

    /// Map a client point into surface-local coordinates
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_surface(&self, client: Point, surface: &Surface) -> Point {
        let scale_x = if self.bounds.width > 0.0 {
            surface.width() as f32 / self.bounds.width
        } else {
            1.0
        };
        let scale_y = if self.bounds.height > 0.0 {
            surface.height() as f32 / self.bounds.height
        } else {
            1.0
        };

        Point::new(
            (client.x - self.bounds.left) * scale_x,
            (client.y - self.bounds.top) * scale_y,
        )
    }

    /// Begin a stroke at a client point
    ///
    /// The starting point is rendered immediately so a tap leaves a dot.
    pub fn on_stroke_start(&mut self, surface: &mut Surface, client: Point) {
        let point = self.to_surface(client, surface);
        let pen = surface.pen();
        surface.apply_stroke(&[point], &pen);

        self.last = Some(point);
        self.points = 1;
        tracing::trace!(x = point.x, y = point.y, "stroke started");
    }

    /// Extend the active stroke to a client point
    ///
    /// Returns false when no stroke is in progress.
    pub fn on_stroke_move(&mut self, surface: &mut Surface, client: Point) -> bool {
        let Some(last) = self.last else {
            return false;
        };

        let point = self.to_surface(client, surface);
        let pen = surface.pen();
        surface.apply_stroke(&[last, point], &pen);

        self.last = Some(point);
        self.points += 1;
        true
    }

    /// Finish the active stroke
    ///
    /// Returns `None` when no stroke was in progress (e.g. pointer left the
    /// surface without drawing).
    pub fn on_stroke_end(&mut self) -> Option<StrokeFinished> {
        self.last.take()?;
        let finished = StrokeFinished {
            points: std::mem::take(&mut self.points),
        };
        tracing::trace!(points = finished.points, "stroke finished");
        Some(finished)
    }

    /// Abandon the active stroke without reporting it
    pub const fn cancel(&mut self) {
        self.last = None;
        self.points = 0;
    }
}
