//! Drawing surface and pen state
//!
//! The surface is a fixed-size RGBA buffer. Strokes overwrite pixels rather
//! than blend, so the eraser restores the background exactly (including
//! transparency while the camera feed sits underneath).

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

/// Opaque background used for freehand drawing
pub const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Background used while the camera frame shows through
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Ink color for the drawing pen
pub const INK: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Drawing pen width in pixels
pub const DRAW_WIDTH: f32 = 15.0;

/// Eraser width in pixels
pub const ERASE_WIDTH: f32 = 40.0;

/// Fraction of the surface an uploaded image may occupy
const UPLOAD_FILL_RATIO: f32 = 0.8;

/// A point in surface-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal position in pixels
    pub x: f32,
    /// Vertical position in pixels
    pub y: f32,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Whether the pen lays down ink or restores background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenMode {
    /// Draw with ink
    Draw,
    /// Paint background over existing pixels
    Erase,
}

/// Pen configuration used for the next stroke
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenConfig {
    /// Draw or erase
    pub mode: PenMode,
    /// Color written by the stroke
    pub color: Rgba<u8>,
    /// Stroke width in pixels
    pub width: f32,
}

impl PenConfig {
    /// Pen preset for a mode against the given background
    #[must_use]
    pub const fn for_mode(mode: PenMode, background: Rgba<u8>) -> Self {
        match mode {
            PenMode::Draw => Self {
                mode,
                color: INK,
                width: DRAW_WIDTH,
            },
            PenMode::Erase => Self {
                mode,
                color: background,
                width: ERASE_WIDTH,
            },
        }
    }
}

/// Mutable drawing surface with its pen
#[derive(Debug, Clone)]
pub struct Surface {
    pixels: RgbaImage,
    background: Rgba<u8>,
    pen: PenConfig,
}

impl Surface {
    /// Create a surface filled with the opaque background
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, BACKGROUND),
            background: BACKGROUND,
            pen: PenConfig::for_mode(PenMode::Draw, BACKGROUND),
        }
    }

    /// Surface width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Surface height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Current pen configuration
    #[must_use]
    pub const fn pen(&self) -> PenConfig {
        self.pen
    }

    /// Current background fill
    #[must_use]
    pub const fn background(&self) -> Rgba<u8> {
        self.background
    }

    /// Switch the pen between draw and erase
    pub const fn set_pen_mode(&mut self, mode: PenMode) {
        self.pen = PenConfig::for_mode(mode, self.background);
    }

    /// Flip eraser mode, returning the new mode
    pub const fn toggle_eraser(&mut self) -> PenMode {
        let next = match self.pen.mode {
            PenMode::Draw => PenMode::Erase,
            PenMode::Erase => PenMode::Draw,
        };
        self.set_pen_mode(next);
        next
    }

    /// Change the background fill used by `clear` and the eraser
    ///
    /// Existing pixels are left alone until the next `clear`.
    pub const fn set_background(&mut self, background: Rgba<u8>) {
        self.background = background;
        self.pen = PenConfig::for_mode(self.pen.mode, background);
    }

    /// Rasterize a round-capped, round-joined polyline through `points`
    ///
    /// One point renders a dot of the pen width; zero points is a no-op.
    pub fn apply_stroke(&mut self, points: &[Point], pen: &PenConfig) {
        let radius = (pen.width / 2.0).max(0.5);
        match points {
            [] => {}
            [only] if only.x.is_finite() && only.y.is_finite() => {
                stamp_disc(&mut self.pixels, *only, radius, pen.color);
            }
            [_] => {}
            _ => {
                for pair in points.windows(2) {
                    stamp_segment(&mut self.pixels, pair[0], pair[1], radius, pen.color);
                }
            }
        }
    }

    /// Reset every pixel to the background fill
    pub fn clear(&mut self) {
        let background = self.background;
        for pixel in self.pixels.pixels_mut() {
            *pixel = background;
        }
    }

    /// Read-only copy of the current pixels
    #[must_use]
    pub fn snapshot_pixels(&self) -> RgbaImage {
        self.pixels.clone()
    }

    /// Borrow the current pixels
    #[must_use]
    pub const fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Replace the contents with an uploaded image, scaled to fit and centered
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn draw_image_fitted(&mut self, image: &DynamicImage) {
        self.clear();

        let (src_w, src_h) = (image.width(), image.height());
        if src_w == 0 || src_h == 0 {
            return;
        }

        let (dst_w, dst_h) = (self.width() as f32, self.height() as f32);
        let ratio = (dst_w / src_w as f32).min(dst_h / src_h as f32) * UPLOAD_FILL_RATIO;
        let w = ((src_w as f32 * ratio).round() as u32).max(1);
        let h = ((src_h as f32 * ratio).round() as u32).max(1);

        let scaled = imageops::resize(&image.to_rgba8(), w, h, FilterType::Triangle);
        let x = i64::from(self.width().saturating_sub(w) / 2);
        let y = i64::from(self.height().saturating_sub(h) / 2);
        imageops::overlay(&mut self.pixels, &scaled, x, y);

        tracing::debug!(src_w, src_h, w, h, "uploaded image placed on surface");
    }
}

/// Stamp discs along a segment at sub-pixel spacing
///
/// The segment is first clipped to the image grown by `radius`, so the step
/// count is bounded by the image size however far the endpoints reach.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn stamp_segment(img: &mut RgbaImage, start: Point, end: Point, radius: f32, color: Rgba<u8>) {
    let bounds = (
        -radius,
        -radius,
        img.width() as f32 + radius,
        img.height() as f32 + radius,
    );
    let Some((start, end)) = clip_segment(start, end, bounds) else {
        return;
    };

    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        stamp_disc(img, Point::new(start.x + dx * t, start.y + dy * t), radius, color);
    }
}

/// Liang-Barsky clip of `start..end` to `(min_x, min_y, max_x, max_y)`
///
/// Returns `None` when the segment misses the box or has a non-finite end.
fn clip_segment(start: Point, end: Point, bounds: (f32, f32, f32, f32)) -> Option<(Point, Point)> {
    if ![start.x, start.y, end.x, end.y].iter().all(|v| v.is_finite()) {
        return None;
    }

    let (min_x, min_y, max_x, max_y) = bounds;
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let mut t0 = 0.0_f32;
    let mut t1 = 1.0_f32;

    for (p, q) in [
        (-dx, start.x - min_x),
        (dx, max_x - start.x),
        (-dy, start.y - min_y),
        (dy, max_y - start.y),
    ] {
        if p.abs() < f32::EPSILON {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }

    Some((
        Point::new(start.x + dx * t0, start.y + dy * t0),
        Point::new(start.x + dx * t1, start.y + dy * t1),
    ))
}

/// Write `color` to every pixel whose center lies within `radius` of `center`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
fn stamp_disc(img: &mut RgbaImage, center: Point, radius: f32, color: Rgba<u8>) {
    let width = img.width() as i32;
    let height = img.height() as i32;
    if width == 0 || height == 0 {
        return;
    }

    let radius_sq = radius * radius;
    let min_x = ((center.x - radius).floor() as i32).max(0);
    let max_x = ((center.x + radius).ceil() as i32).min(width - 1);
    let min_y = ((center.y - radius).floor() as i32).max(0);
    let max_y = ((center.y + radius).ceil() as i32).min(height - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let px = x as f32 + 0.5 - center.x;
            let py = y as f32 + 0.5 - center.y;
            if px * px + py * py <= radius_sq {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ink_count(surface: &Surface) -> usize {
        surface.pixels().pixels().filter(|p| **p == INK).count()
    }

    #[test]
    fn new_surface_is_background_filled() {
        let surface = Surface::new(20, 10);
        assert!(surface.pixels().pixels().all(|p| *p == BACKGROUND));
        assert_eq!(surface.pen().mode, PenMode::Draw);
    }

    #[test]
    fn single_point_renders_dot() {
        let mut surface = Surface::new(50, 50);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(25.0, 25.0)], &pen);

        assert_eq!(*surface.pixels().get_pixel(25, 25), INK);
        assert_eq!(*surface.pixels().get_pixel(0, 0), BACKGROUND);
        // Disc of width 15 covers roughly pi * 7.5^2 pixels
        let count = ink_count(&surface);
        assert!((150..=200).contains(&count), "dot covered {count} pixels");
    }

    #[test]
    fn empty_stroke_is_noop() {
        let mut surface = Surface::new(10, 10);
        let pen = surface.pen();
        surface.apply_stroke(&[], &pen);
        assert_eq!(ink_count(&surface), 0);
    }

    #[test]
    fn stroke_covers_segment() {
        let mut surface = Surface::new(100, 40);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(10.0, 20.0), Point::new(90.0, 20.0)], &pen);

        for x in 10..90 {
            assert_eq!(*surface.pixels().get_pixel(x, 20), INK, "gap at x={x}");
        }
        assert_eq!(*surface.pixels().get_pixel(50, 0), BACKGROUND);
    }

    #[test]
    fn stroke_is_clipped_at_edges() {
        let mut surface = Surface::new(10, 10);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(-5.0, -5.0), Point::new(15.0, 15.0)], &pen);
        assert_eq!(*surface.pixels().get_pixel(5, 5), INK);
    }

    #[test]
    fn far_endpoints_draw_only_the_visible_part() {
        let mut surface = Surface::new(700, 400);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(10.0, 10.0), Point::new(1.0e30, 10.0)], &pen);
        assert_eq!(*surface.pixels().get_pixel(699, 10), INK);
        assert_eq!(*surface.pixels().get_pixel(10, 200), BACKGROUND);

        let before = ink_count(&surface);
        surface.apply_stroke(&[Point::new(-1.0e30, -500.0), Point::new(1.0e30, -500.0)], &pen);
        assert_eq!(ink_count(&surface), before);
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let mut surface = Surface::new(700, 400);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(10.0, 10.0), Point::new(f32::INFINITY, 10.0)], &pen);
        surface.apply_stroke(&[Point::new(f32::NAN, 10.0)], &pen);
        surface.apply_stroke(&[Point::new(f32::NAN, 0.0), Point::new(20.0, 20.0)], &pen);
        assert_eq!(ink_count(&surface), 0);
    }

    #[test]
    fn toggle_eraser_switches_pen() {
        let mut surface = Surface::new(10, 10);
        assert_eq!(surface.toggle_eraser(), PenMode::Erase);
        assert_eq!(surface.pen().color, BACKGROUND);
        assert!((surface.pen().width - ERASE_WIDTH).abs() < f32::EPSILON);
        assert_eq!(surface.toggle_eraser(), PenMode::Draw);
        assert_eq!(surface.pen().color, INK);
    }

    #[test]
    fn erase_pen_tracks_background() {
        let mut surface = Surface::new(10, 10);
        surface.set_pen_mode(PenMode::Erase);
        surface.set_background(TRANSPARENT);
        assert_eq!(surface.pen().color, TRANSPARENT);
    }

    #[test]
    fn clear_restores_background() {
        let mut surface = Surface::new(30, 30);
        let pen = surface.pen();
        surface.apply_stroke(&[Point::new(5.0, 5.0), Point::new(25.0, 25.0)], &pen);
        assert!(ink_count(&surface) > 0);

        surface.clear();
        assert_eq!(surface.snapshot_pixels(), Surface::new(30, 30).snapshot_pixels());
    }

    #[test]
    fn eraser_does_not_bleed_outside_stroke() {
        let mut surface = Surface::new(120, 60);
        let ink = surface.pen();
        surface.apply_stroke(&[Point::new(5.0, 30.0), Point::new(115.0, 30.0)], &ink);
        let before = surface.snapshot_pixels();

        surface.toggle_eraser();
        let eraser = surface.pen();
        let center = Point::new(60.0, 30.0);
        surface.apply_stroke(&[center], &eraser);

        let radius = eraser.width / 2.0;
        for (x, y, pixel) in surface.pixels().enumerate_pixels() {
            #[allow(clippy::cast_precision_loss)]
            let (dx, dy) = (x as f32 + 0.5 - center.x, y as f32 + 0.5 - center.y);
            if dx * dx + dy * dy > radius * radius {
                assert_eq!(pixel, before.get_pixel(x, y), "bleed at ({x}, {y})");
            }
        }
        assert_eq!(*surface.pixels().get_pixel(60, 30), BACKGROUND);
    }

    #[test]
    fn uploaded_image_is_centered_and_scaled() {
        let mut surface = Surface::new(100, 100);
        let upload = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, INK));
        surface.draw_image_fitted(&upload);

        // 10px scaled by min(10, 10) * 0.8 = 80px, centered
        assert_eq!(*surface.pixels().get_pixel(50, 50), INK);
        assert_eq!(*surface.pixels().get_pixel(5, 5), BACKGROUND);
        assert_eq!(*surface.pixels().get_pixel(95, 50), BACKGROUND);
    }
}
