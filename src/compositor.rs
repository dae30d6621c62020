//! Flattens live input into the image sent for recognition

use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};

use crate::Result;
use crate::surface::{BACKGROUND, Surface};

/// Immutable flattened image for one recognition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    image: Arc<RgbaImage>,
    sequence: u64,
}

impl Snapshot {
    /// Wrap an already-flattened image
    #[must_use]
    pub fn new(image: RgbaImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
        }
    }

    /// Flattened pixels
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Sequence number assigned at compose time
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encode as PNG bytes
    ///
    /// # Errors
    ///
    /// Returns error if PNG encoding fails
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.image.write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }

    /// Encode as a self-contained `data:image/png;base64,...` URL
    ///
    /// # Errors
    ///
    /// Returns error if PNG encoding fails
    pub fn to_data_url(&self) -> Result<String> {
        let png = self.to_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

/// Issues strictly increasing sequence numbers, starting at 1
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    /// Reserve the next sequence number
    pub const fn issue(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Highest sequence number issued so far (0 if none)
    #[must_use]
    pub const fn last_issued(&self) -> u64 {
        self.last
    }
}

/// Layer a camera frame (if any) under the surface
///
/// With no frame the snapshot is the surface itself. A frame of a different
/// size is scaled to the surface. Has no knowledge of the camera or network.
#[must_use]
pub fn compose(surface: &Surface, camera_frame: Option<&RgbaImage>, sequence: u64) -> Snapshot {
    let Some(frame) = camera_frame else {
        return Snapshot::new(surface.snapshot_pixels(), sequence);
    };

    let (width, height) = (surface.width(), surface.height());
    let mut base = if frame.dimensions() == (width, height) {
        frame.clone()
    } else {
        imageops::resize(frame, width, height, FilterType::Triangle)
    };
    imageops::overlay(&mut base, surface.pixels(), 0, 0);

    Snapshot::new(base, sequence)
}

/// Snapshot for live mode before the camera has produced a frame
#[must_use]
pub fn compose_without_frame(surface: &Surface, sequence: u64) -> Snapshot {
    let backdrop = RgbaImage::from_pixel(surface.width(), surface.height(), BACKGROUND);
    compose(surface, Some(&backdrop), sequence)
}
