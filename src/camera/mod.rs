//! Live video source
//!
//! The camera owns at most one device stream at a time. Acquisition is the
//! only async step; release is synchronous, unconditional and idempotent.

mod replay;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use image::RgbaImage;

use crate::{Error, Result};

pub use replay::FrameReplayDevice;

/// A decoded video frame
pub type Frame = Arc<RgbaImage>;

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front (selfie) camera
    User,
    /// Rear (environment) camera
    Environment,
}

/// Requested stream properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Preferred facing
    pub facing: FacingMode,
    /// Target frame width
    pub width: u32,
    /// Target frame height
    pub height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            width: 1280,
            height: 720,
        }
    }
}

/// An acquired, running video stream
pub trait VideoStream: Send {
    /// Most recent decoded frame, if the stream has produced one
    fn latest_frame(&self) -> Option<Frame>;

    /// Release every device track held by this stream
    ///
    /// Must be safe to call more than once.
    fn stop(&mut self);
}

/// A video capture device that can be opened into a stream
#[async_trait]
pub trait VideoDevice: Send + Sync {
    /// Acquire the device
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if permission is denied or no device
    /// matches the constraints
    async fn open(&self, constraints: CameraConstraints) -> Result<Box<dyn VideoStream>>;
}

/// Camera lifecycle owner
pub struct CameraSource {
    device: Arc<dyn VideoDevice>,
    constraints: CameraConstraints,
    stream: Option<Box<dyn VideoStream>>,
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("constraints", &self.constraints)
            .field("active", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl CameraSource {
    /// Create a camera source over a device
    #[must_use]
    pub fn new(device: Arc<dyn VideoDevice>, constraints: CameraConstraints) -> Self {
        Self {
            device,
            constraints,
            stream: None,
        }
    }

    /// Future that acquires a new stream without touching current state
    ///
    /// The session awaits this off the event loop and hands the stream back
    /// through [`CameraSource::install`].
    #[must_use]
    pub fn acquire(&self) -> BoxFuture<'static, Result<Box<dyn VideoStream>>> {
        let device = Arc::clone(&self.device);
        let constraints = self.constraints;
        Box::pin(async move { device.open(constraints).await })
    }

    /// Acquire and install a stream in one step
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be opened
    pub async fn start(&mut self) -> Result<()> {
        let stream = self.acquire().await?;
        self.install(stream);
        Ok(())
    }

    /// Take ownership of an acquired stream, releasing any previous one
    pub fn install(&mut self, stream: Box<dyn VideoStream>) {
        self.stop();
        self.stream = Some(stream);
        tracing::info!(
            width = self.constraints.width,
            height = self.constraints.height,
            "camera started"
        );
    }

    /// Release the device unconditionally
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!("camera stopped");
        }
    }

    /// Whether a stream is held
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Most recent frame
    ///
    /// # Errors
    ///
    /// Returns `NoFrame` if the camera is off or hasn't produced a frame yet
    pub fn current_frame(&self) -> Result<Frame> {
        self.stream
            .as_ref()
            .and_then(|s| s.latest_frame())
            .ok_or(Error::NoFrame)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::Rgba;

    use super::*;

    struct CountingStream {
        stops: Arc<AtomicUsize>,
        frame: Option<Frame>,
    }

    impl VideoStream for CountingStream {
        fn latest_frame(&self) -> Option<Frame> {
            self.frame.clone()
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingDevice {
        stops: Arc<AtomicUsize>,
        with_frame: bool,
    }

    #[async_trait]
    impl VideoDevice for CountingDevice {
        async fn open(&self, c: CameraConstraints) -> Result<Box<dyn VideoStream>> {
            let frame = self
                .with_frame
                .then(|| Arc::new(RgbaImage::from_pixel(c.width, c.height, Rgba([9, 9, 9, 255]))));
            Ok(Box::new(CountingStream {
                stops: Arc::clone(&self.stops),
                frame,
            }))
        }
    }

    fn source(with_frame: bool) -> (CameraSource, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let device = CountingDevice {
            stops: Arc::clone(&stops),
            with_frame,
        };
        let constraints = CameraConstraints {
            width: 4,
            height: 2,
            ..CameraConstraints::default()
        };
        (CameraSource::new(Arc::new(device), constraints), stops)
    }

    #[tokio::test]
    async fn start_then_frame() {
        let (mut camera, _) = source(true);
        assert!(matches!(camera.current_frame(), Err(Error::NoFrame)));

        camera.start().await.unwrap();
        assert!(camera.is_active());
        assert_eq!(camera.current_frame().unwrap().dimensions(), (4, 2));
    }

    #[tokio::test]
    async fn no_frame_before_stream_produces_one() {
        let (mut camera, _) = source(false);
        camera.start().await.unwrap();
        assert!(matches!(camera.current_frame(), Err(Error::NoFrame)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut camera, stops) = source(true);
        camera.stop();
        camera.start().await.unwrap();
        camera.stop();
        camera.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!camera.is_active());
    }

    #[tokio::test]
    async fn install_releases_previous_stream() {
        let (mut camera, stops) = source(true);
        camera.start().await.unwrap();
        camera.start().await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        drop(camera);
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }
}
