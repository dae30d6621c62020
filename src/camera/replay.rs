//! Camera backend that replays still images as a live feed

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use tokio::task::JoinHandle;

use super::{CameraConstraints, FacingMode, Frame, VideoDevice, VideoStream};
use crate::{Error, Result};

/// File extensions accepted as frames
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Replays an image file, or every image in a directory, at a fixed rate
///
/// Presents itself as an environment-facing device.
#[derive(Debug, Clone)]
pub struct FrameReplayDevice {
    source: Option<PathBuf>,
    frame_interval: Duration,
}

impl FrameReplayDevice {
    /// Create a device backed by `source`
    ///
    /// `None` models a machine without any capture device.
    #[must_use]
    pub const fn new(source: Option<PathBuf>, frame_interval: Duration) -> Self {
        Self {
            source,
            frame_interval,
        }
    }

    /// Collect frame paths in playback order
    async fn frame_paths(source: &Path) -> Result<Vec<PathBuf>> {
        let meta = tokio::fs::metadata(source).await.map_err(|e| {
            Error::DeviceUnavailable(format!("{}: {e}", source.display()))
        })?;

        if meta.is_file() {
            return Ok(vec![source.to_path_buf()]);
        }

        let mut entries = tokio::fs::read_dir(source).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_frame {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl VideoDevice for FrameReplayDevice {
    async fn open(&self, constraints: CameraConstraints) -> Result<Box<dyn VideoStream>> {
        let source = self.source.as_ref().ok_or_else(|| {
            Error::DeviceUnavailable("no video capture device available".to_string())
        })?;

        if constraints.facing != FacingMode::Environment {
            tracing::debug!(facing = ?constraints.facing, "replay device only faces the environment");
        }

        let paths = Self::frame_paths(source).await?;
        if paths.is_empty() {
            return Err(Error::DeviceUnavailable(format!(
                "no frames found in {}",
                source.display()
            )));
        }

        let (width, height) = (constraints.width, constraints.height);
        let frames = tokio::task::spawn_blocking(move || -> Result<Vec<Frame>> {
            paths
                .iter()
                .map(|path| -> Result<Frame> {
                    let decoded = image::open(path)?.to_rgba8();
                    Ok(Arc::new(imageops::resize(
                        &decoded,
                        width,
                        height,
                        FilterType::Triangle,
                    )))
                })
                .collect()
        })
        .await
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))??;

        tracing::debug!(
            source = %source.display(),
            frames = frames.len(),
            "replay camera opened"
        );

        Ok(Box::new(ReplayStream::spawn(frames, self.frame_interval)))
    }
}

/// Running replay; the playback task stands in for the device track
struct ReplayStream {
    latest: Arc<Mutex<Option<Frame>>>,
    task: Option<JoinHandle<()>>,
}

impl ReplayStream {
    fn spawn(frames: Vec<Frame>, frame_interval: Duration) -> Self {
        let latest = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_interval);
            for frame in frames.iter().cycle() {
                interval.tick().await;
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(Arc::clone(frame));
                }
            }
        });

        Self {
            latest,
            task: Some(task),
        }
    }
}

impl VideoStream for ReplayStream {
    fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Ok(mut guard) = self.latest.lock() {
            guard.take();
        }
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn constraints() -> CameraConstraints {
        CameraConstraints {
            width: 8,
            height: 6,
            ..CameraConstraints::default()
        }
    }

    #[tokio::test]
    async fn missing_source_is_device_unavailable() {
        let device = FrameReplayDevice::new(None, Duration::from_millis(50));
        let err = device.open(constraints()).await.err().unwrap();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn nonexistent_path_is_device_unavailable() {
        let device = FrameReplayDevice::new(
            Some(PathBuf::from("/definitely/not/a/camera")),
            Duration::from_millis(50),
        );
        let err = device.open(constraints()).await.err().unwrap();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_directory_is_device_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let device = FrameReplayDevice::new(Some(dir.path().to_path_buf()), Duration::from_millis(50));
        let err = device.open(constraints()).await.err().unwrap();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn replays_frames_scaled_to_constraints() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(16, 12, Rgba([200, 10, 10, 255]))
            .save(dir.path().join("0001.png"))
            .unwrap();

        let device = FrameReplayDevice::new(Some(dir.path().to_path_buf()), Duration::from_millis(10));
        let mut stream = device.open(constraints()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let frame = stream.latest_frame().expect("frame after first tick");
        assert_eq!(frame.dimensions(), (8, 6));

        stream.stop();
        stream.stop();
        assert!(stream.latest_frame().is_none());
    }
}
