//! Digit Canvas - handwritten digit recognition client
//!
//! A user draws, uploads or points a camera at digits; snapshots go to a
//! remote recognition service and results are shown as they come back.
//! Voice commands drive the same actions as the on-screen controls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Pointer  │  Controls  │  Voice (supervised)  │ Cam │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ SessionEvent queue
//! ┌──────────────────────▼───────────────────────────────┐
//! │                     Session                          │
//! │  Surface │ Input │ Compositor │ Recognition loop     │
//! └──────────┬───────────────────────────────┬───────────┘
//!            │ Snapshot                      │ updates
//! ┌──────────▼──────────┐        ┌───────────▼───────────┐
//! │  Prediction client  │        │     Presentation      │
//! │   POST /predict     │        │  readout │ overlays   │
//! └─────────────────────┘        └───────────────────────┘
//! ```

pub mod camera;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod error;
pub mod input;
pub mod prediction;
pub mod presentation;
pub mod session;
pub mod surface;
pub mod voice;

pub use camera::{CameraSource, FrameReplayDevice, VideoDevice, VideoStream};
pub use config::Config;
pub use controller::{RecognitionLoop, ResponseOutcome};
pub use error::{Error, Result, TransportError};
pub use prediction::{HttpPredictor, Predictor, RecognitionResult, RequestMode};
pub use presentation::{Presentation, PresentationUpdate};
pub use session::{Action, CaptureMode, PointerEvent, Session, SessionEvent, SessionHandle};
pub use surface::{PenMode, Point, Surface};
