//! Client for the remote digit recognition service
//!
//! One snapshot in, one result out. The client never retries and never
//! touches session state; ordering and failure presentation belong to the
//! recognition loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::compositor::Snapshot;
use crate::error::TransportError;
use crate::{Error, Result};

/// Path of the prediction endpoint relative to the service base URL
pub const PREDICT_PATH: &str = "/predict";

/// Longest error body kept in a `TransportError::Status`
const MAX_ERROR_BODY: usize = 512;

/// How a request was triggered, which also tells the service how strict to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// One-off request from a stroke, upload or explicit action
    Single,
    /// Recurring request from the live camera cycle
    Stream,
}

impl RequestMode {
    /// Value of the `is_realtime` wire flag
    #[must_use]
    pub const fn is_realtime(self) -> bool {
        matches!(self, Self::Stream)
    }
}

/// A snapshot paired with its request mode
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    /// Image to recognize
    pub snapshot: Snapshot,
    /// Trigger mode
    pub mode: RequestMode,
}

impl RecognitionRequest {
    /// Sequence number of the snapshot
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.snapshot.sequence()
    }
}

/// Pixel rectangle around one detected digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub w: i32,
    /// Height
    pub h: i32,
}

/// One recognized digit
#[derive(Debug, Clone, PartialEq)]
pub struct DigitDetail {
    /// Recognized digit as text
    pub digit: String,
    /// Confidence in `0.0..=1.0`
    pub confidence: f32,
    /// Location in the snapshot (realtime responses only)
    pub bounding_box: Option<BoundingBox>,
}

/// Structured recognition outcome for one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Concatenated digits, `None` when nothing was recognized confidently
    pub full_digit: Option<String>,
    /// Per-digit details in reading order
    pub details: Vec<DigitDetail>,
    /// Sequence number of the snapshot this answers
    pub sequence: u64,
}

/// Sends snapshots to a recognizer
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Recognize one snapshot
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` on network, status or parse failure
    async fn predict(
        &self,
        snapshot: &Snapshot,
        mode: RequestMode,
    ) -> std::result::Result<RecognitionResult, TransportError>;
}

/// Request body sent to the service
#[derive(Serialize)]
struct PredictRequest<'a> {
    image: &'a str,
    is_realtime: bool,
}

/// Response body returned by the service
#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    full_digit: Option<String>,
    #[serde(default)]
    details: Vec<WireDetail>,
    #[serde(default)]
    boxes: Vec<BoundingBox>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireDetail {
    digit: WireDigit,
    conf: WireConfidence,
}

/// Digits arrive as strings or bare integers depending on the service build
#[derive(Deserialize)]
#[serde(untagged)]
enum WireDigit {
    Text(String),
    Number(i64),
}

/// Confidence arrives as a fraction, a percentage, or text like `"97.0%"`
#[derive(Deserialize)]
#[serde(untagged)]
enum WireConfidence {
    Number(f64),
    Text(String),
}

impl WireConfidence {
    #[allow(clippy::cast_possible_truncation)]
    fn normalize(&self) -> Option<f32> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(text) => {
                let trimmed = text.trim();
                match trimmed.strip_suffix('%') {
                    Some(percent) => percent.trim().parse::<f64>().ok()? / 100.0,
                    None => trimmed.parse::<f64>().ok()?,
                }
            }
        };

        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let fraction = if value > 1.0 { value / 100.0 } else { value };
        Some(fraction.min(1.0) as f32)
    }
}

/// Parse a service response body into a result for `sequence`
///
/// # Errors
///
/// Returns `Malformed` for bodies that aren't a prediction response and
/// `Service` when the body carries an `error` field
pub fn parse_response(
    body: &str,
    sequence: u64,
) -> std::result::Result<RecognitionResult, TransportError> {
    let response: PredictResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(TransportError::Service(error));
    }

    let details = response
        .details
        .into_iter()
        .enumerate()
        .map(|(i, detail)| {
            let confidence = detail.conf.normalize().ok_or_else(|| {
                TransportError::Malformed(format!("unreadable confidence for digit {i}"))
            })?;
            let digit = match detail.digit {
                WireDigit::Text(text) => text,
                WireDigit::Number(n) => n.to_string(),
            };
            Ok(DigitDetail {
                digit,
                confidence,
                bounding_box: response.boxes.get(i).copied(),
            })
        })
        .collect::<std::result::Result<Vec<_>, TransportError>>()?;

    Ok(RecognitionResult {
        full_digit: response.full_digit.filter(|d| !d.is_empty()),
        details,
        sequence,
    })
}

/// HTTP client for the `/predict` endpoint
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPredictor {
    /// Create a predictor for a service base URL
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        if base_url.is_empty() {
            return Err(Error::Config("prediction service URL is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}{PREDICT_PATH}", base_url.trim_end_matches('/'));

        Ok(Self { client, endpoint })
    }

    /// Full URL requests are sent to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(
        &self,
        snapshot: &Snapshot,
        mode: RequestMode,
    ) -> std::result::Result<RecognitionResult, TransportError> {
        let sequence = snapshot.sequence();
        let image = snapshot
            .to_data_url()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        tracing::debug!(
            sequence,
            ?mode,
            payload_bytes = image.len(),
            "sending prediction request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&PredictRequest {
                image: &image,
                is_realtime: mode.is_realtime(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::debug!(sequence, status = %status, "prediction service error");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result = parse_response(&body, sequence)?;
        tracing::debug!(
            sequence,
            digits = ?result.full_digit,
            detail_count = result.details.len(),
            "prediction received"
        );
        Ok(result)
    }
}
