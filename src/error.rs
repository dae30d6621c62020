//! Error types for the digit canvas client

use thiserror::Error;

/// Result type alias for digit canvas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the digit canvas client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera or microphone could not be acquired (permission or hardware)
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capability missing from this runtime (e.g. no speech recognizer)
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Camera stream has not produced a frame yet
    #[error("no frame available")]
    NoFrame,

    /// Voice dispatcher error
    #[error("voice error: {0}")]
    Voice(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Prediction request failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Image decode/encode error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of one prediction call
///
/// Never retried by the client; the caller decides how to surface it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS or timeout failure
    #[error("network error: {0}")]
    Network(String),

    /// Service answered with a non-success status
    #[error("service returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Response body could not be parsed
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Snapshot could not be encoded into a request
    #[error("encode error: {0}")]
    Encode(String),

    /// Service reported an error in an otherwise well-formed body
    #[error("service error: {0}")]
    Service(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
