//! Speech-to-text over a Whisper-compatible transcription API

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Default transcription endpoint
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Default per-request transcription timeout
pub const DEFAULT_STT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transcription response body
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcribes recorded utterances to text
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    language: String,
}

impl std::fmt::Debug for SpeechToText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechToText")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl SpeechToText {
    /// Create a transcriber
    ///
    /// `language` is a BCP 47 tag such as `zh-TW`; only the primary subtag is
    /// sent, as the API expects ISO 639-1.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedCapability` if the API key is empty, or an error if
    /// the HTTP client cannot be built
    pub fn new(
        endpoint: String,
        api_key: SecretString,
        model: String,
        language: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::UnsupportedCapability(
                "speech recognition requires a transcription API key".to_string(),
            ));
        }

        let language = language
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            language,
        })
    }

    /// Language hint sent with each request
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API rejects it
    pub async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if !self.language.is_empty() {
            form = form.text("language", self.language.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let body = response.text().await?;
        let result: TranscriptionResponse = serde_json::from_str(&body)?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
