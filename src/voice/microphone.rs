//! Microphone-backed speech recognition
//!
//! cpal streams aren't `Send`, so capture runs on a dedicated thread that
//! forwards sample chunks over a channel. Dropping the listen future closes
//! the channel, which ends the thread and releases the device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot};

use super::{
    AudioCapture, SAMPLE_RATE, SpeechBackend, SpeechToText, UtteranceSegmenter, UtteranceSink,
    samples_to_wav,
};
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Chunks buffered between the capture thread and the segmenter
const CHUNK_QUEUE: usize = 32;

/// Default microphone plus transcription API
#[derive(Debug, Clone)]
pub struct MicrophoneBackend {
    stt: Arc<SpeechToText>,
}

impl MicrophoneBackend {
    /// Wrap a transcriber
    #[must_use]
    pub fn new(stt: SpeechToText) -> Self {
        Self { stt: Arc::new(stt) }
    }

    /// Build from voice settings
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedCapability` when no transcription key is configured
    pub fn from_config(config: &VoiceConfig) -> Result<Self> {
        let api_key = config.api_key.as_ref().map_or_else(
            || SecretString::from(String::new()),
            |key| SecretString::from(key.expose_secret().to_string()),
        );
        let stt = SpeechToText::new(
            config.stt_url.clone(),
            api_key,
            config.stt_model.clone(),
            &config.language,
            config.stt_timeout,
        )?;
        Ok(Self::new(stt))
    }
}

#[async_trait]
impl SpeechBackend for MicrophoneBackend {
    async fn request_permission(&self) -> Result<()> {
        // Open and immediately release; only proves access
        tokio::task::spawn_blocking(|| {
            let mut capture = AudioCapture::new()?;
            capture.start()?;
            capture.stop();
            Ok(())
        })
        .await
        .map_err(|e| Error::Voice(e.to_string()))?
    }

    fn listen(&self, sink: UtteranceSink) -> BoxFuture<'static, Result<()>> {
        let stt = Arc::clone(&self.stt);
        Box::pin(async move {
            let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<f32>>(CHUNK_QUEUE);
            let (ready_tx, ready_rx) = oneshot::channel();
            std::thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || capture_loop(&chunk_tx, ready_tx))?;

            ready_rx
                .await
                .map_err(|_| Error::Audio("capture thread exited".to_string()))??;

            let mut segmenter = UtteranceSegmenter::new();
            while let Some(chunk) = chunk_rx.recv().await {
                if !segmenter.process(&chunk) {
                    continue;
                }

                let wav = samples_to_wav(&segmenter.take_utterance(), SAMPLE_RATE)?;
                let text = stt.transcribe(&wav).await?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if !sink.send(text) {
                    return Ok(());
                }
            }

            Err(Error::Audio("microphone stream ended".to_string()))
        })
    }
}

fn capture_loop(chunks: &mpsc::Sender<Vec<f32>>, ready: oneshot::Sender<Result<()>>) {
    let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    loop {
        std::thread::sleep(POLL_INTERVAL);
        let samples = capture.take_buffer();
        if samples.is_empty() {
            if chunks.is_closed() {
                break;
            }
            continue;
        }
        if chunks.blocking_send(samples).is_err() {
            break;
        }
    }

    capture.stop();
}
