//! Energy-based utterance segmentation
//!
//! Splits a continuous microphone feed into utterances: speech starts when
//! chunk energy crosses a threshold and ends after a stretch of silence.

use super::SAMPLE_RATE;

/// Minimum RMS energy treated as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech length worth transcribing (0.3 s)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence that ends an utterance (0.5 s)
const SILENCE_SAMPLES: usize = 8000;

/// Longest utterance before it is cut off (15 s)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Speaking,
}

/// Accumulates speech between silences
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech: Vec<f32>,
    silence: usize,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech: Vec::new(),
            silence: 0,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns true when an utterance is complete and ready to take.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let is_speech = rms(samples) > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech.clear();
                    self.speech.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!("speech started");
                }
                false
            }
            SegmenterState::Speaking => {
                self.speech.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.speech.len() >= MAX_UTTERANCE_SAMPLES {
                    tracing::debug!(samples = self.speech.len(), "utterance cut at max length");
                    return true;
                }

                if self.silence > SILENCE_SAMPLES {
                    if self.speech.len() > MIN_SPEECH_SAMPLES + self.silence {
                        tracing::debug!(samples = self.speech.len(), "utterance complete");
                        return true;
                    }
                    // Too short to be speech, just a click or a breath
                    self.reset();
                }
                false
            }
        }
    }

    /// Take the completed utterance and return to idle
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let speech = std::mem::take(&mut self.speech);
        self.reset();
        speech
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech.clear();
        self.silence = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Samples accumulated so far
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.speech.len()
    }
}

/// Root-mean-square energy of a chunk
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
