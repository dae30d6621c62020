//! Voice command input
//!
//! Utterances come from a supervised listener (see [`VoiceDispatcher`]) and
//! are classified against a fixed, ordered command table. Commands are
//! executed by the session through the same actions as the on-screen
//! controls; anything else is echoed as free text.

mod capture;
mod dispatcher;
mod microphone;
mod segmenter;
mod stt;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use dispatcher::{
    RestartPolicy, SpeechBackend, UtteranceSink, VoiceDispatcher, VoiceEvent, VoiceOutcome,
    VoiceState,
};
pub use microphone::MicrophoneBackend;
pub use segmenter::{SegmenterState, UtteranceSegmenter, rms};
pub use stt::{DEFAULT_STT_TIMEOUT, DEFAULT_STT_URL, SpeechToText};

/// A classified utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Clear the canvas
    ClearCanvas,
    /// Run a single-shot recognition
    StartRecognition,
    /// Toggle the live camera
    ToggleCamera,
    /// Toggle the eraser
    ToggleEraser,
    /// Not a command; shown to the user as-is
    FreeText(String),
}

/// Keywords per command, checked in order; first match wins
const COMMAND_TABLE: &[(&[&str], VoiceCommand)] = &[
    (&["清除", "清空", "clear"], VoiceCommand::ClearCanvas),
    (&["開始", "辨識", "recognize"], VoiceCommand::StartRecognition),
    (&["鏡頭", "相機", "camera"], VoiceCommand::ToggleCamera),
    (&["橡皮擦", "eraser"], VoiceCommand::ToggleEraser),
];

/// Classify an utterance by substring match against the command table
#[must_use]
pub fn classify(utterance: &str) -> VoiceCommand {
    let text = utterance.trim();
    let lowered = text.to_lowercase();

    COMMAND_TABLE
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map_or_else(
            || VoiceCommand::FreeText(text.to_string()),
            |(_, command)| command.clone(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_chinese_keywords() {
        assert_eq!(classify("清空"), VoiceCommand::ClearCanvas);
        assert_eq!(classify("請幫我清除畫布"), VoiceCommand::ClearCanvas);
        assert_eq!(classify("開始辨識"), VoiceCommand::StartRecognition);
        assert_eq!(classify("打開相機"), VoiceCommand::ToggleCamera);
        assert_eq!(classify("橡皮擦"), VoiceCommand::ToggleEraser);
    }

    #[test]
    fn matches_english_keywords_case_insensitively() {
        assert_eq!(classify("Clear the board"), VoiceCommand::ClearCanvas);
        assert_eq!(classify("  CAMERA  "), VoiceCommand::ToggleCamera);
    }

    #[test]
    fn first_match_wins() {
        // Mentions both clear and camera; clear comes first in the table
        assert_eq!(classify("清空鏡頭"), VoiceCommand::ClearCanvas);
        assert_eq!(classify("camera eraser"), VoiceCommand::ToggleCamera);
    }

    #[test]
    fn unknown_speech_is_free_text() {
        assert_eq!(
            classify("  七十二 "),
            VoiceCommand::FreeText("七十二".to_string())
        );
    }
}
