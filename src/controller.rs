//! Recognition loop controller
//!
//! Decides when snapshots are taken and sent, and which responses may touch
//! the presentation. Purely synchronous: the session performs the network
//! calls and feeds completions back through [`RecognitionLoop::on_response`].
//!
//! Ordering rests on one watermark: a response is applied only if its
//! sequence number is above every sequence applied (or invalidated) before
//! it. Streaming is single-flight: a tick that finds a stream request still
//! outstanding is dropped, never queued. Single-shot requests are never
//! suppressed; overlapping ones are reconciled by the watermark.

use std::collections::BTreeSet;

use crate::compositor::{SequenceCounter, Snapshot};
use crate::error::TransportError;
use crate::prediction::{RecognitionRequest, RecognitionResult, RequestMode};
use crate::presentation::{DetailPanel, DigitDisplay, Presentation};

/// Coarse controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Nothing outstanding
    Idle,
    /// At least one request outstanding
    Requesting,
}

/// Why a response was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A newer result was already applied (or the display was cleared since)
    Stale {
        /// Watermark at the time of rejection
        watermark: u64,
    },
    /// Streaming result that landed after the live camera was switched off
    StreamStopped,
}

/// What happened to a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Result written to the presentation
    Applied,
    /// Result discarded without touching the presentation
    Rejected(RejectReason),
    /// Request failed; single-shot failures were surfaced to the user
    Failed(TransportError),
}

/// Single-flight, stale-rejecting recognition loop
#[derive(Debug, Default)]
pub struct RecognitionLoop {
    sequences: SequenceCounter,
    watermark: u64,
    streaming: bool,
    stream_in_flight: Option<u64>,
    single_in_flight: BTreeSet<u64>,
}

impl RecognitionLoop {
    /// Create an idle loop with streaming disabled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse state
    #[must_use]
    pub fn state(&self) -> LoopState {
        if self.in_flight() == 0 {
            LoopState::Idle
        } else {
            LoopState::Requesting
        }
    }

    /// Number of outstanding requests of either mode
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.single_in_flight.len() + usize::from(self.stream_in_flight.is_some())
    }

    /// Whether a streaming request is outstanding
    #[must_use]
    pub const fn stream_in_flight(&self) -> bool {
        self.stream_in_flight.is_some()
    }

    /// Sequence of the newest applied (or invalidated) result
    #[must_use]
    pub const fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Whether the streaming cycle is enabled
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Enable or disable the streaming cycle
    pub fn set_streaming(&mut self, streaming: bool) {
        if self.streaming != streaming {
            tracing::debug!(streaming, "streaming cycle toggled");
        }
        self.streaming = streaming;
    }

    /// Handle a streaming timer tick
    ///
    /// Calls `compose` with a fresh sequence number and returns the request
    /// to send, or returns `None` when streaming is off or a stream request
    /// is still outstanding.
    pub fn on_tick(&mut self, compose: impl FnOnce(u64) -> Snapshot) -> Option<RecognitionRequest> {
        if !self.streaming {
            return None;
        }
        if let Some(outstanding) = self.stream_in_flight {
            tracing::trace!(outstanding, "stream tick dropped, request in flight");
            return None;
        }

        let sequence = self.sequences.issue();
        let snapshot = compose(sequence);
        self.stream_in_flight = Some(sequence);
        tracing::trace!(sequence, "stream request issued");

        Some(RecognitionRequest {
            snapshot,
            mode: RequestMode::Stream,
        })
    }

    /// Issue a single-shot request
    ///
    /// Always issued, even with others outstanding. Shows the pending
    /// indicator.
    pub fn request_single(
        &mut self,
        compose: impl FnOnce(u64) -> Snapshot,
        presentation: &mut Presentation,
    ) -> RecognitionRequest {
        let sequence = self.sequences.issue();
        let snapshot = compose(sequence);
        self.single_in_flight.insert(sequence);
        presentation.set_display(DigitDisplay::Pending);

        tracing::debug!(
            sequence,
            outstanding = self.single_in_flight.len(),
            "single-shot request issued"
        );

        RecognitionRequest {
            snapshot,
            mode: RequestMode::Single,
        }
    }

    /// Make every already-issued sequence stale
    ///
    /// Used when the display is cleared so results for earlier snapshots
    /// cannot repaint it.
    pub fn invalidate_issued(&mut self) {
        self.watermark = self.watermark.max(self.sequences.last_issued());
    }

    /// Reconcile a completed request with the presentation
    pub fn on_response(
        &mut self,
        mode: RequestMode,
        sequence: u64,
        result: Result<RecognitionResult, TransportError>,
        presentation: &mut Presentation,
    ) -> ResponseOutcome {
        match mode {
            RequestMode::Stream => {
                if self.stream_in_flight == Some(sequence) {
                    self.stream_in_flight = None;
                }
            }
            RequestMode::Single => {
                self.single_in_flight.remove(&sequence);
            }
        }

        match result {
            Err(error) => self.on_failure(mode, sequence, error, presentation),
            Ok(result) => {
                if mode == RequestMode::Stream && !self.streaming {
                    tracing::debug!(sequence, "stream result after camera stopped, discarded");
                    return ResponseOutcome::Rejected(RejectReason::StreamStopped);
                }
                if sequence <= self.watermark {
                    tracing::debug!(sequence, watermark = self.watermark, "stale result discarded");
                    return ResponseOutcome::Rejected(RejectReason::Stale {
                        watermark: self.watermark,
                    });
                }

                self.watermark = sequence;
                presentation.show_result(&result, mode == RequestMode::Stream);
                tracing::debug!(sequence, digits = ?result.full_digit, "result applied");
                ResponseOutcome::Applied
            }
        }
    }

    fn on_failure(
        &mut self,
        mode: RequestMode,
        sequence: u64,
        error: TransportError,
        presentation: &mut Presentation,
    ) -> ResponseOutcome {
        match mode {
            RequestMode::Stream => {
                // Next tick is already on its way
                tracing::debug!(sequence, error = %error, "stream request failed");
            }
            RequestMode::Single => {
                if sequence <= self.watermark {
                    tracing::debug!(sequence, error = %error, "stale single-shot failure ignored");
                    return ResponseOutcome::Rejected(RejectReason::Stale {
                        watermark: self.watermark,
                    });
                }
                tracing::warn!(sequence, error = %error, "recognition request failed");
                // The failure glyph is now the newest outcome on screen
                self.watermark = sequence;
                presentation.set_display(DigitDisplay::Failed);
                presentation.set_details(DetailPanel::Waiting);
                presentation.set_overlays(Vec::new());
            }
        }
        ResponseOutcome::Failed(error)
    }
}
