//! Supervised voice listener
//!
//! The dispatcher holds the "voice should be on" intent and owns the
//! listener task. All of its decisions happen in [`VoiceDispatcher::handle`],
//! called from the session's event loop; spawned tasks only report back
//! through the emitter as [`VoiceEvent`]s, so voice never mutates session
//! state concurrently with pointer input.
//!
//! Every listener start gets a fresh generation number. Events from an older
//! generation (a listener that was already replaced or disabled) are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use super::{VoiceCommand, classify};
use crate::Result;

/// Delivers recognized utterances from a running listener
///
/// `send` returns false once nobody is listening any more; the listener
/// should then wind down.
#[derive(Clone)]
pub struct UtteranceSink(Arc<dyn Fn(String) -> bool + Send + Sync>);

impl UtteranceSink {
    /// Wrap a delivery function
    pub fn new(deliver: impl Fn(String) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(deliver))
    }

    /// Deliver one utterance
    #[must_use]
    pub fn send(&self, text: impl Into<String>) -> bool {
        (self.0)(text.into())
    }
}

impl std::fmt::Debug for UtteranceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtteranceSink").finish_non_exhaustive()
    }
}

/// A speech recognition backend
#[async_trait]
pub trait SpeechBackend: Send + Sync + 'static {
    /// Acquire (or confirm) microphone access
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if permission is denied or there is no
    /// microphone
    async fn request_permission(&self) -> Result<()>;

    /// Run one listening session
    ///
    /// The future delivers utterances to `sink` and resolves when the
    /// session ends: `Ok` for a normal end, `Err` for a failure.
    fn listen(&self, sink: UtteranceSink) -> BoxFuture<'static, Result<()>>;
}

/// Events posted back to the session by voice tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Microphone permission request finished
    PermissionResolved {
        /// Generation that asked
        generation: u64,
        /// Outcome, with the error rendered as text
        result: std::result::Result<(), String>,
    },
    /// Listener heard something
    Utterance {
        /// Listener generation
        generation: u64,
        /// Transcript
        text: String,
    },
    /// Listener session ended
    Terminated {
        /// Listener generation
        generation: u64,
        /// Failure reason, `None` for a normal end
        error: Option<String>,
    },
    /// Restart backoff elapsed
    RestartDue {
        /// Listener generation
        generation: u64,
    },
}

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Off
    Disabled,
    /// Waiting for microphone permission
    Starting,
    /// Listener running (or restarting)
    Listening,
}

/// What the session should do after a dispatcher call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOutcome {
    /// Nothing visible changed
    None,
    /// State changed
    State(VoiceState),
    /// An utterance was classified
    Command(VoiceCommand),
    /// Voice turned itself off
    Disabled {
        /// User-facing reason
        reason: String,
    },
    /// No backend in this runtime
    Unsupported,
}

/// Restart policy for the listener
///
/// Backoff doubles per consecutive failure, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive failures before voice is disabled
    pub max_consecutive_failures: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    /// Delay before restarting after `failures` consecutive failures
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }
}

type Emitter = Arc<dyn Fn(VoiceEvent) -> bool + Send + Sync>;

/// Supervises the speech listener
pub struct VoiceDispatcher {
    backend: Option<Arc<dyn SpeechBackend>>,
    policy: RestartPolicy,
    emit: Emitter,
    state: VoiceState,
    generation: u64,
    failures: u32,
    last_utterance: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for VoiceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceDispatcher")
            .field("supported", &self.backend.is_some())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl VoiceDispatcher {
    /// Create a disabled dispatcher
    ///
    /// `backend` is `None` when speech recognition isn't available; the
    /// dispatcher then reports [`VoiceOutcome::Unsupported`] on every toggle.
    pub fn new(
        backend: Option<Arc<dyn SpeechBackend>>,
        policy: RestartPolicy,
        emit: impl Fn(VoiceEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            backend,
            policy,
            emit: Arc::new(emit),
            state: VoiceState::Disabled,
            generation: 0,
            failures: 0,
            last_utterance: None,
            tasks: Vec::new(),
        }
    }

    /// Whether a backend exists
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    /// Most recent utterance heard
    #[must_use]
    pub fn last_utterance(&self) -> Option<&str> {
        self.last_utterance.as_deref()
    }

    /// Consecutive listener failures so far
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Flip voice on or off
    pub fn toggle(&mut self) -> VoiceOutcome {
        let Some(backend) = self.backend.clone() else {
            return VoiceOutcome::Unsupported;
        };

        if self.state != VoiceState::Disabled {
            self.disable();
            return VoiceOutcome::State(VoiceState::Disabled);
        }

        self.generation += 1;
        self.failures = 0;
        self.state = VoiceState::Starting;

        let generation = self.generation;
        let emit = Arc::clone(&self.emit);
        self.tasks.push(tokio::spawn(async move {
            let result = backend
                .request_permission()
                .await
                .map_err(|e| e.to_string());
            emit(VoiceEvent::PermissionResolved { generation, result });
        }));

        tracing::info!(generation, "voice starting");
        VoiceOutcome::State(VoiceState::Starting)
    }

    /// Stop listening and release the microphone
    pub fn disable(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Anything still queued from the old listener is now stale
        self.generation += 1;
        if self.state != VoiceState::Disabled {
            tracing::info!("voice disabled");
        }
        self.state = VoiceState::Disabled;
    }

    /// React to an event from a voice task
    pub fn handle(&mut self, event: VoiceEvent) -> VoiceOutcome {
        if event_generation(&event) != self.generation {
            tracing::trace!(?event, current = self.generation, "stale voice event dropped");
            return VoiceOutcome::None;
        }

        match event {
            VoiceEvent::PermissionResolved { result, .. } => {
                if self.state != VoiceState::Starting {
                    return VoiceOutcome::None;
                }
                match result {
                    Ok(()) => {
                        self.state = VoiceState::Listening;
                        self.spawn_listener();
                        VoiceOutcome::State(VoiceState::Listening)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "microphone permission denied");
                        self.disable();
                        VoiceOutcome::Disabled {
                            reason: format!("microphone permission required: {e}"),
                        }
                    }
                }
            }
            VoiceEvent::Utterance { text, .. } => {
                if self.state != VoiceState::Listening {
                    return VoiceOutcome::None;
                }
                self.failures = 0;
                let command = classify(&text);
                tracing::info!(utterance = %text, ?command, "utterance");
                self.last_utterance = Some(text);
                VoiceOutcome::Command(command)
            }
            VoiceEvent::Terminated { error, .. } => {
                if self.state != VoiceState::Listening {
                    return VoiceOutcome::None;
                }
                self.on_terminated(error)
            }
            VoiceEvent::RestartDue { .. } => {
                if self.state == VoiceState::Listening {
                    self.spawn_listener();
                }
                VoiceOutcome::None
            }
        }
    }

    fn on_terminated(&mut self, error: Option<String>) -> VoiceOutcome {
        let Some(error) = error else {
            // Backends end sessions on their own; just go again
            tracing::debug!(generation = self.generation, "listener ended, restarting");
            self.spawn_listener();
            return VoiceOutcome::None;
        };

        self.failures += 1;
        if self.failures >= self.policy.max_consecutive_failures {
            tracing::warn!(
                failures = self.failures,
                error = %error,
                "voice listener keeps failing, giving up"
            );
            self.disable();
            return VoiceOutcome::Disabled {
                reason: format!("voice recognition stopped: {error}"),
            };
        }

        let delay = self.policy.delay_for(self.failures);
        tracing::warn!(
            failures = self.failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "voice listener failed, restarting"
        );

        self.generation += 1;
        let generation = self.generation;
        let emit = Arc::clone(&self.emit);
        self.prune_tasks();
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emit(VoiceEvent::RestartDue { generation });
        }));
        VoiceOutcome::None
    }

    fn spawn_listener(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let emit = Arc::clone(&self.emit);
        let sink_emit = Arc::clone(&self.emit);
        let sink = UtteranceSink::new(move |text| {
            sink_emit(VoiceEvent::Utterance { generation, text })
        });

        self.prune_tasks();
        self.tasks.push(tokio::spawn(async move {
            let error = backend.listen(sink).await.err().map(|e| e.to_string());
            emit(VoiceEvent::Terminated { generation, error });
        }));
        tracing::debug!(generation, "listener started");
    }

    fn prune_tasks(&mut self) {
        self.tasks.retain(|t| !t.is_finished());
    }
}

impl Drop for VoiceDispatcher {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

const fn event_generation(event: &VoiceEvent) -> u64 {
    match event {
        VoiceEvent::PermissionResolved { generation, .. }
        | VoiceEvent::Utterance { generation, .. }
        | VoiceEvent::Terminated { generation, .. }
        | VoiceEvent::RestartDue { generation } => *generation,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::Error;

    /// Backend whose listen sessions fail immediately
    struct FailingBackend;

    #[async_trait]
    impl SpeechBackend for FailingBackend {
        async fn request_permission(&self) -> Result<()> {
            Ok(())
        }

        fn listen(&self, _sink: UtteranceSink) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Err(Error::Voice("network".into())) })
        }
    }

    /// Backend that says one thing per session, then ends normally
    struct ChattyBackend {
        phrases: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SpeechBackend for ChattyBackend {
        async fn request_permission(&self) -> Result<()> {
            Ok(())
        }

        fn listen(&self, sink: UtteranceSink) -> BoxFuture<'static, Result<()>> {
            let phrase = self.phrases.lock().unwrap().pop();
            Box::pin(async move {
                match phrase {
                    Some(p) => {
                        let _ = sink.send(p);
                        Ok(())
                    }
                    None => std::future::pending().await,
                }
            })
        }
    }

    fn dispatcher(
        backend: Option<Arc<dyn SpeechBackend>>,
    ) -> (VoiceDispatcher, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let d = VoiceDispatcher::new(backend, RestartPolicy::default(), move |e| tx.send(e).is_ok());
        (d, rx)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RestartPolicy::default();
        assert_eq!(p.delay_for(0), Duration::ZERO);
        assert_eq!(p.delay_for(1), Duration::from_millis(250));
        assert_eq!(p.delay_for(2), Duration::from_millis(500));
        assert_eq!(p.delay_for(3), Duration::from_secs(1));
        assert_eq!(p.delay_for(30), Duration::from_secs(5));
    }

    #[test]
    fn no_backend_is_unsupported() {
        let (mut d, _rx) = dispatcher(None);
        assert!(!d.is_supported());
        assert_eq!(d.toggle(), VoiceOutcome::Unsupported);
        assert_eq!(d.state(), VoiceState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_consecutive_failures() {
        let (mut d, mut rx) = dispatcher(Some(Arc::new(FailingBackend)));
        assert_eq!(d.toggle(), VoiceOutcome::State(VoiceState::Starting));

        let mut last = VoiceOutcome::None;
        while d.state() != VoiceState::Disabled {
            let event = rx.recv().await.unwrap();
            last = d.handle(event);
        }

        assert!(matches!(last, VoiceOutcome::Disabled { .. }));
        assert_eq!(d.consecutive_failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_end_restarts_and_keeps_listening() {
        let backend = ChattyBackend {
            phrases: Mutex::new(vec!["橡皮擦", "清空"]),
        };
        let (mut d, mut rx) = dispatcher(Some(Arc::new(backend)));
        d.toggle();

        let mut commands = Vec::new();
        while commands.len() < 2 {
            let event = rx.recv().await.unwrap();
            if let VoiceOutcome::Command(c) = d.handle(event) {
                commands.push(c);
            }
        }

        assert_eq!(commands, vec![VoiceCommand::ClearCanvas, VoiceCommand::ToggleEraser]);
        assert_eq!(d.state(), VoiceState::Listening);
        assert_eq!(d.last_utterance(), Some("橡皮擦"));
    }

    #[tokio::test]
    async fn events_from_old_generation_are_ignored() {
        let (mut d, _rx) = dispatcher(Some(Arc::new(FailingBackend)));
        d.toggle();
        let stale = VoiceEvent::Utterance {
            generation: 0,
            text: "清空".into(),
        };
        assert_eq!(d.handle(stale), VoiceOutcome::None);

        d.disable();
        let late = VoiceEvent::PermissionResolved {
            generation: 1,
            result: Ok(()),
        };
        assert_eq!(d.handle(late), VoiceOutcome::None);
        assert_eq!(d.state(), VoiceState::Disabled);
    }
}
