//! Speech capture: one continuous listening session on top of a restartable recognizer.
//!
//! Platform recognizers stop on their own after silence or a maximum duration. The capture
//! session hides that: on a natural end it reopens the engine after a short delay, as long
//! as the restart guard (call active and not muted) still allows it.
//!
//! ```text
//!            start()                     natural end, guard open
//!  Stopped ───────────▶ Listening ─────────────────────────────┐
//!     ▲                  │   ▲                                  │
//!     │  stop() / fatal  │   └──────── reopen after delay ◀─────┘
//!     └──────────────────┘
//! ```

use crate::config::RecognitionConfig;
use crate::error::{RecognitionErrorKind, VoiceError, VoiceResult};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One span of recognized caller speech.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f32,
    pub is_final: bool,
}

impl Utterance {
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            is_final: true,
        }
    }
}

/// Raw events produced by a recognizer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Result {
        text: String,
        /// Some engines omit confidence or report 0 for interims; the capture session
        /// substitutes a default for both.
        confidence: Option<f32>,
        is_final: bool,
    },
    Error(RecognitionErrorKind),
    /// The engine stopped listening on its own.
    End,
}

/// An open recognizer stream. Cancelling `stop` asks the engine to shut it down.
pub struct RecognitionStream {
    events: mpsc::Receiver<RecognizerEvent>,
    stop: CancellationToken,
}

impl RecognitionStream {
    pub fn new(events: mpsc::Receiver<RecognizerEvent>, stop: CancellationToken) -> Self {
        Self { events, stop }
    }
}

/// Platform speech-recognition capability: continuous, interim-enabled streams.
pub trait SpeechEngine: Send + Sync {
    /// False when the platform has no recognizer at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Open a new continuous stream. Must be called from within a Tokio runtime.
    fn open(&self) -> VoiceResult<RecognitionStream>;
}

/// Events surfaced by the capture session to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Interim(Utterance),
    Final(Utterance),
    /// Fatal recognizer error; the session has stopped and will not restart.
    Error(RecognitionErrorKind),
    /// The underlying stream ended (the session may restart it).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Listening,
}

/// Continuous listening session over a [`SpeechEngine`].
pub struct SpeechCapture {
    engine: Arc<dyn SpeechEngine>,
    config: RecognitionConfig,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    state: Arc<watch::Sender<CaptureState>>,
    restart_guard: watch::Receiver<bool>,
    session: Option<CancellationToken>,
}

impl SpeechCapture {
    /// Create a capture session. `restart_guard` must read `true` for an ended stream to be
    /// reopened; the call controller drives it from "call active and not muted".
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        config: RecognitionConfig,
        restart_guard: watch::Receiver<bool>,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(CaptureState::Stopped);
        let capture = Self {
            engine,
            config,
            events_tx,
            state: Arc::new(state),
            restart_guard,
            session: None,
        };
        (capture, events_rx)
    }

    /// Begin listening. Reports `UnsupportedEnvironment` without retrying when the platform
    /// has no recognizer. Starting an already listening session is a no-op.
    pub fn start(&mut self) -> VoiceResult<()> {
        if !self.engine.is_supported() {
            warn!(target: "omni::voice", "speech recognition unavailable on this platform");
            return Err(VoiceError::UnsupportedEnvironment);
        }
        if self.state() == CaptureState::Listening {
            debug!("capture already listening");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.session = Some(cancel.clone());
        self.state.send_replace(CaptureState::Listening);
        info!(target: "omni::voice", "🎤 listening");

        tokio::spawn(pump(
            Arc::clone(&self.engine),
            self.config.clone(),
            self.events_tx.clone(),
            Arc::clone(&self.state),
            self.restart_guard.clone(),
            cancel,
        ));
        Ok(())
    }

    /// Stop listening and suppress auto-restart. Idempotent.
    pub fn stop(&mut self) {
        if let Some(token) = self.session.take() {
            token.cancel();
        }
        let changed = self.state.send_if_modified(|s| {
            let was_listening = *s == CaptureState::Listening;
            *s = CaptureState::Stopped;
            was_listening
        });
        if changed {
            info!(target: "omni::voice", "🎤 stopped listening");
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }
}

impl Drop for SpeechCapture {
    fn drop(&mut self) {
        if let Some(token) = self.session.take() {
            token.cancel();
        }
    }
}

enum StreamExit {
    Cancelled,
    Ended,
    Fatal,
}

async fn pump(
    engine: Arc<dyn SpeechEngine>,
    config: RecognitionConfig,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    state: Arc<watch::Sender<CaptureState>>,
    restart_guard: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        let mut stream = match engine.open() {
            Ok(stream) => stream,
            Err(e) => {
                let kind = match e {
                    VoiceError::Recognition(kind) => kind,
                    other => RecognitionErrorKind::Other(other.to_string()),
                };
                warn!(error = %kind, "recognizer failed to open");
                let _ = events_tx.send(CaptureEvent::Error(kind));
                mark_stopped(&state, &cancel);
                return;
            }
        };
        debug!("recognizer stream opened");

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamExit::Cancelled,
                event = stream.events.recv() => match event {
                    Some(RecognizerEvent::Result { text, confidence, is_final }) => {
                        let confidence = match confidence {
                            Some(c) if c > 0.0 => c,
                            _ => config.default_confidence,
                        };
                        let event = if is_final {
                            CaptureEvent::Final(Utterance::final_text(text, confidence))
                        } else {
                            CaptureEvent::Interim(Utterance::interim(text, confidence))
                        };
                        let _ = events_tx.send(event);
                    }
                    Some(RecognizerEvent::Error(kind)) if kind.is_transient() => {
                        debug!(error = %kind, "transient recognizer error, continuing");
                    }
                    Some(RecognizerEvent::Error(kind)) => {
                        warn!(target: "omni::voice", error = %kind, "recognizer failed");
                        let _ = events_tx.send(CaptureEvent::Error(kind));
                        break StreamExit::Fatal;
                    }
                    Some(RecognizerEvent::End) | None => break StreamExit::Ended,
                },
            }
        };
        stream.stop.cancel();

        match exit {
            StreamExit::Cancelled => return,
            StreamExit::Fatal => {
                mark_stopped(&state, &cancel);
                return;
            }
            StreamExit::Ended => {
                let _ = events_tx.send(CaptureEvent::End);
            }
        }

        if !*restart_guard.borrow() {
            debug!("recognizer ended; restart not allowed");
            mark_stopped(&state, &cancel);
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.restart_delay()) => {}
        }
        if !*restart_guard.borrow() {
            mark_stopped(&state, &cancel);
            return;
        }
        debug!("recognizer ended; restarting");
    }
}

/// A session that stopped by itself reports Stopped, unless it was already superseded.
fn mark_stopped(state: &watch::Sender<CaptureState>, cancel: &CancellationToken) {
    if !cancel.is_cancelled() {
        state.send_replace(CaptureState::Stopped);
    }
}

/// Push-driven engine: events written to the paired sender are delivered to whichever
/// stream is currently open. Closing the sender ends the source with a fatal error.
pub struct ChannelSpeechEngine {
    source: Arc<Mutex<mpsc::UnboundedReceiver<RecognizerEvent>>>,
    supported: bool,
}

impl ChannelSpeechEngine {
    pub fn new() -> (Self, mpsc::UnboundedSender<RecognizerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            source: Arc::new(Mutex::new(rx)),
            supported: true,
        };
        (engine, tx)
    }

    /// An engine that reports no recognition capability.
    pub fn unsupported() -> Self {
        let (mut engine, _tx) = Self::new();
        engine.supported = false;
        engine
    }
}

impl SpeechEngine for ChannelSpeechEngine {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn open(&self) -> VoiceResult<RecognitionStream> {
        if !self.supported {
            return Err(VoiceError::UnsupportedEnvironment);
        }
        let (tx, rx) = mpsc::channel(32);
        let stop = CancellationToken::new();
        let source = Arc::clone(&self.source);
        let task_stop = stop.clone();

        tokio::spawn(async move {
            let mut source = source.lock().await;
            loop {
                tokio::select! {
                    biased;
                    _ = task_stop.cancelled() => break,
                    event = source.recv() => match event {
                        Some(event) => {
                            let end = matches!(event, RecognizerEvent::End);
                            if tx.send(event).await.is_err() || end {
                                break;
                            }
                        }
                        None => {
                            let closed = RecognitionErrorKind::AudioCapture;
                            let _ = tx.send(RecognizerEvent::Error(closed)).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(RecognitionStream::new(rx, stop))
    }
}
