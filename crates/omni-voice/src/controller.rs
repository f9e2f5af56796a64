//! Call controller: the only writer of call state.
//!
//! Owns the session, the speech capture, the playback queue and the remote-processing
//! collaborator, and turns classified caller speech into transcript entries, requests and
//! spoken responses.
//!
//! ```text
//!  SpeechCapture ──CaptureEvent──▶ ┌────────────────┐ ──enqueue/cancel──▶ PlaybackQueue
//!                                  │ CallController │
//!  CallHandle ────CallCommand────▶ │  (one task)    │ ──process()──────▶ EmergencyProcessor
//!  request task ─RequestOutcome──▶ └────────────────┘ ◀─────────────────┘
//!                                          │
//!                                          └──CallEvent (broadcast)──▶ UI / console
//! ```

use crate::api::{DispatchReply, DispatchRequest, DispatchedUnit, EmergencyProcessor, NearbyService};
use crate::config::{DispatchConfig, GeoPoint};
use crate::discriminator::{is_end_call_command, Classification, EchoDiscriminator};
use crate::error::{RecognitionErrorKind, VoiceError, VoiceResult};
use crate::playback::PlaybackQueue;
use crate::recognition::{CaptureEvent, SpeechCapture, SpeechEngine, Utterance};
use crate::session::{CallSession, CallState};
use crate::transcript::{Speaker, TranscriptEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LINE_ACTIVE_MESSAGE: &str = "Emergency line active. JARVIS AI ready to assist.";
pub const CALL_ENDED_MESSAGE: &str = "Call ended. Emergency services have been notified.";
pub const PROCESSING_ERROR_MESSAGE: &str = "Error processing. Please try again.";
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error. Check if backend is running.";
pub const VOICE_UNAVAILABLE_MESSAGE: &str =
    "Voice input is not available here. Type your emergency instead.";

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 32;

/// Everything a UI needs to follow the call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged(CallState),
    Transcript(TranscriptEntry),
    /// Partial caller speech; replaced by the next interim or final.
    CallerInterim(String),
    Processing(bool),
    Duration(u64),
    BargeIn,
    MuteChanged(bool),
    UnitsDispatched(Vec<DispatchedUnit>),
    NearbyServices(Vec<NearbyService>),
    CaptureError(RecognitionErrorKind),
}

/// Result of one remote-processing request, delivered back to the controller task.
#[derive(Debug)]
pub struct RequestOutcome {
    pub call_id: Uuid,
    pub request_id: u64,
    pub result: VoiceResult<DispatchReply>,
}

/// Point-in-time view of the call.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call_id: Uuid,
    pub state: CallState,
    pub duration_secs: u64,
    pub transcript: Vec<TranscriptEntry>,
    pub muted: bool,
    pub listening: bool,
    pub speaking: bool,
    pub processing: bool,
    pub location: GeoPoint,
}

pub struct CallController {
    config: DispatchConfig,
    session: CallSession,
    processor: Arc<dyn EmergencyProcessor>,
    playback: PlaybackQueue,
    capture: SpeechCapture,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    /// Restart guard for the capture session: call active and not muted.
    listen_gate: watch::Sender<bool>,
    discriminator: EchoDiscriminator,
    location: GeoPoint,
    muted: bool,
    speaker_enabled: bool,
    outcome_tx: mpsc::UnboundedSender<RequestOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<RequestOutcome>,
    events: broadcast::Sender<CallEvent>,
}

impl CallController {
    pub fn new(
        config: DispatchConfig,
        processor: Arc<dyn EmergencyProcessor>,
        engine: Arc<dyn SpeechEngine>,
        playback: PlaybackQueue,
    ) -> Self {
        let (listen_gate, gate_rx) = watch::channel(false);
        let (capture, capture_rx) = SpeechCapture::new(engine, config.recognition.clone(), gate_rx);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let discriminator = EchoDiscriminator::new(config.echo.clone(), config.barge_in.clone());

        Self {
            location: config.call.fallback_location,
            speaker_enabled: config.call.speaker_enabled,
            config,
            session: CallSession::new(),
            processor,
            playback,
            capture,
            capture_rx,
            listen_gate,
            discriminator,
            muted: false,
            outcome_tx,
            outcome_rx,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    pub fn location(&self) -> GeoPoint {
        self.location
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.session.id(),
            state: self.session.state(),
            duration_secs: self.session.duration_secs(),
            transcript: self.session.transcript().entries().to_vec(),
            muted: self.muted,
            listening: self.capture.is_listening(),
            speaking: self.playback.is_speaking(),
            processing: self.session.pending().is_some(),
            location: self.location,
        }
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn log_entry(&mut self, speaker: Speaker, text: impl Into<String>) {
        let entry = self.session.append(speaker, text);
        self.emit(CallEvent::Transcript(entry));
    }

    fn update_listen_gate(&self) {
        let open = self.session.is_active() && !self.muted;
        self.listen_gate.send_if_modified(|g| std::mem::replace(g, open) != open);
    }

    fn start_listening(&mut self) {
        match self.capture.start() {
            Ok(()) => {}
            Err(VoiceError::UnsupportedEnvironment) => {
                self.log_entry(Speaker::System, VOICE_UNAVAILABLE_MESSAGE);
            }
            Err(e) => {
                warn!(target: "omni::voice", error = %e, "could not start speech capture");
                self.log_entry(Speaker::System, VOICE_UNAVAILABLE_MESSAGE);
            }
        }
    }

    /// `Idle → Active`. An ended call is replaced by a fresh session first.
    pub async fn start_call(&mut self) -> VoiceResult<()> {
        match self.session.state() {
            CallState::Active => {
                return Err(VoiceError::InvalidState("a call is already active".into()));
            }
            CallState::Ended => self.session = CallSession::new(),
            CallState::Idle => {}
        }
        self.session.activate()?;
        self.muted = false;

        self.playback.reset(self.session.abort_token().clone()).await;
        self.playback.set_enabled(self.speaker_enabled).await;

        if self.config.call.reset_backend_on_start {
            let processor = Arc::clone(&self.processor);
            tokio::spawn(async move {
                if let Err(e) = processor.reset().await {
                    debug!(error = %e, "backend reset failed; continuing");
                }
            });
        }

        info!(target: "omni::voice", call_id = %self.session.id(), "📞 call started");
        self.emit(CallEvent::StateChanged(CallState::Active));
        self.log_entry(Speaker::System, LINE_ACTIVE_MESSAGE);

        self.update_listen_gate();
        self.start_listening();

        let greeting = self.config.call.greeting.clone();
        self.log_entry(Speaker::Dispatch, greeting.clone());
        self.playback.enqueue(greeting).await;
        Ok(())
    }

    /// `Active → Ended`. Aborts in-flight work before anything else; no closing audio.
    /// A no-op unless the call is active.
    pub async fn end_call(&mut self) {
        let had_pending = self.session.pending().is_some();
        if !self.session.end() {
            debug!("end_call ignored; no active call");
            return;
        }
        self.playback.cancel().await;
        self.update_listen_gate();
        self.capture.stop();

        if had_pending {
            self.emit(CallEvent::Processing(false));
        }
        self.log_entry(Speaker::System, CALL_ENDED_MESSAGE);
        self.emit(CallEvent::StateChanged(CallState::Ended));
        info!(
            target: "omni::voice",
            call_id = %self.session.id(),
            duration_secs = self.session.duration_secs(),
            "📴 call ended"
        );
    }

    /// Stop or resume listening without touching call state. Returns the new mute state.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.update_listen_gate();
        if self.session.is_active() {
            if self.muted {
                self.capture.stop();
            } else {
                self.start_listening();
            }
        }
        info!(target: "omni::voice", muted = self.muted, "🎙️ mute toggled");
        self.emit(CallEvent::MuteChanged(self.muted));
        self.muted
    }

    /// Speaker toggle. Off silences current playback and drops future responses.
    pub async fn set_speaker(&mut self, enabled: bool) {
        self.speaker_enabled = enabled;
        self.playback.set_enabled(enabled).await;
    }

    pub fn set_location(&mut self, location: GeoPoint) {
        debug!(lat = location.lat, lng = location.lng, "caller location updated");
        self.location = location;
    }

    /// Typed caller input. Only the end-call check applies; typed text cannot be an echo.
    pub async fn submit_text(&mut self, text: &str) -> VoiceResult<()> {
        if !self.session.is_active() {
            return Err(VoiceError::InvalidState("no active call".into()));
        }
        if is_end_call_command(text) {
            self.end_call().await;
            return Ok(());
        }
        self.forward_caller_input(text);
        Ok(())
    }

    pub async fn handle_capture_event(&mut self, event: CaptureEvent) {
        if !self.session.is_active() {
            debug!("capture event after call end; ignored");
            return;
        }
        match event {
            CaptureEvent::Interim(utterance) | CaptureEvent::Final(utterance) => {
                self.handle_utterance(utterance).await;
            }
            CaptureEvent::Error(kind) => {
                warn!(target: "omni::voice", error = %kind, "speech capture stopped");
                self.emit(CallEvent::CaptureError(kind.clone()));
                self.log_entry(Speaker::System, format!("Voice input stopped: {}.", kind));
            }
            CaptureEvent::End => debug!("recognizer stream ended"),
        }
    }

    async fn handle_utterance(&mut self, utterance: Utterance) {
        let last_spoken = self.playback.last_spoken();
        let speaking = self.playback.is_speaking();
        let class = self
            .discriminator
            .classify(&utterance, last_spoken.as_deref(), speaking);

        match class {
            Classification::Empty => {}
            Classification::Echo => debug!(text = %utterance.text, "ignoring echo of our own playback"),
            Classification::EndCallCommand => {
                info!(target: "omni::voice", text = %utterance.text, "🛑 end-call command");
                self.end_call().await;
            }
            Classification::BargeIn => {
                info!(target: "omni::voice", text = %utterance.text, "✋ barge-in, silencing playback");
                self.playback.cancel().await;
                self.emit(CallEvent::BargeIn);
                // Never processed while we are speaking, final or not.
                self.emit(CallEvent::CallerInterim(utterance.text));
            }
            Classification::BargeInCandidate | Classification::Interim => {
                self.emit(CallEvent::CallerInterim(utterance.text));
            }
            Classification::GenuineInput => self.forward_caller_input(&utterance.text),
        }
    }

    /// Log caller text and send it for processing, superseding any outstanding request.
    fn forward_caller_input(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.log_entry(Speaker::Caller, text);

        let pending = self.session.issue_request();
        let request = DispatchRequest {
            transcript: text.to_string(),
            caller_location: self.location,
        };
        let call_id = self.session.id();
        let processor = Arc::clone(&self.processor);
        let outcomes = self.outcome_tx.clone();
        let token = pending.token().clone();
        let request_id = pending.id;

        self.emit(CallEvent::Processing(true));
        debug!(request_id, "dispatching caller input");

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(VoiceError::Cancelled),
                result = processor.process(&request) => result,
            };
            let result = if token.is_cancelled() {
                Err(VoiceError::Cancelled)
            } else {
                result
            };
            let _ = outcomes.send(RequestOutcome {
                call_id,
                request_id,
                result,
            });
        });
    }

    /// Apply a finished request. Stale results (ended call, superseded or cancelled
    /// request) are dropped without a trace.
    pub async fn apply_outcome(&mut self, outcome: RequestOutcome) {
        if outcome.call_id != self.session.id() || !self.session.is_active() {
            debug!(request_id = outcome.request_id, "dropping result for a finished call");
            return;
        }
        if !self.session.settle(outcome.request_id) {
            debug!(request_id = outcome.request_id, "dropping superseded result");
            return;
        }
        self.emit(CallEvent::Processing(false));

        match outcome.result {
            Ok(reply) if reply.success => {
                self.log_entry(Speaker::Dispatch, reply.message.clone());
                if !reply.dispatched_units.is_empty() {
                    info!(
                        target: "omni::voice",
                        units = reply.dispatched_units.len(),
                        "🚑 units dispatched"
                    );
                    self.emit(CallEvent::UnitsDispatched(reply.dispatched_units));
                }
                if !reply.nearby_services.is_empty() {
                    self.emit(CallEvent::NearbyServices(reply.nearby_services));
                }
                self.playback.enqueue(reply.message).await;
            }
            Ok(_) => {
                warn!(target: "omni::voice", "backend reported failure");
                self.log_entry(Speaker::System, PROCESSING_ERROR_MESSAGE);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(target: "omni::voice", error = %e, "remote processing failed");
                self.log_entry(Speaker::System, CONNECTION_ERROR_MESSAGE);
            }
        }
    }

    /// One-second timer tick; counts only while the call is active.
    pub fn tick(&mut self) {
        if self.session.is_active() {
            let secs = self.session.tick();
            self.emit(CallEvent::Duration(secs));
        }
    }

    pub async fn next_capture_event(&mut self) -> Option<CaptureEvent> {
        self.capture_rx.recv().await
    }

    pub async fn next_outcome(&mut self) -> Option<RequestOutcome> {
        self.outcome_rx.recv().await
    }

    async fn handle_command(&mut self, command: CallCommand) -> bool {
        match command {
            CallCommand::Start(reply) => {
                let _ = reply.send(self.start_call().await);
            }
            CallCommand::End => self.end_call().await,
            CallCommand::ToggleMute(reply) => {
                let _ = reply.send(self.toggle_mute());
            }
            CallCommand::SetSpeaker(enabled) => self.set_speaker(enabled).await,
            CallCommand::SetLocation(location) => self.set_location(location),
            CallCommand::SubmitText(text, reply) => {
                let _ = reply.send(self.submit_text(&text).await);
            }
            CallCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            CallCommand::Shutdown => {
                self.end_call().await;
                return false;
            }
        }
        true
    }

    /// Drive the controller until shut down or every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<CallCommand>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.end_call().await;
                        break;
                    };
                    let starting = matches!(command, CallCommand::Start(_));
                    if !self.handle_command(command).await {
                        break;
                    }
                    if starting {
                        ticker.reset();
                    }
                }
                Some(event) = self.capture_rx.recv() => self.handle_capture_event(event).await,
                Some(outcome) = self.outcome_rx.recv() => self.apply_outcome(outcome).await,
                _ = ticker.tick() => self.tick(),
            }
        }
        info!(target: "omni::voice", "call controller stopped");
    }

    /// Spawn the controller on its own task.
    pub fn spawn(self) -> (CallHandle, broadcast::Receiver<CallEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = self.subscribe();
        let task = tokio::spawn(self.run(rx));
        (CallHandle { tx }, events, task)
    }
}

/// Requests to a running controller.
#[derive(Debug)]
pub enum CallCommand {
    Start(oneshot::Sender<VoiceResult<()>>),
    End,
    ToggleMute(oneshot::Sender<bool>),
    SetSpeaker(bool),
    SetLocation(GeoPoint),
    SubmitText(String, oneshot::Sender<VoiceResult<()>>),
    Snapshot(oneshot::Sender<CallSnapshot>),
    Shutdown,
}

/// Cloneable handle to a controller running under [`CallController::spawn`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    async fn send(&self, command: CallCommand) -> VoiceResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> CallCommand) -> VoiceResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await
            .map_err(|_| VoiceError::ChannelSend("call controller stopped".into()))
    }

    pub async fn start_call(&self) -> VoiceResult<()> {
        self.request(CallCommand::Start).await?
    }

    pub async fn end_call(&self) -> VoiceResult<()> {
        self.send(CallCommand::End).await
    }

    pub async fn toggle_mute(&self) -> VoiceResult<bool> {
        self.request(CallCommand::ToggleMute).await
    }

    pub async fn set_speaker(&self, enabled: bool) -> VoiceResult<()> {
        self.send(CallCommand::SetSpeaker(enabled)).await
    }

    pub async fn set_location(&self, location: GeoPoint) -> VoiceResult<()> {
        self.send(CallCommand::SetLocation(location)).await
    }

    pub async fn submit_text(&self, text: impl Into<String>) -> VoiceResult<()> {
        let text = text.into();
        self.request(|reply| CallCommand::SubmitText(text, reply)).await?
    }

    pub async fn snapshot(&self) -> VoiceResult<CallSnapshot> {
        self.request(CallCommand::Snapshot).await
    }

    pub async fn shutdown(&self) -> VoiceResult<()> {
        self.send(CallCommand::Shutdown).await
    }
}
