//! Audio playback queue: speaks dispatcher responses one at a time, strictly FIFO, and can
//! be silenced instantly (barge-in, end of call).
//!
//! A single drain task runs while the queue is non-empty. Every drain task owns a child of
//! the queue's current cancellation token; `cancel()` fires that token and installs a fresh
//! one, so a stale drain task can never touch the queue again once it resumes.

use crate::error::{VoiceError, VoiceResult};
use crate::output::AudioSink;
use crate::tts::TtsBackend;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One response waiting to be spoken.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    pub text: String,
}

struct QueueState {
    pending: VecDeque<PlaybackItem>,
    draining: bool,
    /// Token handed to the running drain task.
    current: CancellationToken,
    /// Parent scope (the call); cancelling it silences the queue for good.
    scope: CancellationToken,
    enabled: bool,
}

struct Shared {
    tts: Arc<dyn TtsBackend>,
    sink: Arc<dyn AudioSink>,
    state: Mutex<QueueState>,
    speaking: watch::Sender<bool>,
    /// Lowercased text most recently handed to playback, for echo detection.
    last_spoken: watch::Sender<Option<String>>,
}

/// Cloneable handle to the playback queue.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl PlaybackQueue {
    pub fn new(tts: Arc<dyn TtsBackend>, sink: Arc<dyn AudioSink>) -> Self {
        let scope = CancellationToken::new();
        let (speaking, _) = watch::channel(false);
        let (last_spoken, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                tts,
                sink,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    draining: false,
                    current: scope.child_token(),
                    scope,
                    enabled: true,
                }),
                speaking,
                last_spoken,
            }),
        }
    }

    /// Append `text`; starts draining if nothing is playing. No-op while the speaker is off
    /// or the current scope has been cancelled.
    pub async fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        let mut state = self.shared.state.lock().await;
        if !state.enabled || state.scope.is_cancelled() {
            debug!("playback disabled; dropping response");
            return;
        }

        state.pending.push_back(PlaybackItem { text: text.clone() });
        set_last_spoken(&self.shared, Some(text.to_lowercase()));

        if !state.draining {
            state.draining = true;
            let token = state.current.clone();
            tokio::spawn(drain(Arc::clone(&self.shared), token));
        }
    }

    /// Clear pending items and stop the item being played. Idempotent.
    pub async fn cancel(&self) {
        let mut state = self.shared.state.lock().await;
        let had_work = state.draining || !state.pending.is_empty();
        state.pending.clear();
        if state.draining {
            state.current.cancel();
            state.current = state.scope.child_token();
            state.draining = false;
        }
        set_last_spoken(&self.shared, None);
        self.shared.speaking.send_if_modified(|s| std::mem::replace(s, false));
        if had_work {
            info!(target: "omni::voice", "🔇 playback cancelled");
        }
    }

    /// Cancel everything and bind the queue to a new scope (a new call).
    pub async fn reset(&self, scope: CancellationToken) {
        self.cancel().await;
        let mut state = self.shared.state.lock().await;
        state.current = scope.child_token();
        state.scope = scope;
    }

    /// Speaker toggle. Turning the speaker off also silences anything in flight.
    pub async fn set_enabled(&self, enabled: bool) {
        {
            let mut state = self.shared.state.lock().await;
            state.enabled = enabled;
        }
        if !enabled {
            self.cancel().await;
        }
    }

    pub fn is_speaking(&self) -> bool {
        *self.shared.speaking.borrow()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.shared.speaking.subscribe()
    }

    /// Lowercased text most recently handed to playback; cleared once the queue runs dry.
    pub fn last_spoken(&self) -> Option<String> {
        self.shared.last_spoken.borrow().clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }
}

fn set_last_spoken(shared: &Shared, text: Option<String>) {
    shared.last_spoken.send_if_modified(|current| {
        if *current == text {
            return false;
        }
        *current = text;
        true
    });
}

async fn drain(shared: Arc<Shared>, token: CancellationToken) {
    loop {
        let item = {
            let mut state = shared.state.lock().await;
            if token.is_cancelled() {
                return;
            }
            match state.pending.pop_front() {
                Some(item) => {
                    set_last_spoken(&shared, Some(item.text.to_lowercase()));
                    shared.speaking.send_replace(true);
                    item
                }
                None => {
                    state.draining = false;
                    set_last_spoken(&shared, None);
                    shared.speaking.send_replace(false);
                    return;
                }
            }
        };

        if let Err(e) = speak(&shared, &item, &token).await {
            if e.is_cancelled() {
                return;
            }
            warn!(error = %e, "playback failed; skipping item");
        }
    }
}

async fn speak(shared: &Shared, item: &PlaybackItem, token: &CancellationToken) -> VoiceResult<()> {
    let audio = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(VoiceError::Cancelled),
        audio = shared.tts.synthesize(&item.text) => audio?,
    };
    if token.is_cancelled() {
        return Err(VoiceError::Cancelled);
    }
    debug!(chars = item.text.len(), "🔊 speaking");
    shared.sink.play(audio, token.clone()).await?;
    if token.is_cancelled() {
        return Err(VoiceError::Cancelled);
    }
    Ok(())
}
