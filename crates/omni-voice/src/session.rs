//! Call session state: lifecycle, transcript, duration, and the single in-flight request.

use crate::error::{VoiceError, VoiceResult};
use crate::transcript::{Speaker, TranscriptEntry, TranscriptLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// `Idle → Active → Ended`. `Ended` is terminal; a new call gets a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Active,
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => f.write_str("idle"),
            CallState::Active => f.write_str("active"),
            CallState::Ended => f.write_str("ended"),
        }
    }
}

/// The remote-processing request currently allowed to apply its result.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: u64,
    cancel: CancellationToken,
}

impl PendingRequest {
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[derive(Debug)]
pub struct CallSession {
    id: Uuid,
    state: CallState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_secs: u64,
    transcript: TranscriptLog,
    pending: Option<PendingRequest>,
    next_request_id: u64,
    /// Call-scoped abort signal. Every async task of the call runs under a child of it.
    aborted: CancellationToken,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CallState::Idle,
            started_at: None,
            ended_at: None,
            duration_secs: 0,
            transcript: TranscriptLog::new(),
            pending: None,
            next_request_id: 0,
            aborted: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CallState::Active
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// The call-scoped token; cancelled exactly when the call ends.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.aborted
    }

    pub(crate) fn activate(&mut self) -> VoiceResult<()> {
        if self.state != CallState::Idle {
            return Err(VoiceError::InvalidState(format!(
                "cannot start a call from state {}",
                self.state
            )));
        }
        self.state = CallState::Active;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Abort everything and move to `Ended`. Returns false if the call was not active.
    pub(crate) fn end(&mut self) -> bool {
        if self.state != CallState::Active {
            return false;
        }
        // Abort first so any task resuming from here on sees a dead call.
        self.aborted.cancel();
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.state = CallState::Ended;
        self.ended_at = Some(Utc::now());
        true
    }

    pub(crate) fn append(&mut self, speaker: Speaker, text: impl Into<String>) -> TranscriptEntry {
        self.transcript.append(speaker, text)
    }

    /// Register a new outstanding request, cancelling the previous one.
    pub(crate) fn issue_request(&mut self) -> PendingRequest {
        if let Some(previous) = self.pending.take() {
            previous.cancel.cancel();
        }
        self.next_request_id += 1;
        let pending = PendingRequest {
            id: self.next_request_id,
            cancel: self.aborted.child_token(),
        };
        self.pending = Some(pending.clone());
        pending
    }

    /// Clear the outstanding request if `id` is still the current one.
    pub(crate) fn settle(&mut self, id: u64) -> bool {
        match &self.pending {
            Some(p) if p.id == id && !p.cancel.is_cancelled() => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn tick(&mut self) -> u64 {
        if self.is_active() {
            self.duration_secs += 1;
        }
        self.duration_secs
    }
}
