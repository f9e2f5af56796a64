//! # Omni Voice - Emergency Call Turn-Taking
//!
//! Voice core of the OmniDispatch console: listens to the caller, keeps the dispatcher's
//! own voice from being mistaken for caller speech, lets the caller interrupt (barge-in),
//! and speaks backend responses one at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Call Controller                           │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │Speech Capture│→ │ Echo / Barge-in  │→ │  Call Session    │   │
//! │  │ (auto-restart)│ │  Discriminator   │  │ (Idle→Active→End)│   │
//! │  └──────────────┘  └──────────────────┘  └──────────────────┘   │
//! │         ↑                   │ cancel              │ process()    │
//! │   last spoken /             ↓                     ↓              │
//! │   is speaking      ┌──────────────┐      ┌──────────────────┐   │
//! │         └──────────│Playback Queue│ ←────│ Backend (HTTP)   │   │
//! │                    │ (FIFO, TTS)  │reply │ process / speak  │   │
//! │                    └──────────────┘      └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!            Live feed (WebSocket) runs beside the call, for the UI.
//! ```

pub mod api;
pub mod config;
pub mod controller;
pub mod discriminator;
pub mod error;
pub mod feed;
pub mod output;
pub mod playback;
pub mod recognition;
pub mod session;
pub mod transcript;
pub mod tts;

pub use api::{
    BackendClient, DispatchReply, DispatchRequest, DispatchedUnit, EmergencyProcessor,
    NearbyService, Responder,
};
pub use config::{DispatchConfig, GeoPoint};
pub use controller::{CallCommand, CallController, CallEvent, CallHandle, CallSnapshot};
pub use discriminator::{is_end_call_command, Classification, EchoDiscriminator};
pub use error::{RecognitionErrorKind, VoiceError, VoiceResult};
pub use feed::{FeedMessage, FeedState, FeedUpdate, Incident, LiveFeed};
#[cfg(feature = "speaker")]
pub use output::RodioSink;
pub use output::{AudioSink, PacedSink};
pub use playback::PlaybackQueue;
pub use recognition::{
    CaptureEvent, CaptureState, ChannelSpeechEngine, RecognizerEvent, SpeechCapture,
    SpeechEngine, Utterance,
};
pub use session::{CallSession, CallState};
pub use transcript::{format_duration, Speaker, TranscriptEntry, TranscriptLog};
pub use tts::{BackendTts, PlaceholderTts, TtsBackend};
