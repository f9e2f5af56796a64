//! Dispatch configuration loaded from TOML and `OMNI__*` environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | OMNI_CONFIG | config/dispatch.toml | Optional TOML file with the sections below. |
//! | OMNI__BACKEND__BASE_URL | http://localhost:8000 | Emergency backend (REST). |
//! | OMNI__BACKEND__FEED_URL | ws://localhost:8000/ws | Live push channel. |
//! | OMNI__CALL__SPEAKER_ENABLED | true | When false, responses are logged but never spoken. |
//! | OMNI__BARGE_IN__MIN_CONFIDENCE | 0.75 | Recognizer confidence needed to interrupt playback. |
//!
//! The echo and barge-in thresholds are empirical; they are configuration, not invariants.

use crate::error::VoiceResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default greeting spoken when a call starts.
pub const DEFAULT_GREETING: &str =
    "911 Emergency. I'm JARVIS, your AI assistant. Tell me what's happening and I'll help you through this.";

/// Caller coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl Default for GeoPoint {
    /// Hyderabad city centre, used until the caller's position is known.
    fn default() -> Self {
        Self {
            lat: 17.385,
            lng: 78.4867,
        }
    }
}

/// Everything the war-room needs to run a call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend: BackendConfig,
    pub call: CallConfig,
    pub echo: EchoConfig,
    pub barge_in: BargeInConfig,
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// REST base URL without trailing slash.
    pub base_url: String,
    /// WebSocket URL of the live push channel.
    pub feed_url: String,
    pub request_timeout_secs: u64,
    /// Delay before the live feed reconnects after a close or error.
    pub feed_reconnect_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            feed_url: "ws://localhost:8000/ws".to_string(),
            request_timeout_secs: 30,
            feed_reconnect_secs: 3,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn feed_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.feed_reconnect_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub greeting: String,
    pub speaker_enabled: bool,
    /// Used as the caller location until `set_location` is called.
    pub fallback_location: GeoPoint,
    /// Fire `call/reset` and `incidents/clear` at the backend when a call starts.
    pub reset_backend_on_start: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            speaker_enabled: true,
            fallback_location: GeoPoint::default(),
            reset_backend_on_start: true,
        }
    }
}

/// Lexical echo heuristic parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Tokens shorter than this (in characters) are ignored.
    pub min_token_chars: usize,
    /// An utterance is an echo when strictly more than this share of its tokens
    /// appear in the last spoken text.
    pub match_ratio: f32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            min_token_chars: 4,
            match_ratio: 0.5,
        }
    }
}

/// Thresholds for promoting caller speech over playback into a barge-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub min_interim_chars: usize,
    pub min_final_chars: usize,
    /// Confidence must be strictly greater than this.
    pub min_confidence: f32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            min_interim_chars: 10,
            min_final_chars: 5,
            min_confidence: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Pause between a natural end of the recognizer stream and the restart.
    pub restart_delay_ms: u64,
    /// Confidence assumed for results the engine reports without one.
    pub default_confidence: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 100,
            default_confidence: 0.8,
        }
    }
}

impl RecognitionConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl DispatchConfig {
    /// Load config from file and environment. Precedence: env `OMNI__*` > `$OMNI_CONFIG` (or
    /// `config/dispatch.toml`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("OMNI_CONFIG").unwrap_or_else(|_| "config/dispatch.toml".to_string());
        Self::load_from(Some(Path::new(&config_path)))
    }

    /// Load from an explicit file (skipped when missing) plus the environment.
    pub fn load_from(path: Option<&Path>) -> VoiceResult<Self> {
        let builder = config::Config::builder();
        let builder = match path {
            Some(p) if p.exists() => builder.add_source(config::File::from(p)),
            _ => builder,
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("OMNI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Parse a TOML document on top of the defaults (no environment).
    pub fn from_toml_str(toml: &str) -> VoiceResult<Self> {
        let built = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(built.try_deserialize()?)
    }
}
