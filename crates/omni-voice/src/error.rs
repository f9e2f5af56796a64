//! Error types for the OmniDispatch voice core

use std::fmt;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice call
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Speech recognition is not supported in this environment")]
    UnsupportedEnvironment,

    #[error("Speech recognition error: {0}")]
    Recognition(RecognitionErrorKind),

    #[error("Remote processing error: {0}")]
    RemoteProcessing(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid call state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Live feed error: {0}")]
    Feed(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

impl VoiceError {
    /// True when the error only reports that a cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VoiceError::Cancelled)
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::RemoteProcessing(err.to_string())
    }
}

/// Error reported by a speech-recognition engine.
///
/// Codes follow the browser recognizer vocabulary (`no-speech`, `aborted`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    LanguageNotSupported,
    Other(String),
}

impl RecognitionErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "language-not-supported" => Self::LanguageNotSupported,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::LanguageNotSupported => "language-not-supported",
            Self::Other(code) => code,
        }
    }

    /// Transient errors are swallowed and recognition keeps going.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::Aborted)
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        assert!(RecognitionErrorKind::from_code("no-speech").is_transient());
        assert!(RecognitionErrorKind::from_code("aborted").is_transient());
        assert!(!RecognitionErrorKind::from_code("network").is_transient());
        assert!(!RecognitionErrorKind::from_code("something-new").is_transient());
    }

    #[test]
    fn unknown_code_round_trips() {
        let kind = RecognitionErrorKind::from_code("bad-grammar");
        assert_eq!(kind, RecognitionErrorKind::Other("bad-grammar".into()));
        assert_eq!(kind.to_string(), "bad-grammar");
    }
}
