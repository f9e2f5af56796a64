//! Text-to-speech backends used by the playback queue.

use crate::api::BackendClient;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use base64::Engine as _;
use tracing::debug;

/// Backend that turns text into encoded audio bytes (MP3/WAV).
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize `text`. An empty vec means "nothing to play".
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Placeholder TTS: returns empty audio so nothing plays. Useful with a paced sink.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Production TTS: the dispatch backend's `/api/voice/speak`, which returns base64 audio.
#[derive(Debug, Clone)]
pub struct BackendTts {
    client: BackendClient,
}

impl BackendTts {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TtsBackend for BackendTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let reply = self.client.speak(text).await?;
        if !reply.success {
            let reason = reply.error.unwrap_or_else(|| "speech synthesis failed".to_string());
            return Err(VoiceError::Tts(reason));
        }
        let encoded = reply
            .audio
            .ok_or_else(|| VoiceError::Tts("response carried no audio".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VoiceError::Tts(format!("invalid base64 audio: {}", e)))?;
        debug!(chars = text.len(), bytes = bytes.len(), "synthesized speech");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_tts_returns_empty() {
        let out = PlaceholderTts.synthesize("hello").await.unwrap();
        assert!(out.is_empty());
    }
}
