//! Audio output sinks. A sink plays one synthesized item to completion, or returns early
//! when the playback token is cancelled (barge-in, end of call).

use crate::error::VoiceResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Platform audio playback capability.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` and resolve on natural end, on error, or as soon as `cancel` fires.
    async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> VoiceResult<()>;
}

/// Headless sink: "plays" every item for a fixed time. Stands in for a speaker on machines
/// without audio output, keeping barge-in timing realistic.
#[derive(Debug, Clone)]
pub struct PacedSink {
    per_item: Duration,
}

impl PacedSink {
    pub fn new(per_item: Duration) -> Self {
        Self { per_item }
    }
}

impl Default for PacedSink {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl AudioSink for PacedSink {
    async fn play(&self, _audio: Vec<u8>, cancel: CancellationToken) -> VoiceResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.per_item) => {}
        }
        Ok(())
    }
}

#[cfg(feature = "speaker")]
pub use speaker::RodioSink;

#[cfg(feature = "speaker")]
mod speaker {
    use super::*;
    use crate::error::VoiceError;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::Arc;
    use tracing::info;

    /// Plays decoded audio on the default output device.
    ///
    /// `rodio::OutputStream` is not `Send`, so it lives on a dedicated thread for the lifetime
    /// of the sink; only the `Sink` is shared with async code.
    pub struct RodioSink {
        sink: Arc<Sink>,
        _shutdown: std::sync::mpsc::Sender<()>,
    }

    impl RodioSink {
        pub fn new() -> VoiceResult<Self> {
            let (handle_tx, handle_rx) = std::sync::mpsc::channel();
            let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

            std::thread::spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Hold the stream until the sink is dropped.
                    let _ = shutdown_rx.recv();
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            });

            let handle = handle_rx
                .recv()
                .map_err(|e| VoiceError::Playback(e.to_string()))?
                .map_err(VoiceError::Playback)?;
            let sink = Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
            info!("RodioSink: output device ready");
            Ok(Self {
                sink: Arc::new(sink),
                _shutdown: shutdown_tx,
            })
        }
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> VoiceResult<()> {
            if audio.is_empty() {
                return Ok(());
            }
            let source = rodio::Decoder::new(Cursor::new(audio))
                .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
            self.sink.append(source.convert_samples::<f32>());
            self.sink.play();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.sink.stop();
                        info!("RodioSink: stopped (interruption or end of call)");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {
                        if self.sink.empty() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
