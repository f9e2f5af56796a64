//! OmniDispatch War-Room Console
//!
//! Runs one emergency call at a time from the terminal. Typed lines stand in for the
//! platform speech recognizer; responses are spoken through the backend's TTS and the live
//! responder feed is logged alongside the call.

mod commands;

use anyhow::Context;
use commands::ConsoleInput;
use omni_voice::{
    format_duration, AudioSink, BackendClient, BackendTts, CallEvent, CallHandle, CallController,
    ChannelSpeechEngine, DispatchConfig, FeedState, FeedUpdate, LiveFeed, PacedSink,
    PlaybackQueue, RecognizerEvent,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[omni-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DispatchConfig::load().context("load dispatch config")?;
    let api = BackendClient::new(&config.backend).context("build backend client")?;
    let playback = PlaybackQueue::new(Arc::new(BackendTts::new(api.clone())), output_sink());
    let (engine, mic) = ChannelSpeechEngine::new();

    tracing::info!(
        backend = %api.base_url(),
        feed = %config.backend.feed_url,
        "OmniDispatch console started"
    );

    match api.init_responders(config.call.fallback_location).await {
        Ok(responders) => tracing::info!(count = responders.len(), "responders placed"),
        Err(e) => tracing::warn!(error = %e, "could not place responders; is the backend up?"),
    }

    let shutdown = CancellationToken::new();
    let feed = LiveFeed::from_config(&config.backend).spawn(shutdown.child_token());
    let feed_task = tokio::spawn(log_feed(feed));

    let controller = CallController::new(config, Arc::new(api), Arc::new(engine), playback);
    let (handle, events, controller_task) = controller.spawn();
    let events_task = tokio::spawn(log_call_events(events));

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                if !dispatch_input(commands::parse(&line), &handle, &mic).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down console");
                break;
            }
        }
    }

    handle.shutdown().await.ok();
    shutdown.cancel();
    controller_task.await.ok();
    events_task.abort();
    feed_task.await.ok();
    Ok(())
}

#[cfg(feature = "speaker")]
fn output_sink() -> Arc<dyn AudioSink> {
    match omni_voice::RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output; responses will be paced silently");
            Arc::new(PacedSink::default())
        }
    }
}

#[cfg(not(feature = "speaker"))]
fn output_sink() -> Arc<dyn AudioSink> {
    Arc::new(PacedSink::default())
}

/// Returns false when the console should exit.
async fn dispatch_input(
    input: ConsoleInput,
    handle: &CallHandle,
    mic: &mpsc::UnboundedSender<RecognizerEvent>,
) -> bool {
    let result = match input {
        ConsoleInput::Blank => Ok(()),
        ConsoleInput::Speech { text, is_final } => {
            let _ = mic.send(RecognizerEvent::Result {
                text,
                confidence: None,
                is_final,
            });
            Ok(())
        }
        ConsoleInput::Call => handle.start_call().await,
        ConsoleInput::End => handle.end_call().await,
        ConsoleInput::Mute => handle.toggle_mute().await.map(|muted| {
            println!("microphone {}", if muted { "muted" } else { "live" });
        }),
        ConsoleInput::Speaker(on) => handle.set_speaker(on).await,
        ConsoleInput::Where(location) => handle.set_location(location).await,
        ConsoleInput::Type(text) => handle.submit_text(text).await,
        ConsoleInput::Status => handle.snapshot().await.map(|snap| {
            println!(
                "call {} [{}] {} | mic {} | speaking {} | awaiting dispatch {} | at {:.4},{:.4}",
                snap.call_id,
                snap.state,
                format_duration(snap.duration_secs),
                if snap.muted { "muted" } else if snap.listening { "live" } else { "off" },
                snap.speaking,
                snap.processing,
                snap.location.lat,
                snap.location.lng,
            );
        }),
        ConsoleInput::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        ConsoleInput::Invalid(msg) => {
            println!("{}", msg);
            Ok(())
        }
        ConsoleInput::Quit => return false,
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "command failed");
    }
    true
}

async fn log_call_events(mut events: broadcast::Receiver<CallEvent>) {
    loop {
        match events.recv().await {
            Ok(CallEvent::Transcript(entry)) => {
                println!("[{}] {}: {}", entry.timestamp.format("%H:%M:%S"), entry.speaker, entry.text);
            }
            Ok(CallEvent::CallerInterim(text)) => println!("  … {}", text),
            Ok(CallEvent::StateChanged(state)) => tracing::info!(%state, "call state"),
            Ok(CallEvent::BargeIn) => tracing::info!("caller interrupted playback"),
            Ok(CallEvent::UnitsDispatched(units)) => {
                for unit in units {
                    tracing::info!(
                        unit = %unit.unit,
                        kind = %unit.kind,
                        eta_minutes = ?unit.eta_minutes,
                        "unit dispatched"
                    );
                }
            }
            Ok(CallEvent::NearbyServices(services)) => {
                for s in services {
                    tracing::info!(name = %s.name, kind = %s.kind, distance_km = s.distance, "nearby");
                }
            }
            Ok(CallEvent::Duration(secs)) if secs % 30 == 0 => {
                tracing::info!(duration = %format_duration(secs), "call running");
            }
            Ok(CallEvent::CaptureError(kind)) => tracing::warn!(error = %kind, "microphone error"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "console fell behind call events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_feed(mut updates: mpsc::UnboundedReceiver<FeedUpdate>) {
    let mut state = FeedState::default();
    while let Some(update) = updates.recv().await {
        state.apply(&update);
        match update {
            FeedUpdate::Connected => tracing::info!("live feed connected"),
            FeedUpdate::Disconnected => tracing::warn!("live feed lost; reconnecting"),
            FeedUpdate::Message(_) => tracing::info!(
                ready = state.ready_count(),
                active = state.active_count(),
                incidents = state.incidents.len(),
                "feed update"
            ),
        }
    }
}
