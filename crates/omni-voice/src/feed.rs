//! Live push feed: responder positions and incidents streamed by the backend over a
//! WebSocket. Consumed by the surrounding UI; the call controller never reads it.

use crate::api::{DispatchedUnit, NearbyService, Responder};
use crate::config::BackendConfig;
use crate::error::{VoiceError, VoiceResult};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An incident as broadcast by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: String,
    pub description: String,
    pub status: String,
    pub created_at: Option<String>,
    pub location: Option<IncidentLocation>,
    pub dispatched_units: Vec<DispatchedUnit>,
    pub nearby_services: Vec<NearbyService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    InitialState {
        #[serde(default)]
        responders: Vec<Responder>,
        #[serde(default)]
        incidents: Vec<Incident>,
    },
    NewIncident {
        incident: Incident,
    },
    ResponderUpdate {
        #[serde(default)]
        responders: Vec<Responder>,
    },
    IncidentsCleared,
    Pong,
    #[serde(other)]
    Unknown,
}

impl FeedMessage {
    pub fn parse(text: &str) -> VoiceResult<Self> {
        serde_json::from_str(text).map_err(|e| VoiceError::Feed(format!("bad feed message: {}", e)))
    }
}

/// What the feed task reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Connected,
    Disconnected,
    Message(FeedMessage),
}

/// Responders and incidents folded from feed messages.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    pub connected: bool,
    pub responders: Vec<Responder>,
    pub incidents: Vec<Incident>,
}

impl FeedState {
    pub fn apply(&mut self, update: &FeedUpdate) {
        match update {
            FeedUpdate::Connected => self.connected = true,
            FeedUpdate::Disconnected => self.connected = false,
            FeedUpdate::Message(msg) => self.apply_message(msg),
        }
    }

    pub fn apply_message(&mut self, msg: &FeedMessage) {
        match msg {
            FeedMessage::InitialState {
                responders,
                incidents,
            } => {
                self.responders = responders.clone();
                self.incidents = incidents.clone();
            }
            FeedMessage::NewIncident { incident } => self.incidents.push(incident.clone()),
            FeedMessage::ResponderUpdate { responders } => self.responders = responders.clone(),
            FeedMessage::IncidentsCleared => self.incidents.clear(),
            FeedMessage::Pong | FeedMessage::Unknown => {}
        }
    }

    /// Responders free to take a call.
    pub fn ready_count(&self) -> usize {
        self.count_status("available")
    }

    /// Responders en route.
    pub fn active_count(&self) -> usize {
        self.count_status("responding")
    }

    fn count_status(&self, status: &str) -> usize {
        self.responders.iter().filter(|r| r.status == status).count()
    }
}

/// Reconnecting WebSocket client for the backend's `/ws` channel.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    url: String,
    reconnect_delay: Duration,
}

impl LiveFeed {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.feed_url.clone(), config.feed_reconnect_delay())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn [`LiveFeed::run`] and hand back the update stream.
    pub fn spawn(self, cancel: CancellationToken) -> mpsc::UnboundedReceiver<FeedUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { self.run(tx, cancel).await });
        rx
    }

    /// Stay connected until `cancel` fires or the consumer goes away, reconnecting after
    /// `reconnect_delay` whenever the socket closes or fails.
    pub async fn run(&self, tx: mpsc::UnboundedSender<FeedUpdate>, cancel: CancellationToken) {
        loop {
            match self.session(&tx, &cancel).await {
                Ok(()) => debug!("feed closed"),
                Err(e) => warn!(target: "omni::voice", error = %e, "feed connection failed"),
            }
            if cancel.is_cancelled() || tx.is_closed() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        debug!("feed stopped");
    }

    async fn session(
        &self,
        tx: &mpsc::UnboundedSender<FeedUpdate>,
        cancel: &CancellationToken,
    ) -> VoiceResult<()> {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = connect_async(self.url.as_str()) => res.map_err(|e| VoiceError::Feed(e.to_string()))?,
        };
        info!(target: "omni::voice", url = %self.url, "📡 feed connected");
        let _ = tx.send(FeedUpdate::Connected);

        let (_sink, mut stream) = stream.split();
        let result = loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => match FeedMessage::parse(text.as_str()) {
                    Ok(msg) => {
                        if tx.send(FeedUpdate::Message(msg)).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping feed message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "feed close frame");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(VoiceError::Feed(e.to_string())),
                None => break Ok(()),
            }
        };

        info!(target: "omni::voice", "📡 feed disconnected");
        let _ = tx.send(FeedUpdate::Disconnected);
        result
    }
}
