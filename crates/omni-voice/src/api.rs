//! HTTP client for the OmniDispatch backend (emergency processing, TTS, call/incident resets).
//!
//! Replies are decoded leniently: the backend omits arrays on follow-up messages and reports
//! TTS failures as `{error, text}` without a `success` flag.

use crate::config::{BackendConfig, GeoPoint};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const EMERGENCY_PROCESS_PATH: &str = "/api/emergency/process-full";
pub const VOICE_SPEAK_PATH: &str = "/api/voice/speak";
pub const CALL_RESET_PATH: &str = "/api/call/reset";
pub const INCIDENTS_CLEAR_PATH: &str = "/api/incidents/clear";
pub const RESPONDERS_INIT_PATH: &str = "/api/responders/init";
pub const RESPONDERS_PATH: &str = "/api/responders";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub transcript: String,
    pub caller_location: GeoPoint,
}

/// A unit the backend assigned to the incident.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchedUnit {
    pub id: String,
    pub unit: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub station: String,
    pub distance_km: f64,
    pub eta_minutes: Option<f64>,
    pub lat: f64,
    pub lng: f64,
}

/// Hospital, fire or police station near the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearbyService {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub lat: f64,
    pub lng: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchReply {
    pub success: bool,
    pub message: String,
    pub dispatched_units: Vec<DispatchedUnit>,
    pub nearby_services: Vec<NearbyService>,
    pub incident_id: Option<String>,
    pub eta_minutes: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpeakReply {
    pub success: bool,
    /// Base64-encoded audio.
    pub audio: Option<String>,
    pub format: Option<String>,
    pub error: Option<String>,
}

/// A response unit as seen by the backend and the live feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Responder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub unit: String,
    /// `available`, `responding` or `on-scene`.
    pub status: String,
    pub lat: f64,
    pub lng: f64,
    pub destination: Option<GeoPoint>,
    pub eta_minutes: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RespondersReply {
    responders: Vec<Responder>,
}

/// Remote emergency-processing collaborator of the call controller.
#[async_trait]
pub trait EmergencyProcessor: Send + Sync {
    async fn process(&self, request: &DispatchRequest) -> VoiceResult<DispatchReply>;

    /// Forget conversation context before a new call. Best effort.
    async fn reset(&self) -> VoiceResult<()> {
        Ok(())
    }
}

/// Async client for the dispatch backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    /// Bounds TTS, reset and responder calls. Emergency processing is bounded only by
    /// cancellation, since agent replies can take arbitrarily long.
    request_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> VoiceResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let res = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn decode<R: DeserializeOwned>(res: reqwest::Response) -> VoiceResult<R> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::RemoteProcessing(format!(
                "backend error {}: {}",
                status, body
            )));
        }
        Ok(res.json::<R>().await?)
    }

    pub async fn process_emergency(&self, request: &DispatchRequest) -> VoiceResult<DispatchReply> {
        debug!(chars = request.transcript.len(), "posting transcript for processing");
        let res = self
            .client
            .post(self.url(EMERGENCY_PROCESS_PATH))
            .json(request)
            .send()
            .await?;
        Self::decode(res).await
    }

    pub async fn speak(&self, text: &str) -> VoiceResult<SpeakReply> {
        let body = serde_json::json!({ "text": text });
        self.post_json(VOICE_SPEAK_PATH, &body)
            .await
            .map_err(|e| match e {
                VoiceError::RemoteProcessing(msg) => VoiceError::Tts(msg),
                other => other,
            })
    }

    pub async fn reset_call(&self) -> VoiceResult<()> {
        let _: serde_json::Value = self.post_json(CALL_RESET_PATH, &serde_json::json!({})).await?;
        Ok(())
    }

    pub async fn clear_incidents(&self) -> VoiceResult<()> {
        let _: serde_json::Value = self
            .post_json(INCIDENTS_CLEAR_PATH, &serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Place the demo responder fleet around the caller.
    pub async fn init_responders(&self, location: GeoPoint) -> VoiceResult<Vec<Responder>> {
        let reply: RespondersReply = self.post_json(RESPONDERS_INIT_PATH, &location).await?;
        Ok(reply.responders)
    }

    pub async fn responders(&self) -> VoiceResult<Vec<Responder>> {
        let res = self
            .client
            .get(self.url(RESPONDERS_PATH))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let reply: RespondersReply = Self::decode(res).await?;
        Ok(reply.responders)
    }
}

#[async_trait]
impl EmergencyProcessor for BackendClient {
    async fn process(&self, request: &DispatchRequest) -> VoiceResult<DispatchReply> {
        self.process_emergency(request).await
    }

    async fn reset(&self) -> VoiceResult<()> {
        self.reset_call().await?;
        self.clear_incidents().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_reply_without_arrays_decodes() {
        let reply: DispatchReply = serde_json::from_str(
            r#"{"success": true, "message": "Stay low, help is coming.", "is_followup": true}"#,
        )
        .unwrap();
        assert!(reply.success);
        assert!(reply.dispatched_units.is_empty());
        assert!(reply.nearby_services.is_empty());
    }

    #[test]
    fn first_reply_carries_units_and_services() {
        let reply: DispatchReply = serde_json::from_str(
            r#"{
                "success": true,
                "incident_id": "INC-1",
                "message": "Engine 7 dispatched to your location, ETA 4 minutes.",
                "dispatched_units": [
                    {"id": "ENG-7", "unit": "Engine 7", "type": "fire", "station": "",
                     "distance_km": 1.2, "eta_minutes": 4, "lat": 17.39, "lng": 78.49}
                ],
                "nearby_services": [
                    {"name": "General Hospital", "type": "Hospital", "lat": 17.377, "lng": 78.4967, "distance": 1.3}
                ],
                "eta_minutes": 4
            }"#,
        )
        .unwrap();
        assert_eq!(reply.dispatched_units[0].kind, "fire");
        assert_eq!(reply.dispatched_units[0].eta_minutes, Some(4.0));
        assert_eq!(reply.nearby_services[0].name, "General Hospital");
        assert_eq!(reply.incident_id.as_deref(), Some("INC-1"));
    }

    #[test]
    fn tts_failure_shape_decodes_as_unsuccessful() {
        let reply: SpeakReply =
            serde_json::from_str(r#"{"error": "ElevenLabs error: 401", "text": "hi"}"#).unwrap();
        assert!(!reply.success);
        assert!(reply.audio.is_none());
        assert_eq!(reply.error.as_deref(), Some("ElevenLabs error: 401"));
    }

    #[test]
    fn request_serializes_caller_location() {
        let req = DispatchRequest {
            transcript: "my house is on fire".into(),
            caller_location: GeoPoint::new(17.385, 78.4867),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["caller_location"]["lat"], 17.385);
        assert_eq!(json["transcript"], "my house is on fire");
    }
}
