//! Backend client tests against an in-process axum server that mimics the dispatch API.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use omni_voice::config::BackendConfig;
use omni_voice::output::AudioSink;
use omni_voice::{
    BackendClient, BackendTts, CallController, ChannelSpeechEngine, DispatchConfig,
    DispatchRequest, EmergencyProcessor, GeoPoint, PlaybackQueue, Speaker, TtsBackend,
    VoiceError, VoiceResult,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeBackend {
    resets: AtomicUsize,
    clears: AtomicUsize,
    last_location: Mutex<Option<Value>>,
}

async fn process(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let transcript = body["transcript"].as_str().unwrap_or_default().to_string();
    if transcript == "crash" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "model unavailable"})),
        );
    }
    if transcript.starts_with("slow") {
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
    if transcript.contains("garbled") {
        return (StatusCode::OK, Json(json!({"success": false, "message": ""})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "incident_id": "INC-1",
            "message": format!("Engine 7 is on the way to {}.", body["caller_location"]["lat"]),
            "dispatched_units": [
                {"id": "ENG-7", "unit": "Engine 7", "type": "fire", "station": "",
                 "distance_km": 1.2, "eta_minutes": 4, "lat": 17.39, "lng": 78.49}
            ],
            "nearby_services": [],
            "eta_minutes": 4
        })),
    )
}

async fn speak(Json(body): Json<Value>) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default();
    if text.starts_with("slow") {
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
    if text.contains("fail") {
        return Json(json!({"error": "ElevenLabs error: 401", "text": text}));
    }
    let audio = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    Json(json!({"success": true, "audio": audio, "format": "mp3"}))
}

async fn reset_call(State(fake): State<Arc<FakeBackend>>) -> Json<Value> {
    fake.resets.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true, "message": "Call state reset"}))
}

async fn clear_incidents(State(fake): State<Arc<FakeBackend>>) -> Json<Value> {
    fake.clears.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true}))
}

async fn init_responders(
    State(fake): State<Arc<FakeBackend>>,
    Json(location): Json<Value>,
) -> Json<Value> {
    *fake.last_location.lock().unwrap() = Some(location);
    responder_list().await
}

async fn responder_list() -> Json<Value> {
    Json(json!({"responders": [
        {"id": "ENG-7", "type": "fire", "unit": "Engine 7", "status": "available", "lat": 17.39, "lng": 78.49},
        {"id": "MED-9", "type": "medical", "unit": "Medic 9", "status": "responding", "lat": 17.38, "lng": 78.48,
         "destination": {"lat": 17.385, "lng": 78.4867}, "eta_minutes": 3}
    ]}))
}

async fn serve() -> (String, Arc<FakeBackend>) {
    let fake = Arc::new(FakeBackend::default());
    let app = Router::new()
        .route("/api/emergency/process-full", post(process))
        .route("/api/voice/speak", post(speak))
        .route("/api/call/reset", post(reset_call))
        .route("/api/incidents/clear", post(clear_incidents))
        .route("/api/responders/init", post(init_responders))
        .route("/api/responders", get(responder_list))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), fake)
}

fn client(base_url: &str) -> BackendClient {
    client_with_timeout(base_url, 5)
}

fn client_with_timeout(base_url: &str, request_timeout_secs: u64) -> BackendClient {
    let config = BackendConfig {
        base_url: format!("{}/", base_url),
        request_timeout_secs,
        ..Default::default()
    };
    BackendClient::new(&config).expect("client builds")
}

fn request(transcript: &str) -> DispatchRequest {
    DispatchRequest {
        transcript: transcript.to_string(),
        caller_location: GeoPoint::new(17.385, 78.4867),
    }
}

#[tokio::test]
async fn process_emergency_decodes_dispatch() {
    let (url, _) = serve().await;
    let reply = client(&url)
        .process_emergency(&request("my house is on fire"))
        .await
        .unwrap();
    assert!(reply.success);
    assert_eq!(reply.message, "Engine 7 is on the way to 17.385.");
    assert_eq!(reply.dispatched_units.len(), 1);
    assert_eq!(reply.incident_id.as_deref(), Some("INC-1"));
}

#[tokio::test]
async fn server_error_is_a_remote_processing_error() {
    let (url, _) = serve().await;
    let err = client(&url).process(&request("crash")).await.unwrap_err();
    assert!(matches!(err, VoiceError::RemoteProcessing(ref msg) if msg.contains("500")));
}

#[tokio::test]
async fn unreachable_backend_is_a_remote_processing_error() {
    let err = client("http://127.0.0.1:1")
        .process(&request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::RemoteProcessing(_)));
}

#[tokio::test]
async fn slow_processing_outlives_request_timeout() {
    let (url, _) = serve().await;
    let api = client_with_timeout(&url, 1);

    let reply = api.process(&request("slow fire report")).await.unwrap();
    assert!(reply.success);

    // Speech synthesis is still bounded.
    let err = api.speak("slow words").await.unwrap_err();
    assert!(matches!(err, VoiceError::Tts(_)));
}

#[tokio::test]
async fn backend_tts_decodes_base64_audio() {
    let (url, _) = serve().await;
    let tts = BackendTts::new(client(&url));
    let audio = tts.synthesize("Stay on the line.").await.unwrap();
    assert_eq!(audio, b"Stay on the line.".to_vec());

    let err = tts.synthesize("this will fail").await.unwrap_err();
    assert!(matches!(err, VoiceError::Tts(ref msg) if msg.contains("401")));
}

#[tokio::test]
async fn reset_clears_call_and_incidents() {
    let (url, fake) = serve().await;
    client(&url).reset().await.unwrap();
    assert_eq!(fake.resets.load(Ordering::SeqCst), 1);
    assert_eq!(fake.clears.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn responders_are_placed_around_caller() {
    let (url, fake) = serve().await;
    let api = client(&url);
    let placed = api.init_responders(GeoPoint::new(12.97, 77.59)).await.unwrap();
    assert_eq!(placed.len(), 2);
    let sent = fake.last_location.lock().unwrap().clone().unwrap();
    assert_eq!(sent["lat"], 12.97);

    let listed = api.responders().await.unwrap();
    assert_eq!(listed[1].status, "responding");
    assert_eq!(listed[1].destination, Some(GeoPoint::new(17.385, 78.4867)));
}

/// Collects every audio buffer it is asked to play.
#[derive(Default)]
struct CollectingSink {
    played: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl AudioSink for CollectingSink {
    async fn play(&self, audio: Vec<u8>, _cancel: CancellationToken) -> VoiceResult<()> {
        self.played.lock().unwrap().push(audio);
        Ok(())
    }
}

#[tokio::test]
async fn call_against_backend_speaks_the_dispatch_reply() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (url, fake) = serve().await;
    let api = client(&url);
    let sink = Arc::new(CollectingSink::default());
    let playback = PlaybackQueue::new(Arc::new(BackendTts::new(api.clone())), sink.clone());
    let (engine, _mic) = ChannelSpeechEngine::new();
    let mut controller = CallController::new(
        DispatchConfig::default(),
        Arc::new(api),
        Arc::new(engine),
        playback,
    );

    controller.start_call().await.unwrap();
    controller.set_location(GeoPoint::new(17.4, 78.5));
    controller.submit_text("my house is on fire").await.unwrap();
    let outcome = timeout(Duration::from_secs(5), controller.next_outcome())
        .await
        .unwrap()
        .unwrap();
    controller.apply_outcome(outcome).await;

    let expected = "Engine 7 is on the way to 17.4.";
    let last = controller.session().transcript().last().unwrap().clone();
    assert_eq!(last.speaker, Speaker::Dispatch);
    assert_eq!(last.text, expected);

    timeout(Duration::from_secs(5), async {
        loop {
            if sink
                .played
                .lock()
                .unwrap()
                .iter()
                .any(|a| a.as_slice() == expected.as_bytes())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatch reply was never played");

    // The start-of-call reset is fire-and-forget; give it a moment to land.
    timeout(Duration::from_secs(5), async {
        while fake.clears.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("backend was never reset");
    assert_eq!(fake.resets.load(Ordering::SeqCst), 1);
}
