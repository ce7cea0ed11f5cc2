//! Gateway integration tests: start a real server and exercise it over HTTP.
//!
//! Run with: `cargo test -p preceptor-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use preceptor_core::config::Config;
use preceptor_core::error::Result;
use preceptor_core::types::{AudioFormat, Turn};
use preceptor_gateway::GatewayState;
use preceptor_providers::{LanguageModel, NullArchive, Passage, PassageIndex};
use preceptor_rtc::TokenIssuer;
use preceptor_session::{SessionRegistry, TurnEngine};
use preceptor_speech::{SttGateway, SttProvider, TtsGateway, TtsProvider};
use preceptor_tutor::ResponseGenerator;

struct EchoLlm;

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, _system: &str, _history: &[Turn], user_text: &str) -> Result<String> {
        Ok(format!("You asked: {user_text}"))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1, 0.2])
    }
}

struct EmptyIndex;

#[async_trait]
impl PassageIndex for EmptyIndex {
    async fn query(&self, _embedding: &[f32], _k: usize, _user_id: &str) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

struct FixedStt;

#[async_trait]
impl SttProvider for FixedStt {
    fn id(&self) -> &'static str {
        "fixed"
    }

    async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> Result<Option<String>> {
        Ok(Some("what is two plus two".into()))
    }
}

struct BeepTts;

#[async_trait]
impl TtsProvider for BeepTts {
    fn id(&self) -> &'static str {
        "beep"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Ok(vec![0u8; 16])
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_state() -> Arc<GatewayState> {
    let issuer = TokenIssuer::new("app-id", "app-secret", 3600);
    let generator = ResponseGenerator::new(Arc::new(EchoLlm), Arc::new(EmptyIndex), 3);
    let engine = TurnEngine::new(
        SttGateway::new(Arc::new(FixedStt)),
        TtsGateway::new(Arc::new(BeepTts)),
        generator,
        Arc::new(NullArchive),
    );
    let registry = Arc::new(SessionRegistry::new(
        issuer.clone(),
        engine,
        Arc::new(NullArchive),
        50,
        "voice_tutor",
    ));
    Arc::new(GatewayState::new(
        Arc::new(Config::default()),
        registry,
        issuer,
    ))
}

/// Start a gateway on a free port and wait for it to come up.
async fn start_test_gateway() -> u16 {
    let port = find_free_port();
    let state = test_state();
    tokio::spawn(async move {
        let _ = preceptor_gateway::start_gateway(state, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }
    port
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_session_start_turn_end_flow() {
    let port = start_test_gateway().await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let resp = client
        .post(format!("{base}/api/voice/sessions"))
        .json(&json!({ "user_id": "42" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let started: serde_json::Value = resp.json().await.unwrap();
    let session_id = started["session_id"].as_str().unwrap().to_string();
    assert!(started["channel_name"].as_str().unwrap().starts_with("tutor_42_"));
    assert!(
        started["credentials"]["media_token"]
            .as_str()
            .unwrap()
            .starts_with("pt1.")
    );

    let resp = client
        .post(format!("{base}/api/voice/sessions/{session_id}/text"))
        .json(&json!({ "text": "What is 2+2?" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let turn: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(turn["status"], "ok");
    assert_eq!(turn["assistant_text"], "You asked: What is 2+2?");
    assert!(turn["audio"].is_string());

    let resp = client
        .get(format!("{base}/api/voice/sessions?user_id=42"))
        .send()
        .await
        .unwrap();
    let listing: serde_json::Value = resp.json().await.unwrap();
    let sessions = listing["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["turn_count"], 2);

    let resp = client
        .delete(format!("{base}/api/voice/sessions/{session_id}"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ended"], true);

    let resp = client
        .delete(format!("{base}/api/voice/sessions/{session_id}"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ended"], false);
}

#[tokio::test]
async fn test_audio_turn_returns_transcript() {
    let port = start_test_gateway().await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let resp = client
        .post(format!("{base}/api/voice/sessions"))
        .json(&json!({ "user_id": "42" }))
        .send()
        .await
        .unwrap();
    let started: serde_json::Value = resp.json().await.unwrap();
    let session_id = started["session_id"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/api/voice/sessions/{session_id}/audio"))
        .json(&json!({
            "audio": BASE64.encode([1u8, 2, 3]),
            "format": "wav",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let turn: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(turn["status"], "ok");
    assert_eq!(turn["transcript"], "what is two plus two");
    assert_eq!(turn["assistant_text"], "You asked: what is two plus two");
}

#[tokio::test]
async fn test_turn_on_unknown_session_is_404() {
    let port = start_test_gateway().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/voice/sessions/nope/text"))
        .json(&json!({ "text": "hello" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "session_not_found");
}

#[tokio::test]
async fn test_bad_requests_are_400() {
    let port = start_test_gateway().await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let resp = client
        .post(format!("{base}/api/voice/sessions"))
        .json(&json!({ "user_id": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/api/voice/sessions"))
        .json(&json!({ "user_id": "42" }))
        .send()
        .await
        .unwrap();
    let started: serde_json::Value = resp.json().await.unwrap();
    let session_id = started["session_id"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/api/voice/sessions/{session_id}/audio"))
        .json(&json!({ "audio": "***not base64***" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/api/voice/sessions/{session_id}/audio"))
        .json(&json!({ "audio": BASE64.encode([1u8]), "format": "flac" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_token_endpoint_issues_deterministic_identity() {
    let port = start_test_gateway().await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/rtc/token");

    let first: serde_json::Value = client
        .post(&url)
        .json(&json!({ "channel_name": "study-room", "user_id": "314", "role": "publisher" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .post(&url)
        .json(&json!({ "channel_name": "study-room", "user_id": "314" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(first["media_token"].as_str().unwrap().starts_with("pt1."));
    assert!(first["messaging_token"].is_string());
    assert_eq!(first["participant_identity"], 314);
    assert_eq!(
        first["participant_identity"],
        second["participant_identity"]
    );
}
