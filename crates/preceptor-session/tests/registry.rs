//! End-to-end registry tests over stub providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::{AudioFormat, Turn};
use preceptor_providers::{
    LanguageModel, NullArchive, Passage, PassageIndex, SessionArchive, SessionRecord, TurnRecord,
};
use preceptor_rtc::TokenIssuer;
use preceptor_session::{SessionRegistry, TurnEngine, TurnInput, TurnReply};
use preceptor_speech::{SttGateway, SttProvider, TtsGateway, TtsProvider};
use preceptor_tutor::{FALLBACK_REPLY, ResponseGenerator};

struct EchoLlm {
    delay: Duration,
}

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, _system: &str, _history: &[Turn], user_text: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("You asked: {user_text}"))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1, 0.2])
    }
}

struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn complete(&self, _system: &str, _history: &[Turn], _user_text: &str) -> Result<String> {
        Err(PreceptorError::Provider("completion endpoint down".into()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5])
    }
}

struct EmptyIndex;

#[async_trait]
impl PassageIndex for EmptyIndex {
    async fn query(&self, _embedding: &[f32], _k: usize, _user_id: &str) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

struct FixedStt(Option<&'static str>);

#[async_trait]
impl SttProvider for FixedStt {
    fn id(&self) -> &'static str {
        "fixed"
    }

    async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> Result<Option<String>> {
        Ok(self.0.map(String::from))
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

struct FailingArchive;

#[async_trait]
impl SessionArchive for FailingArchive {
    async fn create_session(&self, _record: &SessionRecord) -> Result<()> {
        Err(PreceptorError::Provider("archive offline".into()))
    }

    async fn mark_session_ended(&self, _session_id: &str) -> Result<()> {
        Err(PreceptorError::Provider("archive offline".into()))
    }

    async fn append_turn(&self, _record: &TurnRecord) -> Result<()> {
        Err(PreceptorError::Provider("archive offline".into()))
    }
}

#[derive(Default)]
struct CountingArchive {
    sessions: AtomicUsize,
    turns: AtomicUsize,
}

#[async_trait]
impl SessionArchive for CountingArchive {
    async fn create_session(&self, _record: &SessionRecord) -> Result<()> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_session_ended(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn append_turn(&self, _record: &TurnRecord) -> Result<()> {
        self.turns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn registry_with(
    llm: Arc<dyn LanguageModel>,
    stt: Arc<dyn SttProvider>,
    archive: Arc<dyn SessionArchive>,
) -> Arc<SessionRegistry> {
    let generator = ResponseGenerator::new(llm, Arc::new(EmptyIndex), 3);
    let engine = TurnEngine::new(
        SttGateway::new(stt),
        TtsGateway::new(Arc::new(BeepTts)),
        generator,
        Arc::clone(&archive),
    );
    let issuer = TokenIssuer::new("app-id", "app-secret", 3600);
    Arc::new(SessionRegistry::new(issuer, engine, archive, 50, "voice_tutor"))
}

fn default_registry() -> Arc<SessionRegistry> {
    registry_with(
        Arc::new(EchoLlm { delay: Duration::ZERO }),
        Arc::new(FixedStt(Some("what is two plus two"))),
        Arc::new(NullArchive),
    )
}

#[tokio::test]
async fn test_same_user_gets_same_identity_across_sessions() {
    let registry = default_registry();
    let a = registry.start("student-7", None).await.unwrap();
    let b = registry.start("student-7", None).await.unwrap();

    assert_ne!(a.session_id, b.session_id);
    assert_ne!(a.channel_name, b.channel_name);
    assert_eq!(
        a.credentials.participant_identity,
        b.credentials.participant_identity
    );
}

#[tokio::test]
async fn test_explicit_channel_name_is_kept() {
    let registry = default_registry();
    let started = registry
        .start("42", Some("study-room-9".into()))
        .await
        .unwrap();

    assert_eq!(started.channel_name, "study-room-9");
    assert_eq!(started.credentials.channel_name, "study-room-9");
}

#[tokio::test]
async fn test_turn_on_unknown_session_is_not_found() {
    let registry = default_registry();
    let err = registry
        .process_turn("missing", TurnInput::Text("hi".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, PreceptorError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_turns_on_one_session_reject_the_second() {
    let registry = registry_with(
        Arc::new(EchoLlm { delay: Duration::from_millis(200) }),
        Arc::new(FixedStt(Some("unused"))),
        Arc::new(NullArchive),
    );
    let started = registry.start("42", None).await.unwrap();
    let id = started.session_id.clone();

    let first = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tokio::spawn(async move {
            registry
                .process_turn(&id, TurnInput::Text("first question".into()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = registry
        .process_turn(&id, TurnInput::Text("second question".into()))
        .await;
    assert!(matches!(second, Err(PreceptorError::SessionBusy(_))));

    let reply = first.await.unwrap().unwrap();
    assert!(matches!(reply, TurnReply::Answer { .. }));

    // Only the admitted call touched the context: one user + one assistant.
    let sessions = registry.list_active(Some("42")).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].turn_count, 2);
}

#[tokio::test]
async fn test_end_mid_flight_hides_session_immediately() {
    let registry = registry_with(
        Arc::new(EchoLlm { delay: Duration::from_millis(200) }),
        Arc::new(FixedStt(Some("unused"))),
        Arc::new(NullArchive),
    );
    let started = registry.start("42", None).await.unwrap();
    let id = started.session_id.clone();

    let inflight = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tokio::spawn(async move {
            registry
                .process_turn(&id, TurnInput::Text("still running".into()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(registry.end(&id).await);
    assert!(registry.list_active(None).await.is_empty());

    // The admitted run completes against the orphaned handle.
    let reply = inflight.await.unwrap().unwrap();
    assert!(matches!(reply, TurnReply::Answer { .. }));

    let err = registry
        .process_turn(&id, TurnInput::Text("after end".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, PreceptorError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_no_speech_appends_no_turns() {
    let registry = registry_with(
        Arc::new(EchoLlm { delay: Duration::ZERO }),
        Arc::new(FixedStt(None)),
        Arc::new(NullArchive),
    );
    let started = registry.start("42", None).await.unwrap();

    let reply = registry
        .process_turn(
            &started.session_id,
            TurnInput::Audio { bytes: vec![0u8; 64], format: AudioFormat::Wav },
        )
        .await
        .unwrap();

    assert_eq!(reply, TurnReply::NoSpeech);
    assert_eq!(registry.list_active(None).await[0].turn_count, 0);
}

#[tokio::test]
async fn test_blank_text_counts_as_no_speech() {
    let registry = default_registry();
    let started = registry.start("42", None).await.unwrap();

    let reply = registry
        .process_turn(&started.session_id, TurnInput::Text("   ".into()))
        .await
        .unwrap();

    assert_eq!(reply, TurnReply::NoSpeech);
    assert_eq!(registry.list_active(None).await[0].turn_count, 0);
}

#[tokio::test]
async fn test_text_turn_lifecycle() {
    let registry = default_registry();
    let started = registry.start("u1", None).await.unwrap();
    assert!(started.credentials.expires_at > chrono::Utc::now().timestamp());
    assert!(started.channel_name.starts_with("tutor_u1_"));

    let reply = registry
        .process_turn(&started.session_id, TurnInput::Text("What is 2+2?".into()))
        .await
        .unwrap();
    let TurnReply::Answer { transcript, assistant_text, audio } = reply else {
        panic!("expected an answer");
    };
    assert_eq!(transcript, None);
    assert_eq!(assistant_text, "You asked: What is 2+2?");
    assert!(audio.is_some());

    assert_eq!(registry.list_active(Some("u1")).await[0].turn_count, 2);
    assert!(registry.end(&started.session_id).await);
    assert!(!registry.end(&started.session_id).await);

    let err = registry
        .process_turn(&started.session_id, TurnInput::Text("again".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, PreceptorError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_audio_turn_carries_transcript() {
    let registry = default_registry();
    let started = registry.start("42", None).await.unwrap();

    let reply = registry
        .process_turn(
            &started.session_id,
            TurnInput::Audio { bytes: vec![1, 2, 3], format: AudioFormat::Webm },
        )
        .await
        .unwrap();

    let TurnReply::Answer { transcript, assistant_text, .. } = reply else {
        panic!("expected an answer");
    };
    assert_eq!(transcript.as_deref(), Some("what is two plus two"));
    assert_eq!(assistant_text, "You asked: what is two plus two");
}

#[tokio::test]
async fn test_completion_failure_returns_apology_and_session_survives() {
    let registry = registry_with(
        Arc::new(FailingLlm),
        Arc::new(FixedStt(Some("unused"))),
        Arc::new(NullArchive),
    );
    let started = registry.start("42", None).await.unwrap();

    let reply = registry
        .process_turn(&started.session_id, TurnInput::Text("hello?".into()))
        .await
        .unwrap();
    let TurnReply::Answer { assistant_text, .. } = reply else {
        panic!("expected an answer");
    };
    assert_eq!(assistant_text, FALLBACK_REPLY);

    // Both the question and the apology are recorded; the session stays up.
    let sessions = registry.list_active(None).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].turn_count, 2);
}

#[tokio::test]
async fn test_failing_archive_never_blocks_turns() {
    let registry = registry_with(
        Arc::new(EchoLlm { delay: Duration::ZERO }),
        Arc::new(FixedStt(Some("hi"))),
        Arc::new(FailingArchive),
    );
    let started = registry.start("42", None).await.unwrap();

    let reply = registry
        .process_turn(&started.session_id, TurnInput::Text("does this work?".into()))
        .await
        .unwrap();
    assert!(matches!(reply, TurnReply::Answer { .. }));
    assert!(registry.end(&started.session_id).await);
}

#[tokio::test]
async fn test_turns_are_archived_off_the_turn_path() {
    let archive = Arc::new(CountingArchive::default());
    let registry = registry_with(
        Arc::new(EchoLlm { delay: Duration::ZERO }),
        Arc::new(FixedStt(Some("hi"))),
        archive.clone(),
    );
    let started = registry.start("42", None).await.unwrap();
    registry
        .process_turn(&started.session_id, TurnInput::Text("note this".into()))
        .await
        .unwrap();

    // Archive writes are spawned; give them a moment to land.
    for _ in 0..50 {
        if archive.turns.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(archive.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(archive.turns.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_idle_sweep_removes_only_stale_sessions() {
    let registry = default_registry();
    registry.start("42", None).await.unwrap();

    assert_eq!(registry.sweep_idle(Duration::from_secs(60)).await, 0);
    assert_eq!(registry.list_active(None).await.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.sweep_idle(Duration::from_millis(10)).await, 1);
    assert!(registry.list_active(None).await.is_empty());
}
