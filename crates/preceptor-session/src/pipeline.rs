//! One end-to-end turn: input, transcript, reply, audio.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tracing::{debug, warn};

use preceptor_core::context::ContextLog;
use preceptor_core::types::{AudioFormat, Role};
use preceptor_providers::{SessionArchive, TurnRecord};
use preceptor_speech::{SttGateway, TtsGateway};
use preceptor_tutor::ResponseGenerator;

use crate::registry::SessionHandle;

/// Input to one pipeline run.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Audio { bytes: Vec<u8>, format: AudioFormat },
    Text(String),
}

/// Result of one admitted pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnReply {
    /// No usable text came out of the input; nothing was recorded.
    NoSpeech,
    Answer {
        /// The transcript for audio input; `None` for text input.
        transcript: Option<String>,
        assistant_text: String,
        /// Synthesized reply audio; `None` when synthesis degraded.
        audio: Option<Vec<u8>>,
    },
}

/// Runs the stages of a turn against one session's context.
///
/// The engine holds no per-session state. Callers admit it with exclusive
/// access to the session's [`ContextLog`], so stages never interleave
/// across concurrent calls.
pub struct TurnEngine {
    stt: SttGateway,
    tts: TtsGateway,
    generator: ResponseGenerator,
    archive: Arc<dyn SessionArchive>,
}

impl TurnEngine {
    pub fn new(
        stt: SttGateway,
        tts: TtsGateway,
        generator: ResponseGenerator,
        archive: Arc<dyn SessionArchive>,
    ) -> Self {
        Self {
            stt,
            tts,
            generator,
            archive,
        }
    }

    /// Run one turn. Infallible once admitted: degraded stages produce a
    /// degraded reply, never an error.
    pub async fn run(
        &self,
        handle: &SessionHandle,
        context: &mut ContextLog,
        input: TurnInput,
    ) -> TurnReply {
        let (user_text, transcript) = match input {
            TurnInput::Text(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return TurnReply::NoSpeech;
                }
                (text, None)
            }
            TurnInput::Audio { bytes, format } => {
                match self.stt.transcribe(&bytes, format).await {
                    Some(text) => (text.clone(), Some(text)),
                    None => {
                        debug!(session_id = %handle.session_id, "no speech detected");
                        return TurnReply::NoSpeech;
                    }
                }
            }
        };

        // History is captured before the new user turn so the completion
        // call sees that text exactly once, as the trailing user message.
        let history = context.render();
        context.append(Role::User, &user_text);

        let assistant_text = self
            .generator
            .respond(&user_text, &handle.user_id, &history)
            .await;

        context.append(Role::Assistant, &assistant_text);
        handle.turn_count.store(context.len(), Ordering::SeqCst);

        self.spawn_turn_archive(handle, &user_text, &assistant_text);

        let audio = self
            .tts
            .synthesize(&assistant_text)
            .await
            .map(package_for_channel);

        TurnReply::Answer {
            transcript,
            assistant_text,
            audio,
        }
    }

    fn spawn_turn_archive(&self, handle: &SessionHandle, user_text: &str, assistant_text: &str) {
        let archive = Arc::clone(&self.archive);
        let now = Utc::now();
        let records = [
            TurnRecord {
                session_id: handle.session_id.clone(),
                user_id: handle.user_id.clone(),
                role: Role::User,
                content: user_text.to_string(),
                created_at: now,
            },
            TurnRecord {
                session_id: handle.session_id.clone(),
                user_id: handle.user_id.clone(),
                role: Role::Assistant,
                content: assistant_text.to_string(),
                created_at: now,
            },
        ];
        tokio::spawn(async move {
            for record in records {
                if let Err(e) = archive.append_turn(&record).await {
                    warn!(session_id = %record.session_id, error = %e, "turn archive write failed");
                }
            }
        });
    }
}

/// Prepare synthesized audio for the outbound channel. Delivery today is
/// byte-for-byte; channel-specific framing hooks in here.
fn package_for_channel(audio: Vec<u8>) -> Vec<u8> {
    audio
}
