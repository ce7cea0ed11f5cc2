//! External collaborator clients.
//!
//! The orchestrator consumes three collaborators behind traits: the
//! completion/embedding endpoint, the vector retrieval index, and the
//! best-effort session archive. Each trait has one HTTP-backed
//! implementation here; tests swap in stubs.

pub mod archive;
pub mod chroma;
pub mod llm;

pub use archive::{NullArchive, RestArchive};
pub use chroma::ChromaIndex;
pub use llm::LlmClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use preceptor_core::error::Result;
use preceptor_core::types::{Role, Turn};

/// One retrieved passage of the user's study material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Completion and embedding endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the next assistant utterance given a system instruction, the
    /// prior turn history, and the new user text.
    async fn complete(&self, system: &str, history: &[Turn], user_text: &str) -> Result<String>;

    /// Turn a query into a retrieval vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Vector retrieval index, scoped strictly to one user's material.
#[async_trait]
pub trait PassageIndex: Send + Sync {
    async fn query(&self, embedding: &[f32], k: usize, user_id: &str) -> Result<Vec<Passage>>;
}

/// Lifecycle record for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub session_kind: String,
    pub created_at: DateTime<Utc>,
}

/// One archived turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Best-effort persistence. Callers fire and forget: failures are logged
/// as warnings and never block a turn.
#[async_trait]
pub trait SessionArchive: Send + Sync {
    async fn create_session(&self, record: &SessionRecord) -> Result<()>;
    async fn mark_session_ended(&self, session_id: &str) -> Result<()>;
    async fn append_turn(&self, record: &TurnRecord) -> Result<()>;
}
