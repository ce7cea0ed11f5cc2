//! Retrieval-augmented response generation.
//!
//! [`ResponseGenerator::respond`] is infallible by contract. Retrieval
//! failures degrade to answering without study material; completion
//! failures degrade to [`FALLBACK_REPLY`]. Either way the caller gets an
//! assistant utterance and the conversation keeps moving.

pub mod prompt;

pub use prompt::FALLBACK_REPLY;

use std::sync::Arc;

use tracing::{debug, warn};

use preceptor_core::types::Turn;
use preceptor_providers::{LanguageModel, Passage, PassageIndex};

pub struct ResponseGenerator {
    llm: Arc<dyn LanguageModel>,
    index: Arc<dyn PassageIndex>,
    top_k: usize,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, index: Arc<dyn PassageIndex>, top_k: usize) -> Self {
        Self { llm, index, top_k }
    }

    /// Produce the next assistant utterance for `user_text`.
    ///
    /// `history` is the conversation so far, excluding the user text being
    /// answered; the completion client appends that text itself.
    pub async fn respond(&self, user_text: &str, user_id: &str, history: &[Turn]) -> String {
        let passages = self.retrieve(user_text, user_id).await;
        let system = prompt::build_system_prompt(&passages);

        match self.llm.complete(&system, history, user_text).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "completion failed, returning fallback reply");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    async fn retrieve(&self, user_text: &str, user_id: &str) -> Vec<Passage> {
        let embedding = match self.llm.embed(user_text).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "query embedding failed, answering without study material");
                return Vec::new();
            }
        };

        match self.index.query(&embedding, self.top_k, user_id).await {
            Ok(passages) => {
                debug!(count = passages.len(), "retrieved study passages");
                passages
            }
            Err(e) => {
                warn!(error = %e, "passage query failed, answering without study material");
                Vec::new()
            }
        }
    }
}
