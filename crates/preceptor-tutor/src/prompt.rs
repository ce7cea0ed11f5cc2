//! System prompt assembly for the tutor.

use preceptor_providers::Passage;

/// Returned whenever completion fails or produces nothing, so that every
/// admitted turn still ends with an assistant utterance.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble answering right now. Please try again in a moment.";

const TUTOR_IDENTITY: &str = "\
You are Preceptor, a friendly and knowledgeable study tutor. You help students learn by:

1. Answering questions clearly and concisely
2. Grounding answers in the student's study material when it is provided
3. Encouraging curiosity and follow-up questions
4. Speaking in a conversational tone suited to voice delivery
5. Keeping answers short enough to listen to comfortably";

const GROUNDED_GUIDANCE: &str =
    "Answer using this material together with your own knowledge. Prefer the material where the two disagree.";

const GENERAL_GUIDANCE: &str = "\
No study material matched this question. Give general educational guidance, \
and suggest the student upload notes on the topic if they want grounded answers.";

/// Build the system prompt for one turn.
///
/// With passages, the prompt carries a study-material block and grounding
/// instructions. Without, it carries the general-knowledge instructions.
/// Retrieval coming back empty is a normal case, not a degraded one.
pub fn build_system_prompt(passages: &[Passage]) -> String {
    let mut parts = Vec::new();
    parts.push(TUTOR_IDENTITY.to_string());

    if passages.is_empty() {
        parts.push(GENERAL_GUIDANCE.to_string());
    } else {
        let block = passages
            .iter()
            .map(render_passage)
            .collect::<Vec<_>>()
            .join("\n\n");
        parts.push(format!("--- Study Material ---\n{block}"));
        parts.push(GROUNDED_GUIDANCE.to_string());
    }

    parts.join("\n\n")
}

fn render_passage(passage: &Passage) -> String {
    match &passage.source {
        Some(source) => format!("[{source}]\n{}", passage.text),
        None => passage.text.clone(),
    }
}
