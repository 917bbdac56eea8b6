//! Summarizing a long conversation into a fresh one.

use agent_provider::{CompletionError, CompletionService, Message, Role, SamplingConfig};

use crate::conversation::{new_conversation_id, Conversation};

pub const COMPRESSION_TEMPERATURE: f32 = 0.15;
pub const COMPRESSION_MAX_TOKENS: u32 = 1500;

const SUMMARY_INSTRUCTION: &str = "Compress the following conversation into a brief summary \
(1-3 sentences), preserving key details and context:\n\n";

/// True once cumulative usage passes three quarters of the context window.
#[must_use]
pub fn should_compress(total_tokens: u64, context_length: u64) -> bool {
    total_tokens > context_length.saturating_mul(3) / 4
}

/// Asks `service` for a summary and builds the replacement conversation.
///
/// The result keeps the name and agent persona, gets a fresh id, and holds a
/// single system message, so no tool results survive unpaired.
pub fn compress_conversation(
    service: &dyn CompletionService,
    model: &str,
    conversation: &Conversation,
    base_prompt: &str,
) -> Result<Conversation, CompletionError> {
    let request = [Message::user(summary_request(&conversation.messages))];
    let sampling = SamplingConfig::new(model, COMPRESSION_TEMPERATURE, COMPRESSION_MAX_TOKENS);
    let completion = service.complete(&request, &[], &sampling)?;
    let summary = completion.message.text_content().trim();

    Ok(Conversation {
        id: new_conversation_id(),
        name: conversation.name.clone(),
        messages: vec![Message::system(format!(
            "{base_prompt}\n\nPrevious conversation context:\n\n{summary}"
        ))],
        agent_def_name: conversation.agent_def_name.clone(),
    })
}

fn summary_request(messages: &[Message]) -> String {
    let mut request = String::from(SUMMARY_INSTRUCTION);
    for message in messages {
        let text = message.text_content().trim();
        if text.is_empty() {
            continue;
        }
        match message.role {
            Role::User => request.push_str(&format!("User: {text}\n")),
            Role::Assistant => request.push_str(&format!("Assistant: {text}\n")),
            Role::System | Role::Tool => {}
        }
    }
    request.push_str("\nBrief summary:");
    request
}
