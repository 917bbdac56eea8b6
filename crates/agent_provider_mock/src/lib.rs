//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. Turns are served from
//! a FIFO script; once the script is drained an optional responder closure
//! answers instead.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    Completion, CompletionError, CompletionService, Message, ProviderProfile, SamplingConfig,
    ToolCall, ToolDefinition, Usage,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// Closure answering requests once the scripted queue is empty.
pub type Responder = dyn Fn(&[Message], &[ToolDefinition]) -> Result<Completion, CompletionError>
    + Send
    + Sync;

/// Snapshot of one request received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub sampling: SamplingConfig,
}

/// Scripted completion service used by `coding_agent` tests and offline runs.
pub struct ScriptedCompletionService {
    model_id: String,
    queued: Mutex<VecDeque<Result<Completion, CompletionError>>>,
    responder: Option<Box<Responder>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedCompletionService {
    /// Creates a mock that fails every request until turns are queued.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_id: "mock".to_string(),
            queued: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock serving `turns` in order.
    #[must_use]
    pub fn with_turns(turns: impl IntoIterator<Item = Completion>) -> Self {
        let service = Self::new();
        for turn in turns {
            service.push_turn(turn);
        }
        service
    }

    /// Installs the closure used after the queue is drained.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[Message], &[ToolDefinition]) -> Result<Completion, CompletionError>
            + Send
            + Sync
            + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if !model_id.trim().is_empty() {
            self.model_id = model_id.trim().to_string();
        }
        self
    }

    pub fn push_turn(&self, completion: Completion) {
        lock_unpoisoned(&self.queued).push_back(Ok(completion));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        lock_unpoisoned(&self.queued).push_back(Err(CompletionError::new(message)));
    }

    /// Returns every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    #[must_use]
    pub fn remaining_turns(&self) -> usize {
        lock_unpoisoned(&self.queued).len()
    }
}

impl Default for ScriptedCompletionService {
    /// Offline echo mode: every request is answered with a plain-text summary of the prompt.
    fn default() -> Self {
        Self::new().with_responder(|messages, _tools| {
            let prompt = messages
                .iter()
                .rev()
                .find(|message| message.role == agent_provider::Role::User)
                .map(Message::text_content)
                .unwrap_or_default();
            Ok(text_turn(format!("Mock provider received: {prompt}"), 0))
        })
    }
}

impl CompletionService for ScriptedCompletionService {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        sampling: &SamplingConfig,
    ) -> Result<Completion, CompletionError> {
        lock_unpoisoned(&self.requests).push(RecordedRequest {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|tool| tool.name.clone()).collect(),
            sampling: sampling.clone(),
        });

        let next = lock_unpoisoned(&self.queued).pop_front();
        match next {
            Some(turn) => turn,
            None => match &self.responder {
                Some(responder) => responder(messages, tools),
                None => Err(CompletionError::new("mock script exhausted")),
            },
        }
    }
}

/// Builds a plain-text assistant turn reporting `total_tokens`.
#[must_use]
pub fn text_turn(content: impl Into<String>, total_tokens: u64) -> Completion {
    Completion {
        message: Message::assistant(content),
        usage: usage(total_tokens),
    }
}

/// Builds an assistant turn requesting `calls`, reporting `total_tokens`.
#[must_use]
pub fn tool_call_turn(calls: Vec<ToolCall>, total_tokens: u64) -> Completion {
    Completion {
        message: Message::assistant_with_tool_calls(None, calls),
        usage: usage(total_tokens),
    }
}

/// Usage where the whole total is attributed to the prompt.
#[must_use]
pub fn usage(total_tokens: u64) -> Usage {
    Usage {
        prompt_tokens: total_tokens,
        completion_tokens: 0,
        total_tokens,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
