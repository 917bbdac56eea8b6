//! Per-run state owned by the dispatch loop.

use agent_provider::{Message, Role};
use session_store::{SessionRecord, TokenUsage};

use crate::config::{AgentConfig, ExecutionMode, OperationMode};

/// Ordered message history plus the identity it is persisted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub messages: Vec<Message>,
    pub agent_def_name: Option<String>,
}

impl Conversation {
    /// Fresh conversation seeded with a single system message.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            id: new_conversation_id(),
            name: None,
            messages: vec![Message::system(system_prompt)],
            agent_def_name: None,
        }
    }

    #[must_use]
    pub fn from_record(record: SessionRecord) -> (Self, TokenUsage) {
        let conversation = Self {
            id: record.id,
            name: record.name,
            messages: record.messages,
            agent_def_name: record.agent_def_name,
        };
        (conversation, record.usage)
    }

    #[must_use]
    pub fn to_record(&self, usage: TokenUsage) -> SessionRecord {
        let mut record = SessionRecord::new(self.id.clone(), self.messages.clone());
        record.name = self.name.clone();
        record.agent_def_name = self.agent_def_name.clone();
        record.usage = usage;
        record
    }

    /// Replaces the leading system message, inserting one when absent.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => *first = Message::system(prompt),
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    /// Text of the leading system message.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(Message::text_content)
    }
}

#[must_use]
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Drops trailing assistant turns whose tool calls never received results.
pub fn drop_pending_tool_calls(messages: &mut Vec<Message>) -> usize {
    let mut dropped = 0;
    while messages
        .last()
        .is_some_and(Message::has_pending_tool_calls)
    {
        messages.pop();
        dropped += 1;
    }
    dropped
}

/// Counts consecutive identical `(name, arguments)` tool calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepeatTracker {
    last: Option<(String, String)>,
    count: usize,
}

impl RepeatTracker {
    /// Records one call and returns how many times in a row it has now been seen.
    pub fn observe(&mut self, name: &str, arguments: &str) -> usize {
        let repeated = self
            .last
            .as_ref()
            .is_some_and(|(last_name, last_args)| last_name == name && last_args == arguments);
        if repeated {
            self.count += 1;
        } else {
            self.last = Some((name.to_string(), arguments.to_string()));
            self.count = 1;
        }
        self.count
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

/// Modes copied into concurrent tool handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnContext {
    pub operation_mode: OperationMode,
    pub execution_mode: ExecutionMode,
}

/// Everything one agentic run mutates. Owned by the loop thread.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub conversation: Conversation,
    pub usage: TokenUsage,
    pub operation_mode: OperationMode,
    pub execution_mode: ExecutionMode,
    pub repeat: RepeatTracker,
}

impl RunState {
    #[must_use]
    pub fn new(conversation: Conversation, config: &AgentConfig) -> Self {
        Self {
            conversation,
            usage: TokenUsage::default(),
            operation_mode: config.operation_mode,
            execution_mode: config.execution_mode,
            repeat: RepeatTracker::default(),
        }
    }

    #[must_use]
    pub fn spawn_context(&self) -> SpawnContext {
        SpawnContext {
            operation_mode: self.operation_mode,
            execution_mode: self.execution_mode,
        }
    }

    #[must_use]
    pub fn session_record(&self) -> SessionRecord {
        self.conversation.to_record(self.usage)
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::{Message, ToolCall};

    use super::{drop_pending_tool_calls, Conversation, RepeatTracker};

    #[test]
    fn repeat_tracker_counts_only_consecutive_identical_calls() {
        let mut tracker = RepeatTracker::default();
        assert_eq!(tracker.observe("get_todo_list", "{}"), 1);
        assert_eq!(tracker.observe("get_todo_list", "{}"), 2);
        assert_eq!(tracker.observe("get_todo_list", r#"{"x":1}"#), 1);
        assert_eq!(tracker.observe("get_todo_list", r#"{"x":1}"#), 2);
        tracker.reset();
        assert_eq!(tracker.observe("get_todo_list", r#"{"x":1}"#), 1);
    }

    #[test]
    fn trailing_pending_calls_are_dropped_until_clean() {
        let mut messages = vec![
            Message::system("sys"),
            Message::user("go"),
            Message::assistant_with_tool_calls(None, vec![ToolCall::new("a", "x", "{}")]),
            Message::assistant_with_tool_calls(None, vec![ToolCall::new("b", "y", "{}")]),
        ];
        assert_eq!(drop_pending_tool_calls(&mut messages), 2);
        assert_eq!(messages.len(), 2);
        assert_eq!(drop_pending_tool_calls(&mut messages), 0);
    }

    #[test]
    fn record_conversion_keeps_identity() {
        let mut conversation = Conversation::new("sys");
        conversation.name = Some("refactor".to_string());
        conversation.agent_def_name = Some("reviewer".to_string());

        let record = conversation.to_record(Default::default());
        assert_eq!(record.key(), "refactor");

        let (restored, _usage) = Conversation::from_record(record);
        assert_eq!(restored, conversation);
    }

    #[test]
    fn system_prompt_is_replaced_in_place() {
        let mut conversation = Conversation::new("first");
        conversation.messages.push(Message::user("hi"));
        conversation.set_system_prompt("second");
        assert_eq!(conversation.system_prompt(), Some("second"));
        assert_eq!(conversation.messages.len(), 2);
    }
}
