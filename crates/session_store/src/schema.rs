use std::fmt;
use std::str::FromStr;

use agent_provider::{Message, Usage};
use serde::{Deserialize, Serialize};

/// Cumulative token counters for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub tool_calls: u64,
}

impl TokenUsage {
    /// Adds one completion's usage to the running totals.
    pub fn accumulate(&mut self, usage: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(usage.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens);
    }

    pub fn record_tool_calls(&mut self, count: usize) {
        self.tool_calls = self.tool_calls.saturating_add(count as u64);
    }
}

/// Persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_def_name: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl SessionRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            name: None,
            agent_def_name: None,
            messages,
            usage: TokenUsage::default(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// Storage key: the display name when one was given, else the id.
    #[must_use]
    pub fn key(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(format!(
                "invalid status: {other} (must be: pending, in-progress, completed)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: u32,
    pub task: String,
    pub status: TodoStatus,
}

/// Todo list owned by one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub conversation_id: String,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default = "first_todo_id")]
    pub next_id: u32,
}

fn first_todo_id() -> u32 {
    1
}

impl TodoList {
    #[must_use]
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            todos: Vec::new(),
            next_id: first_todo_id(),
        }
    }

    /// Appends a pending item and returns its id.
    pub fn add(&mut self, task: impl Into<String>) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.todos.push(TodoItem {
            id,
            task: task.into(),
            status: TodoStatus::Pending,
        });
        id
    }

    /// Returns false when no item carries `id`.
    pub fn update(&mut self, id: u32, status: Option<TodoStatus>, task: Option<String>) -> bool {
        let Some(item) = self.todos.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if let Some(status) = status {
            item.status = status;
        }
        if let Some(task) = task {
            item.task = task;
        }
        true
    }

    /// First item currently in progress.
    #[must_use]
    pub fn current(&self) -> Option<&TodoItem> {
        self.todos
            .iter()
            .find(|item| item.status == TodoStatus::InProgress)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.todos.is_empty()
    }

    #[must_use]
    pub fn render(&self) -> String {
        if self.todos.is_empty() {
            return "Todo list is empty.".to_string();
        }

        let mut rendered = String::from("Current Todo List:\n");
        for item in &self.todos {
            rendered.push_str(&format!(
                "- [ID: {}] {} ({})\n",
                item.id, item.task, item.status
            ));
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::{TodoList, TodoStatus, TokenUsage};
    use agent_provider::Usage;

    #[test]
    fn todo_list_tracks_ids_and_current_task() {
        let mut list = TodoList::new("conv-1");
        assert_eq!(list.render(), "Todo list is empty.");

        let first = list.add("write tests");
        let second = list.add("ship");
        assert_eq!((first, second), (1, 2));
        assert!(list.current().is_none());

        assert!(list.update(second, Some(TodoStatus::InProgress), None));
        assert!(!list.update(99, Some(TodoStatus::Completed), None));
        assert_eq!(list.current().map(|item| item.task.as_str()), Some("ship"));
        assert_eq!(
            list.render(),
            "Current Todo List:\n- [ID: 1] write tests (pending)\n- [ID: 2] ship (in-progress)\n"
        );
    }

    #[test]
    fn todo_status_parses_wire_names_only() {
        assert_eq!("in-progress".parse::<TodoStatus>(), Ok(TodoStatus::InProgress));
        assert!("done".parse::<TodoStatus>().is_err());
    }

    #[test]
    fn token_usage_accumulates_cumulatively() {
        let mut usage = TokenUsage::default();
        usage.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        usage.accumulate(&Usage {
            prompt_tokens: 20,
            completion_tokens: 1,
            total_tokens: 21,
        });
        usage.record_tool_calls(2);

        assert_eq!(usage.total_tokens, 36);
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.tool_calls, 2);
    }
}
