mod error;
mod paths;
mod schema;
mod store;
mod typed;

pub use error::StoreError;
pub use paths::{document_file_name, sanitize_key, DOCUMENT_EXTENSION};
pub use schema::{Note, SessionRecord, TodoItem, TodoList, TodoStatus, TokenUsage};
pub use store::{now_rfc3339, JsonDocumentStore};
pub use typed::{NoteStore, SessionStore, SessionSummary, TodoStore};
