use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::schema::{Note, SessionRecord, TodoList};
use crate::store::{now_rfc3339, JsonDocumentStore};

/// Listing entry for a saved session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: String,
    pub id: String,
    pub message_count: usize,
    pub updated_at: String,
}

/// Saved conversations keyed by display name (or id when unnamed).
#[derive(Debug, Clone)]
pub struct SessionStore {
    documents: JsonDocumentStore<SessionRecord>,
}

impl SessionStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            documents: JsonDocumentStore::new(root),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.documents.root()
    }

    /// Saves `record` under its key, keeping the original `created_at`.
    pub fn save(&self, mut record: SessionRecord) -> Result<SessionRecord, StoreError> {
        let now = now_rfc3339()?;
        let key = record.key().to_string();
        if record.created_at.is_empty() {
            record.created_at = match self.documents.load(&key)? {
                Some(existing) if !existing.created_at.is_empty() => existing.created_at,
                _ => now.clone(),
            };
        }
        record.updated_at = now;
        self.documents.save(&key, &record)?;
        Ok(record)
    }

    pub fn load(&self, key: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.documents.load(key)
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.documents.delete(key)
    }

    /// Summaries ordered by last update, newest first. Unreadable documents are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for key in self.documents.keys()? {
            let Ok(Some(record)) = self.documents.load(&key) else {
                continue;
            };
            summaries.push(SessionSummary {
                key,
                id: record.id,
                message_count: record.messages.len(),
                updated_at: record.updated_at,
            });
        }

        summaries.sort_by(|left, right| {
            parse_timestamp(&right.updated_at).cmp(&parse_timestamp(&left.updated_at))
        });
        Ok(summaries)
    }
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// Per-conversation todo lists.
#[derive(Debug, Clone)]
pub struct TodoStore {
    documents: JsonDocumentStore<TodoList>,
}

impl TodoStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            documents: JsonDocumentStore::new(root),
        }
    }

    /// Returns an empty list when the conversation has none yet.
    pub fn load(&self, conversation_id: &str) -> Result<TodoList, StoreError> {
        Ok(self
            .documents
            .load(conversation_id)?
            .unwrap_or_else(|| TodoList::new(conversation_id)))
    }

    pub fn save(&self, list: &TodoList) -> Result<(), StoreError> {
        self.documents.save(&list.conversation_id, list).map(|_| ())
    }

    pub fn clear(&self, conversation_id: &str) -> Result<bool, StoreError> {
        self.documents.delete(conversation_id)
    }
}

/// Named notes shared by every conversation in a workspace.
#[derive(Debug, Clone)]
pub struct NoteStore {
    documents: JsonDocumentStore<Note>,
}

impl NoteStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            documents: JsonDocumentStore::new(root),
        }
    }

    pub fn create(&self, name: &str, content: &str) -> Result<Note, StoreError> {
        if self.documents.load(name)?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: "note",
                key: name.to_string(),
            });
        }

        let now = now_rfc3339()?;
        let note = Note {
            name: name.to_string(),
            content: content.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.documents.save(name, &note)?;
        Ok(note)
    }

    pub fn update(&self, name: &str, content: &str) -> Result<Note, StoreError> {
        let mut note = self.documents.load(name)?.ok_or_else(|| StoreError::NotFound {
            kind: "note",
            key: name.to_string(),
        })?;
        note.content = content.to_string();
        note.updated_at = now_rfc3339()?;
        self.documents.save(name, &note)?;
        Ok(note)
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        if self.documents.delete(name)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind: "note",
                key: name.to_string(),
            })
        }
    }

    pub fn load(&self, name: &str) -> Result<Option<Note>, StoreError> {
        self.documents.load(name)
    }

    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        self.documents.keys()
    }
}
