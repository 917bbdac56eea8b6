//! Dual-layer checkpoints: workspace files through a [`SnapshotStore`], the
//! surrounding system through a [`SystemSnapshotter`], and the conversation as
//! a JSON record.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use agent_provider::{CompletionService, Message, SamplingConfig};
use serde::{Deserialize, Serialize};
use session_store::{sanitize_key, JsonDocumentStore, StoreError, TokenUsage};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::container::SystemSnapshotter;
use crate::conversation::{drop_pending_tool_calls, Conversation};
use crate::lock_unpoisoned;
use crate::shadow_git::{SnapshotError, SnapshotStore, Staged};

/// Automatic checkpoints kept per conversation. Manual ones are never pruned.
pub const MAX_AUTO_CHECKPOINTS: usize = 10;
pub const DEFAULT_CHECKPOINT_NAME: &str = "Manual Checkpoint";

const AUTO_COMMIT_FALLBACK: &str = "Checkpoint: Auto-generated";
const COMMIT_MESSAGE_PROMPT: &str = "Write a concise one-line git commit message (at most 72 characters) \
describing the following staged changes. Reply with the message only.\n\n";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to snapshot workspace: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("checkpoint '{id}' not found")]
    NotFound { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub conversation_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub snapshot_commit: Option<String>,
    #[serde(default)]
    pub system_image: Option<String>,
    #[serde(default)]
    pub is_auto: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredCheckpoint {
    pub checkpoint_id: String,
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    pub warnings: Vec<String>,
}

pub struct CheckpointManager {
    metadata_root: PathBuf,
    snapshot: Arc<dyn SnapshotStore>,
    system: Arc<dyn SystemSnapshotter>,
    summarizer: Option<Summarizer>,
    metadata_lock: Mutex<()>,
}

struct Summarizer {
    service: Arc<dyn CompletionService>,
    sampling: Mutex<SamplingConfig>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(
        metadata_root: impl Into<PathBuf>,
        snapshot: Arc<dyn SnapshotStore>,
        system: Arc<dyn SystemSnapshotter>,
    ) -> Self {
        Self {
            metadata_root: metadata_root.into(),
            snapshot,
            system,
            summarizer: None,
            metadata_lock: Mutex::new(()),
        }
    }

    /// Uses `service` to describe automatic checkpoints from their diff.
    #[must_use]
    pub fn with_summarizer(
        mut self,
        service: Arc<dyn CompletionService>,
        sampling: SamplingConfig,
    ) -> Self {
        self.summarizer = Some(Summarizer {
            service,
            sampling: Mutex::new(sampling),
        });
        self
    }

    /// Points commit-message generation at `model`; no-op without a summarizer.
    pub fn set_summary_model(&self, model: &str) {
        if let Some(summarizer) = &self.summarizer {
            lock_unpoisoned(&summarizer.sampling).model = model.to_string();
        }
    }

    fn records(&self, conversation_id: &str) -> JsonDocumentStore<Checkpoint> {
        JsonDocumentStore::new(self.metadata_root.join(sanitize_key(conversation_id)))
    }

    pub fn create(
        &self,
        conversation: &Conversation,
        usage: TokenUsage,
        name: &str,
        is_auto: bool,
    ) -> Result<Checkpoint, CheckpointError> {
        let commit = match self.snapshot.stage_all(&conversation.id)? {
            Staged::Unchanged { head } => head,
            Staged::Changed { diff } => {
                let message = self.commit_message(name, is_auto, &diff);
                self.snapshot.commit(&conversation.id, &message)?
            }
        };

        let records = self.records(&conversation.id);
        let mut id = checkpoint_id(OffsetDateTime::now_utc());
        while records.contains(&id) {
            id = checkpoint_id(OffsetDateTime::now_utc());
        }

        let system_image = if self.system.in_container() {
            let tag = format!("coding-agent-ckpt-{}", id.to_ascii_lowercase());
            match self.system.commit_image(&tag) {
                Ok(image) => Some(image),
                Err(error) => {
                    warn!(checkpoint = %id, %error, "system image snapshot failed");
                    None
                }
            }
        } else {
            None
        };

        let checkpoint = Checkpoint {
            id,
            name: name.to_string(),
            created_at: session_store::now_rfc3339()?,
            conversation_id: conversation.id.clone(),
            messages: conversation.messages.clone(),
            usage,
            snapshot_commit: Some(commit),
            system_image,
            is_auto,
        };

        {
            let _guard = lock_unpoisoned(&self.metadata_lock);
            records.save(&checkpoint.id, &checkpoint)?;
            if is_auto {
                prune_automatic(&records)?;
            }
        }

        info!(
            checkpoint = %checkpoint.id,
            name = %checkpoint.name,
            is_auto,
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Restores the file layer and returns the conversation state to reapply.
    ///
    /// A failed file restore leaves the caller's conversation untouched.
    pub fn restore(
        &self,
        conversation_id: &str,
        id: &str,
    ) -> Result<RestoredCheckpoint, CheckpointError> {
        let checkpoint = self
            .records(conversation_id)
            .load(id)?
            .ok_or_else(|| CheckpointError::NotFound { id: id.to_string() })?;

        if let Some(commit) = checkpoint.snapshot_commit.as_deref() {
            self.snapshot.restore(conversation_id, commit)?;
        }

        let mut warnings = Vec::new();
        match checkpoint.system_image.as_deref() {
            Some(image) => warnings.push(format!(
                "System changes cannot be rolled back inside the running container. \
                 To return to the captured system state, relaunch from the snapshot image: docker run -it {image}"
            )),
            None if self.system.in_container() => warnings.push(
                "No system image was captured for this checkpoint; installed applications and \
                 system packages were not reverted."
                    .to_string(),
            ),
            None => {}
        }

        let mut messages = checkpoint.messages;
        drop_pending_tool_calls(&mut messages);

        Ok(RestoredCheckpoint {
            checkpoint_id: checkpoint.id,
            messages,
            usage: checkpoint.usage,
            warnings,
        })
    }

    /// Checkpoints of one conversation, newest first.
    pub fn list(&self, conversation_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let records = self.records(conversation_id);
        let mut checkpoints = Vec::new();
        for key in records.keys()?.into_iter().rev() {
            if let Some(checkpoint) = records.load(&key)? {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    /// Removes the metadata record; the shadow-git commit stays in history.
    pub fn delete(&self, conversation_id: &str, id: &str) -> Result<(), CheckpointError> {
        let _guard = lock_unpoisoned(&self.metadata_lock);
        if self.records(conversation_id).delete(id)? {
            Ok(())
        } else {
            Err(CheckpointError::NotFound { id: id.to_string() })
        }
    }

    fn commit_message(&self, name: &str, is_auto: bool, diff: &str) -> String {
        if !is_auto {
            return format!("Checkpoint: {name}");
        }
        let Some(summarizer) = &self.summarizer else {
            return AUTO_COMMIT_FALLBACK.to_string();
        };

        let sampling = lock_unpoisoned(&summarizer.sampling).clone();
        let request = [Message::user(format!("{COMMIT_MESSAGE_PROMPT}{diff}"))];
        match summarizer.service.complete(&request, &[], &sampling) {
            Ok(completion) => {
                let line = completion
                    .message
                    .text_content()
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or_default()
                    .to_string();
                if line.is_empty() {
                    AUTO_COMMIT_FALLBACK.to_string()
                } else {
                    line
                }
            }
            Err(error) => {
                warn!(%error, "commit message generation failed");
                AUTO_COMMIT_FALLBACK.to_string()
            }
        }
    }
}

/// `No checkpoints found.` or one `- <id> (<created_at>): <name>` line per checkpoint.
#[must_use]
pub fn render_checkpoint_list(checkpoints: &[Checkpoint]) -> String {
    if checkpoints.is_empty() {
        return "No checkpoints found.".to_string();
    }

    let mut listing = String::from("Checkpoints:");
    for checkpoint in checkpoints {
        listing.push_str(&format!(
            "\n- {} ({}): {}",
            checkpoint.id, checkpoint.created_at, checkpoint.name
        ));
    }
    listing
}

/// `YYYYMMDD_HHMMSS_<nanos>`; lexicographic order matches creation order.
#[must_use]
pub fn checkpoint_id(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}_{:09}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.nanosecond()
    )
}

fn prune_automatic(records: &JsonDocumentStore<Checkpoint>) -> Result<(), CheckpointError> {
    let mut automatic = Vec::new();
    for key in records.keys()? {
        if let Some(checkpoint) = records.load(&key)? {
            if checkpoint.is_auto {
                automatic.push(key);
            }
        }
    }

    let excess = automatic.len().saturating_sub(MAX_AUTO_CHECKPOINTS);
    for key in automatic.into_iter().take(excess) {
        records.delete(&key)?;
    }
    Ok(())
}
