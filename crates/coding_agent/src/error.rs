use agent_provider::CompletionError;
use session_store::StoreError;
use thiserror::Error;

use crate::agents::AgentStoreError;
use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;

/// Infrastructure failures that abort a dispatch cycle.
///
/// Tool-level failures never surface here: they become tool-result messages
/// so the model can react to them.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("completion request failed: {0}")]
    Completion(#[source] CompletionError),

    #[error("context compression failed: {0}")]
    Compression(#[source] CompletionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agents(#[from] AgentStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session '{key}' not found")]
    Session { key: String },
}
