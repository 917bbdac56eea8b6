//! Agent orchestration runtime: the tool-dispatch loop and its collaborators.
//!
//! ## Provider bootstrap
//!
//! The completion backend is chosen by `provider` in `<state>/config.json`
//! or by `CODING_AGENT_PROVIDER`:
//!
//! - `openai` (default) talks to an OpenAI-compatible chat completions
//!   endpoint. `OPENAI_KEY` is required; `OPENAI_BASE` and `OPENAI_MODEL`
//!   override the base URL and model.
//! - `mock` answers offline by echoing the prompt.
//!
//! ## State layout
//!
//! Everything persistent lives under the state root (`--home`,
//! `CODING_AGENT_HOME`, or `~/.config/coding-agent`):
//!
//! ```text
//! config.json
//! agents/<name>.json
//! sessions/<key>.json
//! todos/<conversation-id>.json
//! checkpoints/metadata/<conversation-id>/<checkpoint-id>.json
//! checkpoints/shadow_git/<conversation-id>/
//! skills/<skill>/skill.json
//! ```
//!
//! Notes, plans and workspace skills live under `<workspace>/.agent/`.
//!
//! ## Turn contract
//!
//! Every assistant message carrying tool calls is followed by exactly one tool
//! message per call, in call order, before the next completion request.
//! Dangerous tools in the root run are preceded by an automatic checkpoint.

use std::sync::{Mutex, MutexGuard};

pub mod agents;
pub mod background;
pub mod catalog;
pub mod checkpoint;
pub mod commands;
pub mod compression;
pub mod config;
pub mod container;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gate;
pub mod mcp;
pub mod paths;
pub mod policy;
pub mod prompt;
pub mod providers;
pub mod shadow_git;
#[cfg(unix)]
pub mod signals;
pub mod skills;
pub mod subagent;
pub mod tools;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
