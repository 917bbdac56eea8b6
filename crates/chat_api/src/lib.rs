//! Transport-only client for OpenAI-compatible chat completion endpoints.
//!
//! This crate owns request building, retry and response parsing for
//! `POST {base}/v1/chat/completions` only. It contains no conversation state
//! and no knowledge of the agent runtime.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::ChatApiClient;
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use payload::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatToolCall, ChatToolCallFunction,
    ChatToolFunction, ChatToolSpec, ChatUsage,
};
pub use url::normalize_chat_url;
