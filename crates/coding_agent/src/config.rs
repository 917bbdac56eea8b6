//! Runtime configuration.
//!
//! `AgentConfig` is read from `<state>/config.json`; a missing file yields
//! the defaults. Environment overrides are applied on top of the file, and
//! CLI flags on top of those.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use agent_provider::SamplingConfig;
use serde::{Deserialize, Serialize};
use session_store::JsonDocumentStore;
use thiserror::Error;

use crate::providers::PROVIDER_ENV_VAR;

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_API_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_CONTEXT_LENGTH: u64 = 131_072;
pub const DEFAULT_LOOP_DETECTION_THRESHOLD: usize = 3;

const CONFIG_KEY: &str = "config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Store(#[from] session_store::StoreError),

    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot resolve a home directory; pass --home or set CODING_AGENT_HOME")]
    NoHomeDirectory,
}

/// Plan restricts the model to read-only tools; Build allows execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Plan,
    #[default]
    Build,
}

impl OperationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "build" => Ok(Self::Build),
            other => Err(format!("expected plan or build, got '{other}'")),
        }
    }
}

/// Ask confirms every command with the user; Yolo runs them directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Ask,
    Yolo,
}

impl ExecutionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Yolo => "yolo",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "yolo" => Ok(Self::Yolo),
            other => Err(format!("expected ask or yolo, got '{other}'")),
        }
    }
}

/// Stdio MCP server launch description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub provider: String,
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_length: u64,
    pub auto_compress: bool,
    pub operation_mode: OperationMode,
    pub execution_mode: ExecutionMode,
    pub subagents_enabled: bool,
    pub auto_checkpoint: bool,
    pub require_checkpoint: bool,
    /// Identical consecutive calls allowed before the dispatcher skips them; 0 disables.
    pub loop_detection_threshold: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_sec: Option<u64>,
    /// Maximum finished background records kept; `None` keeps all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_retention: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_length: DEFAULT_CONTEXT_LENGTH,
            auto_compress: true,
            operation_mode: OperationMode::Build,
            execution_mode: ExecutionMode::Ask,
            subagents_enabled: true,
            auto_checkpoint: true,
            require_checkpoint: false,
            loop_detection_threshold: DEFAULT_LOOP_DETECTION_THRESHOLD,
            command_timeout_sec: None,
            background_retention: None,
            request_timeout_sec: None,
            system_prompt: None,
            mcp_servers: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Loads `<state_root>/config.json`, falling back to defaults when absent.
    pub fn load(state_root: &Path) -> Result<Self, ConfigError> {
        let store = JsonDocumentStore::<Self>::new(state_root);
        Ok(store.load(CONFIG_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, state_root: &Path) -> Result<(), ConfigError> {
        JsonDocumentStore::<Self>::new(state_root).save(CONFIG_KEY, self)?;
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` in place of the process environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(provider) = read(PROVIDER_ENV_VAR) {
            self.provider = provider;
        }
        if let Some(api_key) = read("OPENAI_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(api_url) = read("OPENAI_BASE") {
            self.api_url = api_url;
        }
        if let Some(model) = read("OPENAI_MODEL") {
            self.model = model;
        }
        if let Some(value) = read("MODEL_CONTEXT_LENGTH") {
            self.context_length = match value.parse::<u64>() {
                Ok(length) if length > 0 => length,
                Ok(_) => return Err(invalid_env("MODEL_CONTEXT_LENGTH", value, "must be > 0")),
                Err(error) => {
                    return Err(invalid_env("MODEL_CONTEXT_LENGTH", value, error.to_string()))
                }
            };
        }
        if let Some(value) = read("EXECUTION_MODE") {
            self.execution_mode = value
                .parse()
                .map_err(|reason| invalid_env("EXECUTION_MODE", value.clone(), reason))?;
        }
        if let Some(value) = read("OPERATION_MODE") {
            self.operation_mode = value
                .parse()
                .map_err(|reason| invalid_env("OPERATION_MODE", value.clone(), reason))?;
        }
        if let Some(value) = read("SUBAGENTS_ENABLED") {
            self.subagents_enabled = parse_bool(&value)
                .ok_or_else(|| invalid_env("SUBAGENTS_ENABLED", value.clone(), "expected a boolean"))?;
        }

        Ok(())
    }

    #[must_use]
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig::new(&self.model, self.temperature, self.max_tokens)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_sec
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_sec
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }

    /// Token count above which the conversation is compressed.
    #[must_use]
    pub fn compression_threshold(&self) -> u64 {
        self.context_length.saturating_mul(3) / 4
    }
}

fn invalid_env(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnv {
        var,
        value,
        reason: reason.into(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
