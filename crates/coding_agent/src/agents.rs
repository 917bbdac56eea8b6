//! Named agent personas stored as `<state>/agents/<name>.json`.

use std::path::PathBuf;

use agent_provider::SamplingConfig;
use serde::{Deserialize, Serialize};
use session_store::{now_rfc3339, JsonDocumentStore, StoreError};
use thiserror::Error;

pub const DEFAULT_AGENT_NAME: &str = "default";

const DEFAULT_AGENT_DESCRIPTION: &str = "General-purpose coding agent with every tool available.";
const DEFAULT_AGENT_PROMPT: &str =
    "Handle the user's request directly, using whichever tools fit the task.";

#[derive(Debug, Error)]
pub enum AgentStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("agent name '{name}' is empty after sanitization")]
    InvalidName { name: String },

    #[error("agent definition '{name}' not found")]
    NotFound { name: String },

    #[error("the built-in '{name}' agent cannot be deleted")]
    Protected { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_tools: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl AgentDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            model: None,
            temperature: None,
            max_tokens: None,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[must_use]
    pub fn builtin_default() -> Self {
        let mut definition = Self::new(DEFAULT_AGENT_NAME, DEFAULT_AGENT_PROMPT);
        definition.description = DEFAULT_AGENT_DESCRIPTION.to_string();
        definition
    }

    #[must_use]
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_denied_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Applies this definition's sampling overrides on top of `base`.
    #[must_use]
    pub fn sampling(&self, base: &SamplingConfig) -> SamplingConfig {
        let mut sampling = base.clone();
        if let Some(model) = self.model.as_deref().filter(|model| !model.trim().is_empty()) {
            sampling.model = model.to_string();
        }
        if let Some(temperature) = self.temperature {
            sampling.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            sampling.max_tokens = max_tokens;
        }
        sampling
    }
}

#[must_use]
pub fn sanitize_agent_name(name: &str) -> String {
    name.trim()
        .replace(['/', '\\', ' '], "-")
        .replace("..", "-")
}

/// Directory-backed registry; the built-in `default` exists even when nothing is on disk.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    documents: JsonDocumentStore<AgentDefinition>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            documents: JsonDocumentStore::new(root),
        }
    }

    pub fn load(&self, name: &str) -> Result<Option<AgentDefinition>, AgentStoreError> {
        let key = checked_key(name)?;
        match self.documents.load(&key)? {
            Some(definition) => Ok(Some(definition)),
            None if key == DEFAULT_AGENT_NAME => Ok(Some(AgentDefinition::builtin_default())),
            None => Ok(None),
        }
    }

    pub fn require(&self, name: &str) -> Result<AgentDefinition, AgentStoreError> {
        self.load(name)?.ok_or_else(|| AgentStoreError::NotFound {
            name: name.to_string(),
        })
    }

    /// Writes `definition` under its sanitized name, keeping the first `created_at`.
    pub fn save(&self, mut definition: AgentDefinition) -> Result<AgentDefinition, AgentStoreError> {
        let key = checked_key(&definition.name)?;
        let now = now_rfc3339()?;
        definition.name = key.clone();
        definition.created_at = match self.documents.load(&key)? {
            Some(existing) if !existing.created_at.is_empty() => existing.created_at,
            _ => now.clone(),
        };
        definition.updated_at = now;
        self.documents.save(&key, &definition)?;
        Ok(definition)
    }

    pub fn delete(&self, name: &str) -> Result<bool, AgentStoreError> {
        let key = checked_key(name)?;
        if key == DEFAULT_AGENT_NAME {
            return Err(AgentStoreError::Protected { name: key });
        }
        Ok(self.documents.delete(&key)?)
    }

    /// Every definition sorted by name, the built-in included.
    pub fn list(&self) -> Result<Vec<AgentDefinition>, AgentStoreError> {
        let mut definitions = Vec::new();
        for key in self.documents.keys()? {
            if let Some(definition) = self.documents.load(&key)? {
                definitions.push(definition);
            }
        }
        if !definitions
            .iter()
            .any(|definition| definition.name == DEFAULT_AGENT_NAME)
        {
            definitions.push(AgentDefinition::builtin_default());
        }
        definitions.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(definitions)
    }
}

fn checked_key(name: &str) -> Result<String, AgentStoreError> {
    let key = sanitize_agent_name(name);
    if key.is_empty() {
        return Err(AgentStoreError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use agent_provider::SamplingConfig;
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn names_are_sanitized_for_file_storage() {
        assert_eq!(sanitize_agent_name(" code reviewer "), "code-reviewer");
        assert_eq!(sanitize_agent_name("a/b\\c"), "a-b-c");
        assert_eq!(sanitize_agent_name("../up"), "--up");
    }

    #[test]
    fn builtin_default_exists_and_is_protected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = AgentRegistry::new(dir.path());

        let default = registry
            .require(DEFAULT_AGENT_NAME)
            .expect("default should always load");
        assert_eq!(default.name, DEFAULT_AGENT_NAME);
        assert_matches!(
            registry.delete(DEFAULT_AGENT_NAME),
            Err(AgentStoreError::Protected { .. })
        );
        assert_matches!(
            registry.require("missing"),
            Err(AgentStoreError::NotFound { .. })
        );
    }

    #[test]
    fn save_keeps_created_at_and_lists_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = AgentRegistry::new(dir.path());

        let first = registry
            .save(AgentDefinition::new("tester", "Write tests."))
            .expect("save tester");
        let second = registry
            .save(AgentDefinition::new("tester", "Write more tests."))
            .expect("resave tester");
        assert_eq!(second.created_at, first.created_at);

        registry
            .save(AgentDefinition::new("architect", "Design."))
            .expect("save architect");
        let names: Vec<String> = registry
            .list()
            .expect("list")
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec!["architect", "default", "tester"]);

        assert!(registry.delete("tester").expect("delete tester"));
        assert!(!registry.delete("tester").expect("second delete"));
    }

    #[test]
    fn sampling_overrides_only_fields_that_are_set() {
        let mut definition = AgentDefinition::new("fast", "Be quick.").with_model("gpt-4o-mini");
        definition.max_tokens = Some(200);

        let sampling = definition.sampling(&SamplingConfig::new("gpt-4o", 0.1, 1000));
        assert_eq!(sampling.model, "gpt-4o-mini");
        assert_eq!(sampling.max_tokens, 200);
        assert!((sampling.temperature - 0.1).abs() < f32::EPSILON);
    }
}
