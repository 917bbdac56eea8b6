//! Isolated child runs started by the `spawn_agent` tool.

use agent_provider::{CompletionError, Message};
use serde::Deserialize;
use session_store::TokenUsage;
use thiserror::Error;
use tracing::{debug, info};

use crate::agents::AgentStoreError;
use crate::catalog::sub_agent_tools;
use crate::conversation::{new_conversation_id, Conversation, RepeatTracker, RunState, SpawnContext};
use crate::dispatcher::Dispatcher;
use crate::policy::filter_tools;
use crate::prompt::sub_agent_system_prompt;

pub const MAX_SUB_AGENT_ITERATIONS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubAgentRequest {
    pub task: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl SubAgentRequest {
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            agent: None,
            model: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubAgentError {
    #[error("unknown agent definition '{name}'")]
    UnknownAgent { name: String },

    #[error("failed to load agent definition: {0}")]
    Agents(#[source] AgentStoreError),

    #[error("sub-agent completion failed: {0}")]
    Completion(#[source] CompletionError),

    #[error("sub-agent finished without producing a result")]
    NoResult,

    #[error("sub-agent reached the iteration limit of {0}")]
    IterationLimit(usize),
}

impl Dispatcher {
    /// Runs `request` to completion in a fresh conversation and returns the final answer.
    ///
    /// The child never sees `spawn_agent`, never compresses, and never
    /// checkpoints; the parent already checkpointed before the spawn.
    pub fn spawn_sub_agent(
        &self,
        request: &SubAgentRequest,
        ctx: &SpawnContext,
    ) -> Result<String, SubAgentError> {
        let definition = match request
            .agent
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            Some(name) => Some(
                self.agents()
                    .load(name)
                    .map_err(SubAgentError::Agents)?
                    .ok_or_else(|| SubAgentError::UnknownAgent {
                        name: name.to_string(),
                    })?,
            ),
            None => None,
        };

        let conversation = Conversation {
            id: new_conversation_id(),
            name: None,
            messages: vec![
                Message::system(sub_agent_system_prompt(definition.as_ref(), self.workspace())),
                Message::user(request.task.clone()),
            ],
            agent_def_name: definition.as_ref().map(|definition| definition.name.clone()),
        };
        let mut state = RunState {
            conversation,
            usage: TokenUsage::default(),
            operation_mode: ctx.operation_mode,
            execution_mode: ctx.execution_mode,
            repeat: RepeatTracker::default(),
        };

        let sampling = self.sub_agent_sampling(definition.as_ref(), request.model.as_deref());
        let offered = filter_tools(
            &sub_agent_tools(&self.catalog()),
            state.operation_mode,
            definition.as_ref(),
        );
        let tools = offered.definitions();
        info!(
            sub_agent = %state.conversation.id,
            agent = definition.as_ref().map(|definition| definition.name.as_str()),
            model = %sampling.model,
            "sub-agent started"
        );

        for iteration in 1..=MAX_SUB_AGENT_ITERATIONS {
            let completion = self
                .service()
                .complete(&state.conversation.messages, &tools, &sampling)
                .map_err(SubAgentError::Completion)?;
            state.usage.accumulate(&completion.usage);

            let message = completion.message;
            if !message.has_pending_tool_calls() {
                let content = message.text_content().trim().to_string();
                debug!(sub_agent = %state.conversation.id, iteration, "sub-agent finished");
                if content.is_empty() {
                    return Err(SubAgentError::NoResult);
                }
                return Ok(content);
            }

            let calls = message.tool_calls.clone();
            state.conversation.messages.push(message);
            self.execute_tool_calls(&mut state, &calls, &offered, false);
        }

        Err(SubAgentError::IterationLimit(MAX_SUB_AGENT_ITERATIONS))
    }
}
