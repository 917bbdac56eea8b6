//! The agentic loop: request a turn, dispatch its tool calls, repeat.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use agent_provider::{CompletionService, Message, Role, SamplingConfig, ToolCall};
use session_store::{NoteStore, SessionRecord, SessionStore, TodoStore, TokenUsage};
use tracing::{debug, info, warn};

use crate::agents::{AgentDefinition, AgentRegistry};
use crate::background::{BackgroundProcessManager, REMINDER_PREFIX};
use crate::catalog::{build_catalog, CatalogOptions, ToolSpec};
use crate::checkpoint::{Checkpoint, CheckpointManager, RestoredCheckpoint};
use crate::compression::{compress_conversation, should_compress};
use crate::config::AgentConfig;
use crate::container::detect_system_snapshotter;
use crate::conversation::{Conversation, RunState};
use crate::error::AgentError;
use crate::gate::{ConfirmationGate, TerminalGate};
use crate::lock_unpoisoned;
use crate::mcp::{McpGateway, StdioMcpGateway};
use crate::paths::{StatePaths, WorkspacePaths};
use crate::policy::{filter_tools, PolicyOutcome, PolicyWarning};
use crate::prompt::root_system_prompt;
use crate::shadow_git::ShadowGit;
use crate::skills::{load_skills, Skill};
use crate::tools::{
    default_handlers, panic_message, run_guarded, skill_handler, ToolHandler, ToolOutput,
};

const REPEAT_CORRECTION: &str = "You are repeating the same tool call with identical arguments, \
so the repeated call was skipped. Change your approach: use different arguments, try another tool, \
or report your findings to the user.";

pub const COMPRESSED_NOTICE: &str =
    "Context compressed due to token limit. New user input is required.";

/// How a dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Finished { content: String },
    /// The context was compressed mid-cycle; a fresh user turn is needed.
    Compressed,
}

impl TurnOutcome {
    /// Text shown to the user: the answer, or the compression notice.
    #[must_use]
    pub fn into_reply(self) -> String {
        match self {
            Self::Finished { content } => content,
            Self::Compressed => COMPRESSED_NOTICE.to_string(),
        }
    }
}

/// Latest persistable view of the run, read by the exit handler.
pub type SessionSnapshot = Arc<Mutex<Option<SessionRecord>>>;

/// Owns the collaborators a run needs. Shared read-only across tool threads.
pub struct Dispatcher {
    service: Arc<dyn CompletionService>,
    config: AgentConfig,
    state_paths: StatePaths,
    workspace: WorkspacePaths,
    agents: AgentRegistry,
    sessions: SessionStore,
    todos: TodoStore,
    notes: NoteStore,
    background: BackgroundProcessManager,
    checkpoints: Arc<CheckpointManager>,
    gate: Arc<dyn ConfirmationGate>,
    mcp: Option<Arc<dyn McpGateway>>,
    skills: Vec<Skill>,
    handlers: HashMap<String, ToolHandler>,
    snapshot: Option<SessionSnapshot>,
}

impl Dispatcher {
    /// Wires the default collaborators: terminal gate, shadow-git checkpoints,
    /// stdio MCP when servers are configured, and skills from both skill roots.
    #[must_use]
    pub fn new(
        service: Arc<dyn CompletionService>,
        config: AgentConfig,
        state_paths: StatePaths,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let workspace = WorkspacePaths::new(workspace);
        let checkpoints = CheckpointManager::new(
            state_paths.checkpoint_metadata_dir(),
            Arc::new(ShadowGit::new(
                state_paths.shadow_git_dir(),
                workspace.workspace(),
            )),
            detect_system_snapshotter(),
        )
        .with_summarizer(Arc::clone(&service), config.sampling());
        let mcp: Option<Arc<dyn McpGateway>> = if config.mcp_servers.is_empty() {
            None
        } else {
            Some(Arc::new(StdioMcpGateway::new(
                config.mcp_servers.clone(),
                workspace.workspace(),
            )))
        };
        let skills = load_skills(&[state_paths.skills_dir(), workspace.skills_dir()]);

        Self {
            service,
            agents: AgentRegistry::new(state_paths.agents_dir()),
            sessions: SessionStore::new(state_paths.sessions_dir()),
            todos: TodoStore::new(state_paths.todos_dir()),
            notes: NoteStore::new(workspace.notes_dir()),
            background: BackgroundProcessManager::new(workspace.workspace())
                .with_retention(config.background_retention),
            checkpoints: Arc::new(checkpoints),
            gate: Arc::new(TerminalGate::new()),
            mcp,
            skills,
            handlers: default_handlers(),
            snapshot: None,
            config,
            state_paths,
            workspace,
        }
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Arc::new(checkpoints);
        self
    }

    #[must_use]
    pub fn with_mcp_gateway(mut self, gateway: Arc<dyn McpGateway>) -> Self {
        self.mcp = Some(gateway);
        self
    }

    #[must_use]
    pub fn with_skills(mut self, skills: Vec<Skill>) -> Self {
        self.skills = skills;
        self
    }

    /// Publishes the session record into `snapshot` after every step that changes history.
    #[must_use]
    pub fn with_session_snapshot(mut self, snapshot: SessionSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn publish_snapshot(&self, state: &RunState) {
        if let Some(snapshot) = &self.snapshot {
            *lock_unpoisoned(snapshot) = Some(state.session_record());
        }
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Switches the model for later requests and commit messages, and saves the config.
    pub fn set_model(&mut self, model: &str) -> Result<(), AgentError> {
        self.config.model = model.to_string();
        self.checkpoints.set_summary_model(model);
        self.persist_config()
    }

    pub fn set_context_length(&mut self, context_length: u64) -> Result<(), AgentError> {
        self.config.context_length = context_length;
        self.persist_config()
    }

    fn persist_config(&self) -> Result<(), AgentError> {
        self.config.save(self.state_paths.root())?;
        Ok(())
    }

    #[must_use]
    pub fn service(&self) -> &dyn CompletionService {
        self.service.as_ref()
    }

    #[must_use]
    pub fn state_paths(&self) -> &StatePaths {
        &self.state_paths
    }

    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.workspace.workspace()
    }

    #[must_use]
    pub fn workspace_paths(&self) -> &WorkspacePaths {
        &self.workspace
    }

    #[must_use]
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn todos(&self) -> &TodoStore {
        &self.todos
    }

    #[must_use]
    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    #[must_use]
    pub fn background(&self) -> &BackgroundProcessManager {
        &self.background
    }

    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    #[must_use]
    pub fn gate(&self) -> &dyn ConfirmationGate {
        self.gate.as_ref()
    }

    #[must_use]
    pub fn mcp(&self) -> Option<&dyn McpGateway> {
        self.mcp.as_deref()
    }

    #[must_use]
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Root catalog for the current configuration.
    #[must_use]
    pub fn catalog(&self) -> Vec<ToolSpec> {
        build_catalog(
            CatalogOptions {
                subagents_enabled: self.config.subagents_enabled,
                mcp_available: self.mcp.is_some(),
            },
            &self.skills,
        )
    }

    /// Fresh run with the root system prompt, optionally under a named persona.
    pub fn new_run_state(&self, agent: Option<&str>) -> Result<RunState, AgentError> {
        let definition = match agent {
            Some(name) => Some(self.agents.require(name)?),
            None => None,
        };
        let mut conversation = Conversation::new(self.base_prompt(definition.as_ref()));
        conversation.agent_def_name = definition.map(|definition| definition.name);
        Ok(RunState::new(conversation, &self.config))
    }

    /// Switches persona (or clears it) and rewrites the system prompt to match.
    pub fn set_agent(&self, state: &mut RunState, agent: Option<&str>) -> Result<(), AgentError> {
        let definition = match agent {
            Some(name) => Some(self.agents.require(name)?),
            None => None,
        };
        state
            .conversation
            .set_system_prompt(self.base_prompt(definition.as_ref()));
        state.conversation.agent_def_name = definition.map(|definition| definition.name);
        Ok(())
    }

    fn base_prompt(&self, agent: Option<&AgentDefinition>) -> String {
        root_system_prompt(
            self.config.system_prompt.as_deref(),
            agent,
            self.workspace(),
        )
    }

    fn active_agent(&self, state: &RunState) -> Option<AgentDefinition> {
        let name = state.conversation.agent_def_name.as_deref()?;
        match self.agents.load(name) {
            Ok(Some(definition)) => Some(definition),
            Ok(None) => {
                warn!(agent = name, "active agent definition no longer exists");
                None
            }
            Err(error) => {
                warn!(agent = name, %error, "failed to load active agent definition");
                None
            }
        }
    }

    fn compression_due(&self, state: &RunState) -> bool {
        self.config.auto_compress
            && should_compress(state.usage.total_tokens, self.config.context_length)
    }

    /// Appends `input` as a user message and runs the cycle to completion.
    pub fn run_turn(&self, state: &mut RunState, input: &str) -> Result<TurnOutcome, AgentError> {
        if self.compression_due(state) {
            self.compress_now(state)?;
        }
        state.conversation.messages.push(Message::user(input));
        self.publish_snapshot(state);
        self.run_cycle(state)
    }

    pub fn run_cycle(&self, state: &mut RunState) -> Result<TurnOutcome, AgentError> {
        loop {
            let agent = self.active_agent(state);
            let offered = filter_tools(&self.catalog(), state.operation_mode, agent.as_ref());
            if let Some(PolicyWarning::ConflictingLists { agent }) = &offered.warning {
                warn!(
                    agent = %agent,
                    "agent sets both allowed_tools and denied_tools; applying allowed_tools"
                );
            }

            let base = self.config.sampling();
            let sampling = match &agent {
                Some(definition) => definition.sampling(&base),
                None => base,
            };
            debug!(
                messages = state.conversation.messages.len(),
                tools = offered.tools.len(),
                model = %sampling.model,
                "requesting completion"
            );
            let completion = self
                .service
                .complete(
                    &state.conversation.messages,
                    &offered.definitions(),
                    &sampling,
                )
                .map_err(AgentError::Completion)?;

            state.usage.accumulate(&completion.usage);
            let message = completion.message;
            if !message.has_pending_tool_calls() {
                let content = message.text_content().to_string();
                state.conversation.messages.push(message);
                self.publish_snapshot(state);
                return Ok(TurnOutcome::Finished { content });
            }

            let calls = message.tool_calls.clone();
            state.conversation.messages.push(message);
            self.execute_tool_calls(state, &calls, &offered, true);
            self.refresh_background_reminder(state);
            self.publish_snapshot(state);

            if self.compression_due(state) {
                self.compress_now(state)?;
                self.publish_snapshot(state);
                return Ok(TurnOutcome::Compressed);
            }
        }
    }

    /// Runs `calls` and appends exactly one tool message per call, in call order.
    ///
    /// Concurrent handlers start on scoped threads as they are reached while
    /// stateful ones run here; every worker is joined before anything is appended.
    pub(crate) fn execute_tool_calls(
        &self,
        state: &mut RunState,
        calls: &[ToolCall],
        offered: &PolicyOutcome,
        is_root: bool,
    ) {
        let threshold = self.config.loop_detection_threshold;
        let spawn_context = state.spawn_context();
        let mut results: Vec<Option<ToolOutput>> = vec![None; calls.len()];
        let mut skipped_repeat = false;
        state.usage.record_tool_calls(calls.len());

        thread::scope(|scope| {
            let mut workers = Vec::new();

            for (index, call) in calls.iter().enumerate() {
                let name = call.name();
                let repeats = state.repeat.observe(name, call.arguments());
                if threshold > 0 && repeats > threshold {
                    warn!(tool = name, repeats, "skipping repeated tool call");
                    results[index] = Some(ToolOutput::fail(format!(
                        "Skipped repeated call to {name}: the same arguments were used {repeats} times in a row."
                    )));
                    skipped_repeat = true;
                    continue;
                }

                let Some(spec) = offered.get(name) else {
                    results[index] = Some(ToolOutput::unknown_tool(name));
                    continue;
                };
                let Some(handler) = self.handler_for(name) else {
                    results[index] = Some(ToolOutput::unknown_tool(name));
                    continue;
                };

                if is_root && spec.dangerous && self.config.auto_checkpoint {
                    let checkpoint_name = format!("Auto-checkpoint before {name}");
                    if let Err(error) = self.create_checkpoint(state, &checkpoint_name, true) {
                        if self.config.require_checkpoint {
                            results[index] = Some(ToolOutput::fail(format!(
                                "Tool execution error: auto-checkpoint failed: {error}"
                            )));
                            continue;
                        }
                        warn!(tool = name, %error, "auto-checkpoint failed; continuing");
                    }
                }

                info!(tool = name, call_id = %call.id, "dispatching tool call");
                match handler {
                    ToolHandler::Stateful(handler) => {
                        let output = run_guarded(|| handler(self, state, call.arguments()));
                        results[index] = Some(output);
                    }
                    ToolHandler::Concurrent(handler) => {
                        let arguments = call.arguments();
                        let spawned = thread::Builder::new()
                            .name(format!("tool-{name}"))
                            .spawn_scoped(scope, move || handler(self, &spawn_context, arguments));
                        match spawned {
                            Ok(worker) => workers.push((index, worker)),
                            Err(error) => {
                                results[index] = Some(ToolOutput::execution_error("", &error));
                            }
                        }
                    }
                }
            }

            for (index, worker) in workers {
                let output = match worker.join() {
                    Ok(output) => output,
                    Err(panic) => ToolOutput::fail(format!(
                        "Tool execution error: {}",
                        panic_message(panic.as_ref())
                    )),
                };
                results[index] = Some(output);
            }
        });

        for (call, result) in calls.iter().zip(results) {
            let output =
                result.unwrap_or_else(|| ToolOutput::execution_error("", &"tool produced no result"));
            if !output.ok {
                debug!(tool = call.name(), "tool call failed");
            }
            state
                .conversation
                .messages
                .push(Message::tool_result(call.id.clone(), output.content));
        }

        if skipped_repeat {
            state
                .conversation
                .messages
                .push(Message::system(REPEAT_CORRECTION));
        }
    }

    fn handler_for(&self, name: &str) -> Option<ToolHandler> {
        if let Some(handler) = self.handlers.get(name) {
            return Some(handler.clone());
        }
        self.skills
            .iter()
            .find(|skill| skill.name == name)
            .map(|skill| skill_handler(skill.clone()))
    }

    fn refresh_background_reminder(&self, state: &mut RunState) {
        state.conversation.messages.retain(|message| {
            !(message.role == Role::System && message.text_content().starts_with(REMINDER_PREFIX))
        });
        if let Some(reminder) = self.background.reminder() {
            state.conversation.messages.push(Message::system(reminder));
        }
    }

    /// Replaces the conversation with a summary of itself and resets usage.
    pub fn compress_now(&self, state: &mut RunState) -> Result<(), AgentError> {
        let agent = self.active_agent(state);
        let base_prompt = self.base_prompt(agent.as_ref());
        let compressed = compress_conversation(
            self.service.as_ref(),
            &self.config.model,
            &state.conversation,
            &base_prompt,
        )
        .map_err(AgentError::Compression)?;

        info!(
            previous = %state.conversation.id,
            current = %compressed.id,
            tokens = state.usage.total_tokens,
            "conversation compressed"
        );
        state.conversation = compressed;
        state.usage = TokenUsage::default();
        state.repeat.reset();
        Ok(())
    }

    pub fn create_checkpoint(
        &self,
        state: &RunState,
        name: &str,
        is_auto: bool,
    ) -> Result<Checkpoint, AgentError> {
        Ok(self
            .checkpoints
            .create(&state.conversation, state.usage, name, is_auto)?)
    }

    /// Restores files and conversation to checkpoint `id`.
    pub fn restore_checkpoint(
        &self,
        state: &mut RunState,
        id: &str,
    ) -> Result<RestoredCheckpoint, AgentError> {
        let restored = self.checkpoints.restore(&state.conversation.id, id)?;
        for warning in &restored.warnings {
            warn!(checkpoint = id, "{warning}");
        }
        state.conversation.messages = restored.messages.clone();
        state.usage = restored.usage;
        state.repeat.reset();
        Ok(restored)
    }

    pub fn save_session(&self, state: &RunState) -> Result<SessionRecord, AgentError> {
        Ok(self.sessions.save(state.session_record())?)
    }

    pub fn load_session(&self, key: &str) -> Result<RunState, AgentError> {
        let record = self
            .sessions
            .load(key)?
            .ok_or_else(|| AgentError::Session {
                key: key.to_string(),
            })?;
        let (conversation, usage) = Conversation::from_record(record);
        let mut state = RunState::new(conversation, &self.config);
        state.usage = usage;
        Ok(state)
    }

    /// Names the session and moves its saved document to the new key.
    pub fn rename_session(&self, state: &mut RunState, name: &str) -> Result<(), AgentError> {
        let previous_key = state.conversation.to_record(state.usage).key().to_string();
        state.conversation.name = Some(name.to_string());
        let saved = self.save_session(state)?;
        if saved.key() != previous_key {
            self.sessions.delete(&previous_key)?;
        }
        Ok(())
    }

    /// Sampling used for a sub-agent run.
    pub(crate) fn sub_agent_sampling(
        &self,
        definition: Option<&AgentDefinition>,
        model: Option<&str>,
    ) -> SamplingConfig {
        let base = self.config.sampling();
        let mut sampling = match definition {
            Some(definition) => definition.sampling(&base),
            None => base,
        };
        if let Some(model) = model.map(str::trim).filter(|model| !model.is_empty()) {
            sampling.model = model.to_string();
        }
        sampling
    }
}
