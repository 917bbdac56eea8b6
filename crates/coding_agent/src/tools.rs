//! Tool handlers and the table the dispatcher looks them up in.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use session_store::TodoStatus;
use time::OffsetDateTime;

use crate::agents::AgentDefinition;
use crate::background::KillStatus;
use crate::catalog;
use crate::checkpoint::{render_checkpoint_list, DEFAULT_CHECKPOINT_NAME};
use crate::config::{ExecutionMode, OperationMode};
use crate::conversation::{RunState, SpawnContext};
use crate::dispatcher::Dispatcher;
use crate::executor::{run_foreground, truncate_to_byte_limit, DEFAULT_MAX_OUTPUT_BYTES};
use crate::gate::CommandDecision;
use crate::skills::{run_skill, Skill};
use crate::subagent::SubAgentRequest;

pub const PLAN_MODE_BLOCKED: &str =
    "command execution is blocked in Plan mode. Switch to Build mode to execute commands";
pub const COMMAND_DECLINED: &str = "Command not executed by user.";
pub const PLAN_APPROVED: &str =
    "Plan approved by user. Switching to build mode to implement the plan...";
pub const PLAN_REJECTED: &str = "Plan rejected by user.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
        }
    }

    pub fn fail(content: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: content.into(),
        }
    }

    /// Failure carrying whatever output was produced before `error`.
    pub fn execution_error(output: &str, error: &dyn fmt::Display) -> Self {
        let output = output.trim_end();
        if output.is_empty() {
            Self::fail(format!("Tool execution error: {error}"))
        } else {
            Self::fail(format!("{output}\nTool execution error: {error}"))
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::fail(format!("Unknown tool: {name}"))
    }
}

pub type StatefulHandler = dyn Fn(&Dispatcher, &mut RunState, &str) -> ToolOutput + Send + Sync;
pub type ConcurrentHandler = dyn Fn(&Dispatcher, &SpawnContext, &str) -> ToolOutput + Send + Sync;

/// How a tool runs within a dispatch turn.
#[derive(Clone)]
pub enum ToolHandler {
    /// Runs on the loop thread with exclusive access to the run state.
    Stateful(Arc<StatefulHandler>),
    /// Runs on its own scoped thread; sees only the modes.
    Concurrent(Arc<ConcurrentHandler>),
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stateful(_) => f.write_str("ToolHandler::Stateful"),
            Self::Concurrent(_) => f.write_str("ToolHandler::Concurrent"),
        }
    }
}

fn stateful<F>(handler: F) -> ToolHandler
where
    F: Fn(&Dispatcher, &mut RunState, &str) -> ToolOutput + Send + Sync + 'static,
{
    ToolHandler::Stateful(Arc::new(handler))
}

/// Handler table for every built-in tool in the catalog.
#[must_use]
pub fn default_handlers() -> HashMap<String, ToolHandler> {
    let mut handlers = HashMap::new();
    handlers.insert(
        catalog::EXECUTE_COMMAND.to_string(),
        stateful(execute_command),
    );
    handlers.insert(
        catalog::KILL_BACKGROUND_COMMAND.to_string(),
        stateful(|dispatcher, _state, raw| kill_background_command(dispatcher, raw)),
    );
    handlers.insert(
        catalog::GET_BACKGROUND_LOGS.to_string(),
        stateful(|dispatcher, _state, raw| get_background_logs(dispatcher, raw)),
    );
    handlers.insert(
        catalog::LIST_BACKGROUND_COMMANDS.to_string(),
        stateful(|dispatcher, _state, _raw| list_background_commands(dispatcher)),
    );
    handlers.insert(
        catalog::SPAWN_AGENT.to_string(),
        ToolHandler::Concurrent(Arc::new(spawn_agent)),
    );
    handlers.insert(
        catalog::USE_MCP_TOOL.to_string(),
        stateful(|dispatcher, _state, raw| use_mcp_tool(dispatcher, raw)),
    );
    handlers.insert(catalog::SUGGEST_PLAN.to_string(), stateful(suggest_plan));
    handlers.insert(catalog::CREATE_TODO.to_string(), stateful(create_todo));
    handlers.insert(catalog::UPDATE_TODO.to_string(), stateful(update_todo));
    handlers.insert(
        catalog::GET_TODO_LIST.to_string(),
        stateful(|dispatcher, state, _raw| get_todo_list(dispatcher, state)),
    );
    handlers.insert(
        catalog::GET_CURRENT_TASK.to_string(),
        stateful(|dispatcher, state, _raw| get_current_task(dispatcher, state)),
    );
    handlers.insert(
        catalog::CLEAR_TODO.to_string(),
        stateful(|dispatcher, state, _raw| clear_todo(dispatcher, state)),
    );
    handlers.insert(
        catalog::CREATE_NOTE.to_string(),
        stateful(|dispatcher, _state, raw| create_note(dispatcher, raw)),
    );
    handlers.insert(
        catalog::UPDATE_NOTE.to_string(),
        stateful(|dispatcher, _state, raw| update_note(dispatcher, raw)),
    );
    handlers.insert(
        catalog::DELETE_NOTE.to_string(),
        stateful(|dispatcher, _state, raw| delete_note(dispatcher, raw)),
    );
    handlers.insert(catalog::NAME_SESSION.to_string(), stateful(name_session));
    handlers.insert(
        catalog::CREATE_AGENT_DEFINITION.to_string(),
        stateful(|dispatcher, _state, raw| create_agent_definition(dispatcher, raw)),
    );
    handlers.insert(
        catalog::CREATE_CHECKPOINT.to_string(),
        stateful(create_checkpoint),
    );
    handlers.insert(
        catalog::LIST_CHECKPOINTS.to_string(),
        stateful(|dispatcher, state, _raw| list_checkpoints(dispatcher, state)),
    );
    handlers
}

/// Handler running a discovered skill.
#[must_use]
pub fn skill_handler(skill: Skill) -> ToolHandler {
    stateful(move |dispatcher, _state, raw| {
        let arguments = if raw.trim().is_empty() { "{}" } else { raw };
        match run_skill(
            &skill,
            arguments,
            dispatcher.workspace(),
            dispatcher.config().command_timeout(),
        ) {
            Ok(output) => ToolOutput::ok(non_empty_output(output.output)),
            Err(error) => ToolOutput::execution_error(error.output(), &error),
        }
    })
}

/// Runs `handler`, turning a panic into an execution-error result.
pub(crate) fn run_guarded<F>(handler: F) -> ToolOutput
where
    F: FnOnce() -> ToolOutput,
{
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(output) => output,
        Err(panic) => ToolOutput::fail(format!(
            "Tool execution error: {}",
            panic_message(panic.as_ref())
        )),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tool panicked: {message}")
    } else {
        "tool panicked".to_string()
    }
}

fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T, ToolOutput> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw)
        .map_err(|error| ToolOutput::fail(format!("Failed to parse arguments: {error}")))
}

fn non_empty_output(output: String) -> String {
    if output.trim().is_empty() {
        "(no output)".to_string()
    } else {
        output
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteCommandArgs {
    command: String,
    #[serde(default)]
    background: bool,
}

fn execute_command(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: ExecuteCommandArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };

    if state.operation_mode == OperationMode::Plan {
        return ToolOutput::fail(PLAN_MODE_BLOCKED);
    }

    let decision = match state.execution_mode {
        ExecutionMode::Ask => dispatcher.gate().confirm_command(&args.command),
        ExecutionMode::Yolo if args.background => CommandDecision::Background,
        ExecutionMode::Yolo => CommandDecision::Foreground,
    };

    match decision {
        CommandDecision::Decline => ToolOutput::ok(COMMAND_DECLINED),
        CommandDecision::Background => match dispatcher.background().launch(&args.command) {
            Ok(handle) => ToolOutput::ok(format!("Background command started with PID: {handle}")),
            Err(error) => ToolOutput::execution_error("", &error),
        },
        CommandDecision::Foreground => match run_foreground(
            &args.command,
            dispatcher.workspace(),
            dispatcher.config().command_timeout(),
            &[],
        ) {
            Ok(output) => ToolOutput::ok(non_empty_output(output.output)),
            Err(error) => ToolOutput::execution_error(error.output(), &error),
        },
    }
}

#[derive(Debug, Deserialize)]
struct PidArgs {
    pid: u32,
}

fn kill_background_command(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: PidArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    match dispatcher.background().kill(args.pid) {
        Ok(KillStatus::Killed) => ToolOutput::ok(format!("Process {} killed", args.pid)),
        Ok(KillStatus::AlreadyFinished) => ToolOutput::ok("Process already finished"),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn get_background_logs(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: PidArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    match dispatcher.background().logs(args.pid) {
        Ok(logs) if logs.is_empty() => ToolOutput::ok("(no output yet)"),
        Ok(logs) => ToolOutput::ok(truncate_to_byte_limit(logs, DEFAULT_MAX_OUTPUT_BYTES)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn list_background_commands(dispatcher: &Dispatcher) -> ToolOutput {
    ToolOutput::ok(dispatcher.background().describe())
}

fn spawn_agent(dispatcher: &Dispatcher, ctx: &SpawnContext, raw: &str) -> ToolOutput {
    let request: SubAgentRequest = match parse_args(raw) {
        Ok(request) => request,
        Err(output) => return output,
    };
    match dispatcher.spawn_sub_agent(&request, ctx) {
        Ok(result) => ToolOutput::ok(result),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct McpArgs {
    server_name: String,
    tool_name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

fn use_mcp_tool(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: McpArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    let Some(gateway) = dispatcher.mcp() else {
        return ToolOutput::fail("Tool execution error: no MCP servers are configured");
    };
    let arguments = args
        .arguments
        .unwrap_or_else(|| Value::Object(Default::default()));
    match gateway.call(&args.server_name, &args.tool_name, arguments) {
        Ok(text) => ToolOutput::ok(text),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct PlanArgs {
    name: String,
    description: String,
}

fn suggest_plan(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: PlanArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };

    if !dispatcher.gate().approve_plan(&args.name, &args.description) {
        return ToolOutput::ok(PLAN_REJECTED);
    }

    if let Err(error) = write_plan(dispatcher, &args) {
        return ToolOutput::execution_error("", &error);
    }
    state.operation_mode = OperationMode::Build;
    ToolOutput::ok(PLAN_APPROVED)
}

fn write_plan(dispatcher: &Dispatcher, plan: &PlanArgs) -> std::io::Result<()> {
    let paths = dispatcher.workspace_paths();
    let plans_dir = paths.plans_dir();
    fs::create_dir_all(&plans_dir)?;

    let document = format!("# {}\n\n{}\n", plan.name, plan.description);
    let file_name = format!(
        "plan_{}_{}.md",
        file_timestamp(OffsetDateTime::now_utc()),
        plan_slug(&plan.name)
    );
    fs::write(plans_dir.join(file_name), &document)?;
    fs::write(paths.current_plan_file(), &document)
}

fn file_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn plan_slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(50)
        .collect();
    if slug.is_empty() {
        "plan".to_string()
    } else {
        slug
    }
}

#[derive(Debug, Deserialize)]
struct CreateTodoArgs {
    task: String,
}

fn create_todo(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: CreateTodoArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    let todos = dispatcher.todos();
    let result = todos.load(&state.conversation.id).and_then(|mut list| {
        let id = list.add(args.task);
        todos.save(&list).map(|()| id)
    });
    match result {
        Ok(id) => ToolOutput::ok(format!("Todo created with ID: {id}")),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateTodoArgs {
    id: u32,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    task: Option<String>,
}

fn update_todo(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: UpdateTodoArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    let status = match args.status.as_deref().map(str::parse::<TodoStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(message)) => return ToolOutput::fail(format!("Tool execution error: {message}")),
        None => None,
    };

    let todos = dispatcher.todos();
    let mut list = match todos.load(&state.conversation.id) {
        Ok(list) => list,
        Err(error) => return ToolOutput::execution_error("", &error),
    };
    if !list.update(args.id, status, args.task) {
        return ToolOutput::fail(format!(
            "Tool execution error: todo with ID {} not found",
            args.id
        ));
    }
    match todos.save(&list) {
        Ok(()) => ToolOutput::ok(format!("Todo {} updated.", args.id)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn get_todo_list(dispatcher: &Dispatcher, state: &RunState) -> ToolOutput {
    match dispatcher.todos().load(&state.conversation.id) {
        Ok(list) => ToolOutput::ok(list.render()),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn get_current_task(dispatcher: &Dispatcher, state: &RunState) -> ToolOutput {
    match dispatcher.todos().load(&state.conversation.id) {
        Ok(list) => match list.current() {
            Some(item) => ToolOutput::ok(format!("Current task: [ID: {}] {}", item.id, item.task)),
            None => ToolOutput::ok("No task in progress."),
        },
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn clear_todo(dispatcher: &Dispatcher, state: &RunState) -> ToolOutput {
    match dispatcher.todos().clear(&state.conversation.id) {
        Ok(_) => ToolOutput::ok("Todo list cleared."),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct NoteArgs {
    name: String,
    #[serde(default)]
    content: String,
}

fn create_note(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: NoteArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    match dispatcher.notes().create(&args.name, &args.content) {
        Ok(note) => ToolOutput::ok(format!("Note '{}' created successfully.", note.name)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn update_note(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: NoteArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    match dispatcher.notes().update(&args.name, &args.content) {
        Ok(note) => ToolOutput::ok(format!("Note '{}' updated successfully.", note.name)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn delete_note(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: NoteArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    match dispatcher.notes().delete(&args.name) {
        Ok(()) => ToolOutput::ok(format!("Note '{}' deleted successfully.", args.name)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct NameSessionArgs {
    name: String,
}

fn name_session(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: NameSessionArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    let name = args.name.trim();
    if name.is_empty() {
        return ToolOutput::fail("Tool execution error: session name must not be empty");
    }

    match dispatcher.rename_session(state, name) {
        Ok(()) => ToolOutput::ok(format!("Session named '{name}'.")),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Deserialize)]
struct AgentDefinitionArgs {
    name: String,
    #[serde(default)]
    description: String,
    system_prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    denied_tools: Vec<String>,
}

fn create_agent_definition(dispatcher: &Dispatcher, raw: &str) -> ToolOutput {
    let args: AgentDefinitionArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };

    let mut definition = AgentDefinition::new(args.name, args.system_prompt)
        .with_allowed_tools(args.allowed_tools)
        .with_denied_tools(args.denied_tools);
    definition.description = args.description;
    definition.model = args.model;
    definition.temperature = args.temperature;
    definition.max_tokens = args.max_tokens;

    match dispatcher.agents().save(definition) {
        Ok(saved) => ToolOutput::ok(format!("Agent definition '{}' saved.", saved.name)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateCheckpointArgs {
    #[serde(default)]
    name: Option<String>,
}

fn create_checkpoint(dispatcher: &Dispatcher, state: &mut RunState, raw: &str) -> ToolOutput {
    let args: CreateCheckpointArgs = match parse_args(raw) {
        Ok(args) => args,
        Err(output) => return output,
    };
    let name = args
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_CHECKPOINT_NAME);

    match dispatcher.create_checkpoint(state, name, false) {
        Ok(checkpoint) => ToolOutput::ok(format!("Checkpoint created with ID: {}", checkpoint.id)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

fn list_checkpoints(dispatcher: &Dispatcher, state: &RunState) -> ToolOutput {
    match dispatcher.checkpoints().list(&state.conversation.id) {
        Ok(checkpoints) => ToolOutput::ok(render_checkpoint_list(&checkpoints)),
        Err(error) => ToolOutput::execution_error("", &error),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_args, plan_slug, run_guarded, PidArgs, ToolOutput};

    #[test]
    fn execution_errors_keep_prior_output() {
        let error = "command execution failed: exit_code=2";
        assert_eq!(
            ToolOutput::execution_error("partial\n", &error).content,
            "partial\nTool execution error: command execution failed: exit_code=2"
        );
        assert_eq!(
            ToolOutput::execution_error("", &error).content,
            "Tool execution error: command execution failed: exit_code=2"
        );
    }

    #[test]
    fn argument_errors_are_reported_as_tool_output() {
        let error = parse_args::<PidArgs>(r#"{"pid": "one"}"#).expect_err("bad pid type");
        assert!(!error.ok);
        assert!(
            error.content.starts_with("Failed to parse arguments: "),
            "{}",
            error.content
        );
        assert!(parse_args::<PidArgs>("").is_err());
    }

    #[test]
    fn panics_become_execution_errors() {
        let output = run_guarded(|| panic!("boom"));
        assert_eq!(output.content, "Tool execution error: tool panicked: boom");
    }

    #[test]
    fn plan_slugs_are_file_safe() {
        assert_eq!(plan_slug("Add Auth / Login"), "add_auth___login");
        assert_eq!(plan_slug("   "), "plan");
    }
}
