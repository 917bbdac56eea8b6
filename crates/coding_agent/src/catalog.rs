//! Static description of every tool the runtime can offer the model.

use agent_provider::ToolDefinition;
use serde_json::{json, Value};

use crate::skills::Skill;

pub const EXECUTE_COMMAND: &str = "execute_command";
pub const KILL_BACKGROUND_COMMAND: &str = "kill_background_command";
pub const GET_BACKGROUND_LOGS: &str = "get_background_logs";
pub const LIST_BACKGROUND_COMMANDS: &str = "list_background_commands";
pub const SPAWN_AGENT: &str = "spawn_agent";
pub const USE_MCP_TOOL: &str = "use_mcp_tool";
pub const SUGGEST_PLAN: &str = "suggest_plan";
pub const CREATE_TODO: &str = "create_todo";
pub const UPDATE_TODO: &str = "update_todo";
pub const GET_TODO_LIST: &str = "get_todo_list";
pub const GET_CURRENT_TASK: &str = "get_current_task";
pub const CLEAR_TODO: &str = "clear_todo";
pub const CREATE_NOTE: &str = "create_note";
pub const UPDATE_NOTE: &str = "update_note";
pub const DELETE_NOTE: &str = "delete_note";
pub const NAME_SESSION: &str = "name_session";
pub const CREATE_AGENT_DEFINITION: &str = "create_agent_definition";
pub const CREATE_CHECKPOINT: &str = "create_checkpoint";
pub const LIST_CHECKPOINTS: &str = "list_checkpoints";

/// Which operation mode a tool is visible in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolMode {
    Any,
    BuildOnly,
    PlanOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub mode: ToolMode,
    /// Mutates the workspace or system; triggers an auto-checkpoint first.
    pub dangerous: bool,
    /// Offered to spawned sub-agents.
    pub sub_agent: bool,
}

impl ToolSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    pub subagents_enabled: bool,
    pub mcp_available: bool,
}

/// Full root-loop catalog in a stable order; skills come last.
#[must_use]
pub fn build_catalog(options: CatalogOptions, skills: &[Skill]) -> Vec<ToolSpec> {
    let mut catalog = vec![
        spec(
            EXECUTE_COMMAND,
            "Execute a shell command in the workspace and return its combined output. \
             Set background to true for long-running processes.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to run"},
                    "background": {"type": "boolean", "description": "Run detached and return a PID"}
                },
                "required": ["command"]
            }),
            ToolMode::BuildOnly,
            true,
            true,
        ),
        spec(
            KILL_BACKGROUND_COMMAND,
            "Terminate a background command by PID.",
            pid_schema(),
            ToolMode::BuildOnly,
            true,
            true,
        ),
        spec(
            GET_BACKGROUND_LOGS,
            "Return the output captured so far from a background command.",
            pid_schema(),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            LIST_BACKGROUND_COMMANDS,
            "List background commands with their status.",
            empty_schema(),
            ToolMode::Any,
            false,
            true,
        ),
    ];

    if options.subagents_enabled {
        catalog.push(spec(
            SPAWN_AGENT,
            "Delegate a self-contained task to a sub-agent and return its final answer. \
             Several spawns in one turn run concurrently.",
            json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Task for the sub-agent"},
                    "agent": {"type": "string", "description": "Agent definition to use"},
                    "model": {"type": "string", "description": "Model override"}
                },
                "required": ["task"]
            }),
            ToolMode::BuildOnly,
            true,
            false,
        ));
    }

    if options.mcp_available {
        catalog.push(spec(
            USE_MCP_TOOL,
            "Call a tool exposed by a configured MCP server.",
            json!({
                "type": "object",
                "properties": {
                    "server_name": {"type": "string"},
                    "tool_name": {"type": "string"},
                    "arguments": {"type": "object"}
                },
                "required": ["server_name", "tool_name"]
            }),
            ToolMode::Any,
            true,
            true,
        ));
    }

    catalog.extend([
        spec(
            SUGGEST_PLAN,
            "Propose an implementation plan for user approval. Approval switches to build mode.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string", "description": "Markdown plan"}
                },
                "required": ["name", "description"]
            }),
            ToolMode::PlanOnly,
            false,
            false,
        ),
        spec(
            CREATE_TODO,
            "Add a task to the todo list.",
            json!({
                "type": "object",
                "properties": {"task": {"type": "string"}},
                "required": ["task"]
            }),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            UPDATE_TODO,
            "Update a todo's status (pending, in-progress, completed) or text.",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "status": {"type": "string", "enum": ["pending", "in-progress", "completed"]},
                    "task": {"type": "string"}
                },
                "required": ["id"]
            }),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            GET_TODO_LIST,
            "Show the todo list.",
            empty_schema(),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            GET_CURRENT_TASK,
            "Show the todo currently in progress.",
            empty_schema(),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            CLEAR_TODO,
            "Remove every todo.",
            empty_schema(),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            CREATE_NOTE,
            "Create a named note in the workspace.",
            note_schema(true),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            UPDATE_NOTE,
            "Replace the content of an existing note.",
            note_schema(true),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            DELETE_NOTE,
            "Delete a note.",
            note_schema(false),
            ToolMode::Any,
            false,
            true,
        ),
        spec(
            NAME_SESSION,
            "Give the current session a memorable name.",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
            ToolMode::Any,
            false,
            false,
        ),
        spec(
            CREATE_AGENT_DEFINITION,
            "Create or replace a reusable agent persona.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "system_prompt": {"type": "string"},
                    "model": {"type": "string"},
                    "temperature": {"type": "number"},
                    "max_tokens": {"type": "integer"},
                    "allowed_tools": {"type": "array", "items": {"type": "string"}},
                    "denied_tools": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["name", "system_prompt"]
            }),
            ToolMode::Any,
            false,
            false,
        ),
        spec(
            CREATE_CHECKPOINT,
            "Snapshot the workspace and conversation so they can be restored later.",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}}
            }),
            ToolMode::BuildOnly,
            false,
            false,
        ),
        spec(
            LIST_CHECKPOINTS,
            "List checkpoints of this conversation.",
            empty_schema(),
            ToolMode::Any,
            false,
            false,
        ),
    ]);

    for skill in skills {
        if catalog.iter().any(|tool| tool.name() == skill.name) {
            continue;
        }
        catalog.push(ToolSpec {
            definition: ToolDefinition {
                name: skill.name.clone(),
                description: skill.description.clone(),
                parameters: skill.parameters.clone(),
            },
            mode: ToolMode::BuildOnly,
            dangerous: false,
            sub_agent: true,
        });
    }

    catalog
}

/// Catalog restricted to tools a sub-agent may use.
#[must_use]
pub fn sub_agent_tools(catalog: &[ToolSpec]) -> Vec<ToolSpec> {
    catalog
        .iter()
        .filter(|tool| tool.sub_agent)
        .cloned()
        .collect()
}

fn spec(
    name: &str,
    description: &str,
    parameters: Value,
    mode: ToolMode,
    dangerous: bool,
    sub_agent: bool,
) -> ToolSpec {
    ToolSpec {
        definition: ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
        mode,
        dangerous,
        sub_agent,
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn pid_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"pid": {"type": "integer", "description": "Background PID"}},
        "required": ["pid"]
    })
}

fn note_schema(with_content: bool) -> Value {
    if with_content {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "content": {"type": "string"}},
            "required": ["name", "content"]
        })
    } else {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }
}
