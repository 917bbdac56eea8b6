use std::path::Path;

use crate::agents::AgentDefinition;

pub const BASE_SYSTEM_PROMPT: &str = "You are an autonomous coding agent working inside the user's workspace. \
Use the provided tools to inspect and change the workspace, run commands, and track your work with todos. \
In plan mode you may only read and propose a plan with suggest_plan; in build mode you implement it. \
Keep answers short and report what you changed.";

pub const SUB_AGENT_SYSTEM_PROMPT: &str = "You are a sub-agent spawned to complete one focused task. \
Work independently with the tools you are given and finish with a concise final answer describing the result. \
You cannot spawn further agents.";

/// Base prompt for a root conversation: configured override or the built-in text, plus host facts.
#[must_use]
pub fn root_system_prompt(
    configured: Option<&str>,
    agent: Option<&AgentDefinition>,
    workspace: &Path,
) -> String {
    let base = configured
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or(BASE_SYSTEM_PROMPT);
    compose(base, agent, workspace)
}

#[must_use]
pub fn sub_agent_system_prompt(agent: Option<&AgentDefinition>, workspace: &Path) -> String {
    compose(SUB_AGENT_SYSTEM_PROMPT, agent, workspace)
}

#[must_use]
pub fn agent_section(agent: &AgentDefinition) -> String {
    format!(
        "=== Task-Specific Agent: {} ===\n{}",
        agent.name, agent.system_prompt
    )
}

fn compose(base: &str, agent: Option<&AgentDefinition>, workspace: &Path) -> String {
    let mut prompt = format!("{base}\n\n{}", system_info(workspace));
    if let Some(agent) = agent {
        prompt.push_str("\n\n");
        prompt.push_str(&agent_section(agent));
    }
    prompt
}

fn system_info(workspace: &Path) -> String {
    let mut info = format!(
        "System information:\n- OS: {}\n- Architecture: {}\n- Working directory: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        workspace.display()
    );
    if let Ok(now) = session_store::now_rfc3339() {
        info.push_str(&format!("\n- Current time: {now}"));
    }
    info
}
