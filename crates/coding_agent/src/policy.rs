//! Mode and persona filtering of the offered tool set.

use agent_provider::ToolDefinition;

use crate::agents::AgentDefinition;
use crate::catalog::{ToolMode, ToolSpec};
use crate::config::OperationMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// Both lists were set; the allow-list was applied.
    ConflictingLists { agent: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub tools: Vec<ToolSpec>,
    pub warning: Option<PolicyWarning>,
}

impl PolicyOutcome {
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    #[must_use]
    pub fn permits(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name() == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name() == name)
    }
}

/// Applies the mode step, then the agent allow/deny step. Order is preserved.
#[must_use]
pub fn filter_tools(
    tools: &[ToolSpec],
    mode: OperationMode,
    agent: Option<&AgentDefinition>,
) -> PolicyOutcome {
    let mode_filtered = tools.iter().filter(|tool| visible_in(tool.mode, mode));

    let Some(agent) = agent else {
        return PolicyOutcome {
            tools: mode_filtered.cloned().collect(),
            warning: None,
        };
    };

    let allowed = &agent.allowed_tools;
    let denied = &agent.denied_tools;
    let warning = (!allowed.is_empty() && !denied.is_empty()).then(|| {
        PolicyWarning::ConflictingLists {
            agent: agent.name.clone(),
        }
    });

    let tools = if !allowed.is_empty() {
        mode_filtered
            .filter(|tool| allowed.iter().any(|name| name == tool.name()))
            .cloned()
            .collect()
    } else if !denied.is_empty() {
        mode_filtered
            .filter(|tool| !denied.iter().any(|name| name == tool.name()))
            .cloned()
            .collect()
    } else {
        mode_filtered.cloned().collect()
    };

    PolicyOutcome { tools, warning }
}

fn visible_in(tool_mode: ToolMode, mode: OperationMode) -> bool {
    match (tool_mode, mode) {
        (ToolMode::Any, _) => true,
        (ToolMode::BuildOnly, OperationMode::Build) => true,
        (ToolMode::PlanOnly, OperationMode::Plan) => true,
        _ => false,
    }
}
