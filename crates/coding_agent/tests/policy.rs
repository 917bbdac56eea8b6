use coding_agent::agents::AgentDefinition;
use coding_agent::catalog::{build_catalog, CatalogOptions, ToolSpec};
use coding_agent::config::OperationMode;
use coding_agent::policy::{filter_tools, PolicyWarning};
use pretty_assertions::assert_eq;

fn catalog() -> Vec<ToolSpec> {
    build_catalog(
        CatalogOptions {
            subagents_enabled: true,
            mcp_available: true,
        },
        &[],
    )
}

fn names(tools: &[ToolSpec]) -> Vec<String> {
    tools.iter().map(|tool| tool.name().to_string()).collect()
}

#[test]
fn without_an_agent_only_the_mode_step_applies() {
    let catalog = catalog();

    let build = filter_tools(&catalog, OperationMode::Build, None);
    let plan = filter_tools(&catalog, OperationMode::Plan, None);

    assert!(build.permits("execute_command"));
    assert!(build.permits("create_checkpoint"));
    assert!(!build.permits("suggest_plan"));
    assert!(plan.permits("suggest_plan"));
    assert!(plan.permits("use_mcp_tool"));
    assert!(!plan.permits("execute_command"));
    assert!(!plan.permits("spawn_agent"));
    assert!(!plan.permits("kill_background_command"));
    assert_eq!(build.warning, None);
}

#[test]
fn allow_list_keeps_only_named_tools_in_catalog_order() {
    let agent = AgentDefinition::new("reader", "Read only.")
        .with_allowed_tools(["get_background_logs", "create_note", "does_not_exist"]);

    let outcome = filter_tools(&catalog(), OperationMode::Build, Some(&agent));

    assert_eq!(
        names(&outcome.tools),
        vec!["get_background_logs".to_string(), "create_note".to_string()]
    );
    assert_eq!(outcome.warning, None);
}

#[test]
fn deny_list_drops_named_tools() {
    let catalog = catalog();
    let agent =
        AgentDefinition::new("careful", "No shell.").with_denied_tools(["execute_command"]);

    let outcome = filter_tools(&catalog, OperationMode::Build, Some(&agent));
    let unrestricted = filter_tools(&catalog, OperationMode::Build, None);

    assert!(!outcome.permits("execute_command"));
    assert_eq!(outcome.tools.len(), unrestricted.tools.len() - 1);
}

#[test]
fn allow_list_wins_over_deny_list_with_a_warning() {
    let agent = AgentDefinition::new("confused", "Both lists.")
        .with_allowed_tools(["execute_command"])
        .with_denied_tools(["execute_command"]);

    let outcome = filter_tools(&catalog(), OperationMode::Build, Some(&agent));

    assert_eq!(names(&outcome.tools), vec!["execute_command".to_string()]);
    assert_eq!(
        outcome.warning,
        Some(PolicyWarning::ConflictingLists {
            agent: "confused".to_string()
        })
    );
}

#[test]
fn mode_step_applies_before_the_allow_list() {
    let agent = AgentDefinition::new("shell", "Shell only.")
        .with_allowed_tools(["execute_command", "suggest_plan"]);

    let outcome = filter_tools(&catalog(), OperationMode::Plan, Some(&agent));

    assert_eq!(names(&outcome.tools), vec!["suggest_plan".to_string()]);
}
