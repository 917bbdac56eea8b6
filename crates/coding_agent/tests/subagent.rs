mod support;

use std::sync::Arc;

use agent_provider::ToolCall;
use agent_provider_mock::{text_turn, tool_call_turn, ScriptedCompletionService};
use assert_matches::assert_matches;
use coding_agent::agents::AgentDefinition;
use coding_agent::config::{ExecutionMode, OperationMode};
use coding_agent::conversation::SpawnContext;
use coding_agent::subagent::{SubAgentError, SubAgentRequest, MAX_SUB_AGENT_ITERATIONS};
use pretty_assertions::assert_eq;
use support::{test_config, FakeSnapshotStore, Harness, ScriptedGate};

fn build_context() -> SpawnContext {
    SpawnContext {
        operation_mode: OperationMode::Build,
        execution_mode: ExecutionMode::Yolo,
    }
}

fn harness_with(service: ScriptedCompletionService) -> Harness {
    Harness::with_parts(
        service,
        test_config(),
        FakeSnapshotStore::default(),
        Arc::new(ScriptedGate::default()),
    )
}

#[test]
fn sub_agent_returns_its_final_answer() {
    let harness = Harness::new([
        tool_call_turn(
            vec![ToolCall::new("c1", "create_todo", r#"{"task":"inspect"}"#)],
            3,
        ),
        text_turn("  Found two issues.  ", 4),
    ]);

    let result = harness
        .dispatcher
        .spawn_sub_agent(&SubAgentRequest::new("audit the repo"), &build_context())
        .expect("sub-agent should finish");

    assert_eq!(result, "Found two issues.");
    let requests = harness.service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[0].messages[1].text_content(), "audit the repo");
    // Sub-agents never checkpoint.
    assert!(harness.snapshots.commits().is_empty());
}

#[test]
fn sub_agents_are_never_offered_spawn_agent() {
    let harness = Harness::new([text_turn("done", 1)]);

    harness
        .dispatcher
        .spawn_sub_agent(&SubAgentRequest::new("look around"), &build_context())
        .expect("sub-agent should finish");

    let offered = &harness.service.requests()[0].tool_names;
    assert!(offered.iter().any(|name| name == "execute_command"));
    assert!(!offered.iter().any(|name| name == "spawn_agent"));
    assert!(!offered.iter().any(|name| name == "name_session"));
    assert!(!offered.iter().any(|name| name == "create_checkpoint"));
}

#[test]
fn sub_agent_stops_at_the_iteration_cap() {
    let service = ScriptedCompletionService::new().with_responder(|_messages, _tools| {
        Ok(tool_call_turn(
            vec![ToolCall::new("again", "get_todo_list", "{}")],
            1,
        ))
    });
    let harness = harness_with(service);

    let error = harness
        .dispatcher
        .spawn_sub_agent(&SubAgentRequest::new("never finish"), &build_context())
        .expect_err("endless tool calls should hit the cap");

    assert_matches!(error, SubAgentError::IterationLimit(limit) if limit == MAX_SUB_AGENT_ITERATIONS);
    assert_eq!(harness.service.request_count(), MAX_SUB_AGENT_ITERATIONS);
}

#[test]
fn empty_final_answer_is_an_error() {
    let harness = Harness::new([text_turn("   ", 1)]);

    let error = harness
        .dispatcher
        .spawn_sub_agent(&SubAgentRequest::new("say nothing"), &build_context())
        .expect_err("empty answer");

    assert_matches!(error, SubAgentError::NoResult);
}

#[test]
fn unknown_definitions_are_rejected_before_any_request() {
    let harness = Harness::new([text_turn("unused", 1)]);
    let mut request = SubAgentRequest::new("review");
    request.agent = Some("ghost".to_string());

    let error = harness
        .dispatcher
        .spawn_sub_agent(&request, &build_context())
        .expect_err("unknown agent");

    assert_matches!(error, SubAgentError::UnknownAgent { ref name } if name == "ghost");
    assert_eq!(harness.service.request_count(), 0);
}

#[test]
fn named_definition_sets_prompt_policy_and_model() {
    let harness = Harness::new([text_turn("reviewed", 1)]);
    harness
        .dispatcher
        .agents()
        .save(
            AgentDefinition::new("reviewer", "Review changes carefully.")
                .with_allowed_tools(["get_todo_list", "create_note"])
                .with_model("definition-model"),
        )
        .expect("save definition");

    let request = SubAgentRequest {
        task: "review the diff".to_string(),
        agent: Some("reviewer".to_string()),
        model: Some("override-model".to_string()),
    };
    harness
        .dispatcher
        .spawn_sub_agent(&request, &build_context())
        .expect("sub-agent should finish");

    let recorded = &harness.service.requests()[0];
    let system = recorded.messages[0].text_content();
    assert!(
        system.contains("=== Task-Specific Agent: reviewer ===\nReview changes carefully."),
        "{system}"
    );
    assert_eq!(
        recorded.tool_names,
        vec!["get_todo_list".to_string(), "create_note".to_string()]
    );
    assert_eq!(recorded.sampling.model, "override-model");
}

#[test]
fn sub_agents_inherit_plan_mode() {
    let harness = Harness::new([text_turn("planned", 1)]);
    let context = SpawnContext {
        operation_mode: OperationMode::Plan,
        execution_mode: ExecutionMode::Ask,
    };

    harness
        .dispatcher
        .spawn_sub_agent(&SubAgentRequest::new("sketch a plan"), &context)
        .expect("sub-agent should finish");

    let offered = &harness.service.requests()[0].tool_names;
    assert!(!offered.iter().any(|name| name == "execute_command"));
    assert!(offered.iter().any(|name| name == "get_todo_list"));
}
