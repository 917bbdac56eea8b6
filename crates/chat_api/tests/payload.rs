use chat_api::{ChatMessage, ChatRequest, ChatResponse, ChatToolSpec};
use serde_json::{json, Value};

fn user_message(text: &str) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(text.to_string()),
        tool_calls: None,
        tool_call_id: None,
    }
}

#[test]
fn payload_serialization_omits_unset_optional_fields() {
    let request = ChatRequest::new("gpt-test", vec![user_message("hi")]);
    let body = serde_json::to_value(&request).expect("serialize payload");

    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["stream"], Value::Bool(false));
    assert!(body.get("tools").is_none());
    assert!(body.get("tool_choice").is_none());
    assert!(body.get("temperature").is_none());
    assert!(body.get("max_tokens").is_none());
}

#[test]
fn payload_with_tools_sets_auto_tool_choice() {
    let request = ChatRequest::new("gpt-test", vec![user_message("hi")])
        .with_tools(vec![ChatToolSpec::function(
            "execute_command",
            "Run a shell command",
            json!({"type": "object", "properties": {"command": {"type": "string"}}}),
        )])
        .with_sampling(0.1, 1000);

    let body = serde_json::to_value(&request).expect("serialize payload");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "execute_command");
    assert_eq!(body["max_tokens"], 1000);
}

#[test]
fn response_parses_tool_calls_and_usage() {
    let body = json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    {"id": "call_a", "type": "function", "function": {"name": "get_todo_list", "arguments": "{}"}},
                    {"id": "call_b", "type": "function", "function": {"name": "execute_command", "arguments": "{\"command\":\"ls\"}"}}
                ]
            }
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
    });

    let response: ChatResponse = serde_json::from_value(body).expect("response should parse");
    let message = &response.choices[0].message;
    let calls = message.tool_calls.as_ref().expect("tool calls");

    assert_eq!(message.content, None);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].id, "call_a");
    assert_eq!(calls[1].function.name, "execute_command");
    assert_eq!(response.usage.map(|usage| usage.total_tokens), Some(20));
}

#[test]
fn response_tolerates_missing_usage() {
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": "hello"}}]
    });

    let response: ChatResponse = serde_json::from_value(body).expect("response should parse");
    assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    assert!(response.usage.is_none());
}
