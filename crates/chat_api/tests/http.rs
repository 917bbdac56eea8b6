use chat_api::{normalize_chat_url, ChatApiClient, ChatApiConfig, ChatMessage, ChatRequest};

fn user_message(text: &str) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(text.to_string()),
        tool_calls: None,
        tool_call_id: None,
    }
}

#[test]
fn smoke_client_constructs_from_config() {
    let config = ChatApiConfig::new("sk-test").with_base_url("https://llm.internal/v1");
    let client = ChatApiClient::new(config).expect("client creation should succeed");

    assert_eq!(
        client.normalized_endpoint(),
        "https://llm.internal/v1/chat/completions"
    );
    assert_eq!(client.config().api_key, "sk-test");
}

#[test]
fn http_request_builds_chat_completions_endpoint() {
    let config = ChatApiConfig::new("sk-test").with_base_url("https://api.openai.com");
    let client = ChatApiClient::new(config).expect("client");
    let request = ChatRequest::new("gpt-test", vec![user_message("payload")]);

    let http_request = client
        .build_request(&request)
        .expect("build request")
        .build()
        .expect("request");

    assert_eq!(
        http_request.url().as_str(),
        normalize_chat_url("https://api.openai.com")
    );
    assert_eq!(http_request.method(), "POST");
    assert_eq!(
        http_request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok()),
        Some("Bearer sk-test")
    );
}

#[test]
fn http_request_body_never_requests_streaming() {
    let config = ChatApiConfig::new("sk-test");
    let client = ChatApiClient::new(config).expect("client");
    let mut request = ChatRequest::new("gpt-test", vec![user_message("payload")]);
    request.stream = true;

    let http_request = client
        .build_request(&request)
        .expect("build request")
        .build()
        .expect("request");
    let body = http_request
        .body()
        .and_then(|body| body.as_bytes())
        .expect("json body should be buffered");
    let value: serde_json::Value = serde_json::from_slice(body).expect("body is json");

    assert_eq!(value["stream"], serde_json::Value::Bool(false));
    assert_eq!(value["messages"][0]["content"], "payload");
}
