use reqwest::StatusCode;

use chat_api::error::parse_error_message;
use chat_api::ChatApiError;

#[test]
fn parse_error_message_includes_code_when_present() {
    let body = r#"{"error":{"code":"model_not_found","message":"The model does not exist","type":"invalid_request_error"}}"#;
    let message = parse_error_message(StatusCode::NOT_FOUND, body);
    assert_eq!(message, "The model does not exist (model_not_found)");
}

#[test]
fn parse_error_message_uses_type_without_code() {
    let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
    let message = parse_error_message(StatusCode::TOO_MANY_REQUESTS, body);
    assert_eq!(message, "Rate limit reached (requests)");
}

#[test]
fn parse_error_message_falls_back_to_raw_body() {
    let body = "raw failure text";
    let message = parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, body);
    assert_eq!(message, "raw failure text");
}

#[test]
fn parse_error_message_uses_reason_for_empty_body() {
    let message = parse_error_message(StatusCode::BAD_GATEWAY, "");
    assert_eq!(message, "Bad Gateway");
}

#[test]
fn retry_exhausted_display_reports_status_and_last_error() {
    let error = ChatApiError::RetryExhausted {
        status: Some(StatusCode::SERVICE_UNAVAILABLE),
        last_error: Some("overloaded".to_string()),
    };
    let rendered = error.to_string();
    assert!(rendered.contains("status: 503"), "{rendered}");
    assert!(rendered.contains("overloaded"), "{rendered}");
}
