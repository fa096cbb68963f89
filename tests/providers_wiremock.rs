//! Provider adapters and the router against mocked upstream APIs.

use chatrelay::app::config::{HealthConfig, ProviderConfig, ProvidersConfig};
use chatrelay::error::{Error, ProviderError};
use chatrelay::models::{build_provider, ChatMessage, ProviderKind, ProviderSlot, ResponseRouter};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_config(kind: ProviderKind, model: &str, server: &MockServer) -> ProviderConfig {
    let mut config = match kind {
        ProviderKind::Anthropic => ProviderConfig::fallback_default(),
        _ => ProviderConfig::primary_default(),
    };
    config.kind = kind;
    config.model = model.to_string();
    config.base_url = Some(server.uri());
    config.api_key = Some("test-key".to_string());
    config.system_prompt = None;
    config
}

fn openai_reply(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_openai_send_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{ "role": "user", "content": "Hello!" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("Hello from mock API!")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider =
        build_provider(&provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server)).unwrap();
    let reply = provider.send_message(&[ChatMessage::user("Hello!")]).await.unwrap();

    assert_eq!(reply, "Hello from mock API!");
}

#[tokio::test]
async fn test_openai_system_prompt_is_first_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Hi" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("Hi.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server);
    config.system_prompt = Some("Be brief.".to_string());
    let provider = build_provider(&config).unwrap();

    assert_eq!(provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap(), "Hi.");
}

#[tokio::test]
async fn test_anthropic_send_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "text", "text": "there" }
            ],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = build_provider(&provider_config(
        ProviderKind::Anthropic,
        "claude-3-5-haiku-latest",
        &mock_server,
    ))
    .unwrap();
    let reply = provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap();

    assert_eq!(reply, "Hello there");
}

#[tokio::test]
async fn test_gemini_send_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "Hi" }] },
                { "role": "model", "parts": [{ "text": "Hello" }] },
                { "role": "user", "parts": [{ "text": "How are you?" }] }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Fine, thanks." }] }
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider =
        build_provider(&provider_config(ProviderKind::Gemini, "gemini-1.5-flash", &mock_server)).unwrap();
    let reply = provider
        .send_message(&[
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("How are you?"),
        ])
        .await
        .unwrap();

    assert_eq!(reply, "Fine, thanks.");
}

async fn error_for_status(status: u16) -> ProviderError {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&mock_server)
        .await;

    let provider =
        build_provider(&provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server)).unwrap();
    provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap_err()
}

#[tokio::test]
async fn test_status_codes_map_to_provider_errors() {
    let err = error_for_status(401).await;
    assert!(matches!(err, ProviderError::Authentication { status: 401, .. }), "{:?}", err);
    assert_eq!(err.provider(), "openai");

    let err = error_for_status(429).await;
    assert!(matches!(err, ProviderError::RateLimited { .. }), "{:?}", err);

    let err = error_for_status(503).await;
    match err {
        ProviderError::Upstream { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "nope");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&mock_server)
        .await;

    let provider =
        build_provider(&provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server)).unwrap();
    let err = provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap_err();

    assert!(matches!(err, ProviderError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(openai_reply("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut config = provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server);
    config.timeout_seconds = 1;
    let provider = build_provider(&config).unwrap();

    let err = provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { timeout_ms: 1000, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_missing_api_key_fails_without_a_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply("unused")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &mock_server);
    config.api_key = None;
    config.api_key_env = Some("CHATRELAY_TEST_KEY_THAT_IS_NEVER_SET".to_string());
    let provider = build_provider(&config).unwrap();

    let err = provider.send_message(&[ChatMessage::user("Hi")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Configuration { .. }));
}

#[tokio::test]
async fn test_health_probe_uses_probe_model() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({ "model": "claude-probe", "max_tokens": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": [] })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = provider_config(ProviderKind::Anthropic, "claude-3-5-sonnet-latest", &mock_server);
    config.probe_model = Some("claude-probe".to_string());
    let provider = build_provider(&config).unwrap();

    provider.health_check().await.unwrap();
}

#[tokio::test]
async fn test_router_falls_back_between_real_adapters() {
    let primary_server = MockServer::start().await;
    let fallback_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(1)
        .mount(&primary_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": "fallback answer" }]
        })))
        .expect(2)
        .mount(&fallback_server)
        .await;

    let providers = ProvidersConfig {
        primary: provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &primary_server),
        fallback: provider_config(ProviderKind::Anthropic, "claude-3-5-haiku-latest", &fallback_server),
        accept_empty_responses: false,
    };
    let router = ResponseRouter::from_config(&providers, &HealthConfig::default()).unwrap();

    let reply = router.get_response(&[ChatMessage::user("Hi")]).await.unwrap();
    assert_eq!(reply.content, "fallback answer");
    assert_eq!(reply.slot, ProviderSlot::Secondary);
    assert_eq!(reply.attempts, 2);

    // Primary is now cached as unhealthy, so it is skipped.
    let reply = router.get_response(&[ChatMessage::user("Again")]).await.unwrap();
    assert_eq!(reply.slot, ProviderSlot::Secondary);
    assert_eq!(reply.attempts, 1);
}

#[tokio::test]
async fn test_router_reports_both_failures() {
    let primary_server = MockServer::start().await;
    let fallback_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .expect(1)
        .mount(&primary_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&fallback_server)
        .await;

    let providers = ProvidersConfig {
        primary: provider_config(ProviderKind::OpenAI, "gpt-4o-mini", &primary_server),
        fallback: provider_config(ProviderKind::Gemini, "gemini-1.5-flash", &fallback_server),
        accept_empty_responses: false,
    };
    let router = ResponseRouter::from_config(&providers, &HealthConfig::default()).unwrap();

    match router.get_response(&[ChatMessage::user("Hi")]).await.unwrap_err() {
        Error::AllProvidersFailed { failures } => {
            assert_eq!(failures.len(), 2);
            assert!(matches!(failures[0].error, ProviderError::Upstream { status: 500, .. }));
            assert!(matches!(failures[1].error, ProviderError::RateLimited { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
}
