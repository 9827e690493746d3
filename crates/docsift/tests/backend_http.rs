//! HTTP round-trips for the backend adapters against a mock server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docsift::backend::{AzureOpenAiBackend, BackendRequest, ContentPart, GeminiBackend, ModelBackend, OpenAiBackend};
use docsift::types::DocumentType;
use docsift::{DocsiftError, RuntimeConfig};

fn openai_runtime() -> RuntimeConfig {
    RuntimeConfig {
        openai_api_key: Some("sk-test".to_string()),
        openai_model: "gpt-4o".to_string(),
        request_timeout: std::time::Duration::from_secs(5),
        tile_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    }
}

fn request_parts() -> Vec<ContentPart> {
    vec![
        ContentPart::Text("Extract data from this document section:".to_string()),
        ContentPart::ImageJpeg(vec![0xFF, 0xD8, 0xFF]),
    ]
}

fn backend_request<'a>(parts: &'a [ContentPart], schema: Option<&'a serde_json::Value>) -> BackendRequest<'a> {
    BackendRequest {
        parts,
        instructions: "You extract structured data.",
        doc_type: DocumentType::Drawdown,
        schema,
        enforce_schema: schema.is_some(),
        use_tile_timeout: true,
    }
}

#[tokio::test]
async fn openai_sends_bearer_auth_and_parses_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [ { "message": { "content": "{\"drawdowns\": [{\"invoiceNumber\": \"FV1\"}]}" } } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::from_runtime(&openai_runtime())
        .unwrap()
        .with_base_url(server.uri());
    let parts = request_parts();
    let response = backend.extract(backend_request(&parts, None)).await.unwrap();

    assert_eq!(response.data["drawdowns"][0]["invoiceNumber"], "FV1");
    assert_eq!(response.response_id.as_deref(), Some("chatcmpl-1"));
}

#[tokio::test]
async fn openai_strict_schema_in_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "response_format": { "type": "json_schema", "json_schema": { "strict": true } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "content": "{}" } } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::from_runtime(&openai_runtime())
        .unwrap()
        .with_base_url(server.uri());
    let schema = json!({ "type": "object", "properties": { "totalSum": { "type": "number" } } });
    let parts = request_parts();
    backend.extract(backend_request(&parts, Some(&schema))).await.unwrap();
}

#[tokio::test]
async fn openai_500_maps_to_retryable_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::from_runtime(&openai_runtime())
        .unwrap()
        .with_base_url(server.uri());
    let parts = request_parts();
    let error = backend.extract(backend_request(&parts, None)).await.unwrap_err();

    assert!(error.is_retryable());
    match &error {
        DocsiftError::Transport { provider, status, .. } => {
            assert_eq!(provider, "openai");
            assert_eq!(*status, Some(500));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_non_json_content_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "content": "sorry, I cannot do that" } } ]
        })))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::from_runtime(&openai_runtime())
        .unwrap()
        .with_base_url(server.uri());
    let parts = request_parts();
    let error = backend.extract(backend_request(&parts, None)).await.unwrap_err();

    assert!(matches!(error, DocsiftError::Parse { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn azure_uses_api_key_header_and_deployment_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/extraction-4o/chat/completions"))
        .and(query_param("api-version", "2024-08-01-preview"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "azure-1",
            "choices": [ { "message": { "content": "{\"ok\": true}" } } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = RuntimeConfig {
        azure_openai_endpoint: Some(server.uri()),
        azure_openai_api_key: Some("azure-key".to_string()),
        azure_openai_deployment: Some("extraction-4o".to_string()),
        azure_openai_api_version: "2024-08-01-preview".to_string(),
        request_timeout: std::time::Duration::from_secs(5),
        tile_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    };
    let backend = AzureOpenAiBackend::from_runtime(&runtime).unwrap();
    let parts = request_parts();
    let response = backend.extract(backend_request(&parts, None)).await.unwrap();

    assert_eq!(response.data["ok"], true);
    assert_eq!(response.response_id.as_deref(), Some("azure-1"));
}

#[tokio::test]
async fn gemini_native_sends_inline_pdf_and_parses_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gemini-2.0-flash:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_partial_json(json!({
            "generationConfig": { "responseMimeType": "application/json" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseId": "gem-1",
            "candidates": [
                { "content": { "parts": [ { "text": "```json\n{\"totalSum\": 42.0}\n```" } ] } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = RuntimeConfig {
        gemini_api_key: Some("g-key".to_string()),
        gemini_model: "gemini-2.0-flash".to_string(),
        request_timeout: std::time::Duration::from_secs(5),
        tile_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    };
    let backend = GeminiBackend::from_runtime(&runtime).unwrap().with_base_url(server.uri());

    let schema = json!({ "type": "object" });
    let response = backend
        .extract_native(b"%PDF-1.4 fake", "application/pdf", "Extract the data.", Some(&schema))
        .await
        .unwrap();

    assert_eq!(response.data["totalSum"], 42.0);
    assert_eq!(response.response_id.as_deref(), Some("gem-1"));
}

#[tokio::test]
async fn gemini_transport_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let runtime = RuntimeConfig {
        gemini_api_key: Some("g-key".to_string()),
        gemini_model: "gemini-2.0-flash".to_string(),
        request_timeout: std::time::Duration::from_secs(5),
        tile_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    };
    let backend = GeminiBackend::from_runtime(&runtime).unwrap().with_base_url(server.uri());
    let parts = request_parts();
    let error = backend.extract(backend_request(&parts, None)).await.unwrap_err();

    match error {
        DocsiftError::Transport { status, message, .. } => {
            assert_eq!(status, Some(429));
            assert!(message.contains("quota"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn unconfigured_backend_construction_fails() {
    let error = OpenAiBackend::from_runtime(&RuntimeConfig::default()).unwrap_err();
    assert!(matches!(error, DocsiftError::BackendUnconfigured { .. }));
    assert_eq!(error.kind(), "BackendUnconfigured");

    let error = GeminiBackend::from_runtime(&RuntimeConfig::default()).unwrap_err();
    assert!(error.to_string().contains("GEMINI_API_KEY"));
}
