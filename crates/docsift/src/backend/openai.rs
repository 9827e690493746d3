//! OpenAI chat-completions adapter (image backend).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};

use crate::core::config::{ModelProvider, RuntimeConfig};
use crate::error::{DocsiftError, Result};
use crate::schema::to_strict;

use super::{BackendRequest, BackendResponse, ContentPart, HTTP_CLIENT, ModelBackend};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter over the OpenAI chat completions endpoint with vision inputs.
#[derive(Debug)]
pub struct OpenAiBackend {
    api_key: String,
    model: String,
    base_url: String,
    request_timeout: Duration,
    tile_timeout: Duration,
}

impl OpenAiBackend {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Result<Self> {
        let api_key = runtime
            .openai_api_key
            .clone()
            .ok_or_else(|| DocsiftError::unconfigured(ModelProvider::OpenAi, "OPENAI_API_KEY is not set"))?;
        Ok(Self {
            api_key,
            model: runtime.openai_model.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: runtime.request_timeout,
            tile_timeout: runtime.tile_timeout,
        })
    }

    /// Construct against a non-default endpoint. Used by tests to point the
    /// adapter at a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &BackendRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": build_user_content(request.parts) }
            ],
        });

        body["response_format"] = match (request.enforce_schema, request.schema) {
            (true, Some(schema)) => json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format!("{}_extraction", request.doc_type.as_str().to_lowercase()),
                    "strict": true,
                    "schema": to_strict(schema),
                }
            }),
            _ => json!({ "type": "json_object" }),
        };

        body
    }
}

/// Render ordered content parts in the chat-completions user-message shape.
///
/// Shared with the Azure adapter, whose payload shape is identical.
pub(super) fn build_user_content(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "type": "text", "text": text }),
            ContentPart::ImageJpeg(data) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/jpeg;base64,{encoded}") }
                })
            }
        })
        .collect()
}

/// Parse a chat-completions response body into the extraction payload.
///
/// Shared with the Azure adapter, whose response shape is identical.
pub(super) fn parse_chat_completion(provider: ModelProvider, body: &Value) -> Result<BackendResponse> {
    let content = body["choices"][0]["message"]["content"].as_str().ok_or_else(|| {
        DocsiftError::parsing(format!(
            "{} response is missing choices[0].message.content",
            provider.as_str()
        ))
    })?;
    let data = super::parse_model_json(content)?;
    let response_id = body["id"].as_str().map(str::to_string);
    Ok(BackendResponse { data, response_id })
}

/// Shared POST + error mapping for chat-completions style endpoints.
pub(super) async fn post_chat_completion(
    provider: ModelProvider,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
    timeout: Duration,
) -> Result<Value> {
    let mut request = HTTP_CLIENT.post(url).timeout(timeout).json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| super::map_transport_error(provider, timeout, e))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(DocsiftError::transport(
            provider.as_str(),
            Some(status.as_u16()),
            super::truncate_for_log(&message, 500).to_string(),
        ));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| DocsiftError::parsing(format!("{} returned a non-JSON body: {e}", provider.as_str())))
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn provider(&self) -> ModelProvider {
        ModelProvider::OpenAi
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn extract(&self, request: BackendRequest<'_>) -> Result<BackendResponse> {
        let timeout = super::call_timeout(self.request_timeout, self.tile_timeout, request.use_tile_timeout);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let auth = format!("Bearer {}", self.api_key);
        let body = self.build_body(&request);

        tracing::debug!(
            provider = "openai",
            parts = request.parts.len(),
            enforce_schema = request.enforce_schema,
            "dispatching extraction call"
        );

        let response = post_chat_completion(
            ModelProvider::OpenAi,
            &url,
            &[("Authorization", auth.as_str())],
            &body,
            timeout,
        )
        .await?;
        parse_chat_completion(ModelProvider::OpenAi, &response)
    }
}
