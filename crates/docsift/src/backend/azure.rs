//! Azure OpenAI adapter.
//!
//! Identical request/response shape to the OpenAI adapter; only the
//! transport differs: `api-key` header instead of `Authorization`, and a
//! deployment-scoped URL with an `api-version` query parameter.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::core::config::{ModelProvider, RuntimeConfig};
use crate::error::{DocsiftError, Result};
use crate::schema::to_strict;

use super::openai::{build_user_content, parse_chat_completion, post_chat_completion};
use super::{BackendRequest, BackendResponse, ModelBackend};

#[derive(Debug)]
pub struct AzureOpenAiBackend {
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    request_timeout: Duration,
    tile_timeout: Duration,
}

impl AzureOpenAiBackend {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Result<Self> {
        let missing = |name: &str| DocsiftError::unconfigured(ModelProvider::AzureOpenAi, format!("{name} is not set"));
        Ok(Self {
            endpoint: runtime
                .azure_openai_endpoint
                .clone()
                .ok_or_else(|| missing("AZURE_OPENAI_ENDPOINT"))?,
            api_key: runtime
                .azure_openai_api_key
                .clone()
                .ok_or_else(|| missing("AZURE_OPENAI_API_KEY"))?,
            deployment: runtime
                .azure_openai_deployment
                .clone()
                .ok_or_else(|| missing("AZURE_OPENAI_DEPLOYMENT"))?,
            api_version: runtime.azure_openai_api_version.clone(),
            request_timeout: runtime.request_timeout,
            tile_timeout: runtime.tile_timeout,
        })
    }

    /// Point the adapter at a non-default endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

#[async_trait]
impl ModelBackend for AzureOpenAiBackend {
    fn provider(&self) -> ModelProvider {
        ModelProvider::AzureOpenAi
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn extract(&self, request: BackendRequest<'_>) -> Result<BackendResponse> {
        let timeout = super::call_timeout(self.request_timeout, self.tile_timeout, request.use_tile_timeout);

        let mut body = json!({
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

        tracing::debug!(
            provider = "azure-openai",
            deployment = %self.deployment,
            parts = request.parts.len(),
            "dispatching extraction call"
        );

        let response = post_chat_completion(
            ModelProvider::AzureOpenAi,
            &self.url(),
            &[("api-key", self.api_key.as_str())],
            &body,
            timeout,
        )
        .await?;
        parse_chat_completion(ModelProvider::AzureOpenAi, &response)
    }
}
