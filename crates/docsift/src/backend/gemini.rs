//! Gemini adapter (native-file backend).
//!
//! Accepts ordered content parts like the other adapters and additionally
//! whole files (PDF included) as inline data, which lets the pipeline skip
//! rasterisation and tiling entirely. Gemini has no strict structured
//! output here; the schema is embedded into the prompt text instead.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};

use crate::core::config::{ModelProvider, RuntimeConfig};
use crate::error::{DocsiftError, Result};

use super::{BackendRequest, BackendResponse, ContentPart, HTTP_CLIENT, ModelBackend};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug)]
pub struct GeminiBackend {
    api_key: String,
    model: String,
    base_url: String,
    request_timeout: Duration,
    tile_timeout: Duration,
}

impl GeminiBackend {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Result<Self> {
        let api_key = runtime
            .gemini_api_key
            .clone()
            .ok_or_else(|| DocsiftError::unconfigured(ModelProvider::Gemini, "GEMINI_API_KEY is not set"))?;
        Ok(Self {
            api_key,
            model: runtime.gemini_model.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: runtime.request_timeout,
            tile_timeout: runtime.tile_timeout,
        })
    }

    /// Point the adapter at a non-default endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }

    fn build_body(instructions: &str, parts: Vec<Value>) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": instructions }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" }
        })
    }

    async fn call(&self, body: &Value, timeout: Duration) -> Result<BackendResponse> {
        let response = HTTP_CLIENT
            .post(self.url())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| super::map_transport_error(ModelProvider::Gemini, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DocsiftError::transport(
                ModelProvider::Gemini.as_str(),
                Some(status.as_u16()),
                super::truncate_for_log(&message, 500).to_string(),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DocsiftError::parsing(format!("gemini returned a non-JSON body: {e}")))?;
        parse_generate_content(&body)
    }
}

fn parse_generate_content(body: &Value) -> Result<BackendResponse> {
    let text = body["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| DocsiftError::parsing("gemini response is missing candidates[0].content.parts[0].text"))?;
    let data = super::parse_model_json(text)?;
    let response_id = body["responseId"].as_str().map(str::to_string);
    Ok(BackendResponse { data, response_id })
}

fn inline_data_part(mime_type: &str, data: &[u8]) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        }
    })
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn provider(&self) -> ModelProvider {
        ModelProvider::Gemini
    }

    fn consumes_native_pdf(&self) -> bool {
        true
    }

    async fn extract(&self, request: BackendRequest<'_>) -> Result<BackendResponse> {
        let timeout = super::call_timeout(self.request_timeout, self.tile_timeout, request.use_tile_timeout);

        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "text": text }),
                ContentPart::ImageJpeg(data) => inline_data_part("image/jpeg", data),
            })
            .collect();

        tracing::debug!(provider = "gemini", parts = parts.len(), "dispatching extraction call");

        let body = Self::build_body(request.instructions, parts);
        self.call(&body, timeout).await
    }

    async fn extract_native(
        &self,
        file: &[u8],
        mime_type: &str,
        instructions: &str,
        schema: Option<&Value>,
    ) -> Result<BackendResponse> {
        let mut prompt = "Extract the structured data from the attached document.".to_string();
        if let Some(schema) = schema {
            prompt.push_str("\n\nReturn a JSON object adhering to this schema:\n");
            prompt.push_str(&serde_json::to_string_pretty(schema)?);
        }

        let parts = vec![json!({ "text": prompt }), inline_data_part(mime_type, file)];

        tracing::debug!(
            provider = "gemini",
            mime_type,
            bytes = file.len(),
            "dispatching native-file extraction call"
        );

        let body = Self::build_body(instructions, parts);
        self.call(&body, self.request_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GeminiBackend {
        GeminiBackend {
            api_key: "k".to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            tile_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_url_contains_model_and_key() {
        let url = backend().url();
        assert!(url.contains("/gemini-2.0-flash:generateContent"));
        assert!(url.ends_with("key=k"));
    }

    #[test]
    fn test_parse_generate_content() {
        let body = json!({
            "responseId": "resp-1",
            "candidates": [
                { "content": { "parts": [ { "text": "{\"totalSum\": 3.5}" } ] } }
            ]
        });
        let parsed = parse_generate_content(&body).unwrap();
        assert_eq!(parsed.data["totalSum"], 3.5);
        assert_eq!(parsed.response_id.as_deref(), Some("resp-1"));
    }

    #[test]
    fn test_parse_generate_content_empty_candidates() {
        let body = json!({ "candidates": [] });
        assert!(parse_generate_content(&body).is_err());
    }

    #[test]
    fn test_inline_data_part_encodes_base64() {
        let part = inline_data_part("application/pdf", b"%PDF");
        assert_eq!(part["inlineData"]["mimeType"], "application/pdf");
        assert_eq!(
            part["inlineData"]["data"],
            base64::engine::general_purpose::STANDARD.encode(b"%PDF")
        );
    }
}
