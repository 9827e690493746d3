//! Model back-end adapters.
//!
//! All adapters implement [`ModelBackend`]; they differ only in transport
//! (auth header shape, URL layout) and in whether they consume per-page
//! images or the original file bytes. The pipeline never branches on
//! backend identity beyond those two capabilities.

mod azure;
mod gemini;
mod openai;

pub use azure::AzureOpenAiBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::core::config::{ModelProvider, RuntimeConfig};
use crate::error::{DocsiftError, Result};
use crate::types::DocumentType;

/// One ordered element of a model request payload.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    /// JPEG image bytes, base64-encoded by the adapter.
    ImageJpeg(Vec<u8>),
}

/// A single extraction call.
#[derive(Debug)]
pub struct BackendRequest<'a> {
    /// Ordered text and image parts.
    pub parts: &'a [ContentPart],
    /// System-level prompt.
    pub instructions: &'a str,
    pub doc_type: DocumentType,
    /// Schema for structured output, when enforcement is requested.
    pub schema: Option<&'a Value>,
    pub enforce_schema: bool,
    /// Use the short per-tile deadline instead of the whole-document one.
    pub use_tile_timeout: bool,
}

/// Parsed model output.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub data: Value,
    pub response_id: Option<String>,
}

/// Adapter over one LLM provider.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn provider(&self) -> ModelProvider;

    /// Whether the backend accepts original file bytes (PDF included)
    /// directly, skipping rasterisation and tiling.
    fn consumes_native_pdf(&self) -> bool {
        false
    }

    /// Whether the backend supports server-side structured output.
    fn supports_structured_output(&self) -> bool {
        false
    }

    /// Run one extraction call over ordered content parts.
    async fn extract(&self, request: BackendRequest<'_>) -> Result<BackendResponse>;

    /// Run one extraction call over raw file bytes.
    ///
    /// Only meaningful for native-file back-ends; the default refuses.
    async fn extract_native(
        &self,
        _file: &[u8],
        _mime_type: &str,
        _instructions: &str,
        _schema: Option<&Value>,
    ) -> Result<BackendResponse> {
        Err(DocsiftError::Other(format!(
            "backend '{}' does not accept native file payloads",
            self.provider().as_str()
        )))
    }
}

/// Shared HTTP client for all adapters; reqwest clients are internally
/// pooled and safe for concurrent use.
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

static BACKENDS: Lazy<DashMap<ModelProvider, Arc<dyn ModelBackend>>> = Lazy::new(DashMap::new);

/// Resolve the singleton adapter for a provider, constructing it on first
/// use from the runtime configuration.
///
/// # Errors
///
/// [`DocsiftError::BackendUnconfigured`] when the provider's environment is
/// incomplete.
pub fn backend_for(provider: ModelProvider, runtime: &RuntimeConfig) -> Result<Arc<dyn ModelBackend>> {
    if let Some(existing) = BACKENDS.get(&provider) {
        return Ok(Arc::clone(&existing));
    }

    let backend: Arc<dyn ModelBackend> = match provider {
        ModelProvider::Gemini => Arc::new(GeminiBackend::from_runtime(runtime)?),
        ModelProvider::OpenAi => Arc::new(OpenAiBackend::from_runtime(runtime)?),
        ModelProvider::AzureOpenAi => Arc::new(AzureOpenAiBackend::from_runtime(runtime)?),
    };

    BACKENDS.insert(provider, Arc::clone(&backend));
    Ok(backend)
}

/// Pick the deadline for one call.
pub(crate) fn call_timeout(runtime_request: Duration, runtime_tile: Duration, use_tile_timeout: bool) -> Duration {
    if use_tile_timeout { runtime_tile } else { runtime_request }
}

/// Map a reqwest failure onto the pipeline error taxonomy.
pub(crate) fn map_transport_error(provider: ModelProvider, timeout: Duration, error: reqwest::Error) -> DocsiftError {
    if error.is_timeout() {
        DocsiftError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        DocsiftError::transport(provider.as_str(), error.status().map(|s| s.as_u16()), error.to_string())
    }
}

/// Interpret a model's text output as a JSON value.
///
/// Models frequently wrap their JSON in Markdown code fences or surround it
/// with prose; this peels fences first, then falls back to the outermost
/// `{...}` or `[...]` span.
pub(crate) fn parse_model_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = extract_fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(fenced)
    {
        return Ok(value);
    }

    if let Some(span) = extract_json_span(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(span)
    {
        return Ok(value);
    }

    Err(DocsiftError::parsing(format!(
        "model response is not valid JSON: {}",
        truncate_for_log(trimmed, 200)
    )))
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn extract_json_span(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let close_char = if text.as_bytes()[open] == b'{' { '}' } else { ']' };
    let close = text.rfind(close_char)?;
    if close <= open {
        return None;
    }
    Some(&text[open..=close])
}

fn truncate_for_log(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        let value = parse_model_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here you go:\n```json\n{\"drawdowns\": []}\n```\nDone.";
        let value = parse_model_json(text).unwrap();
        assert_eq!(value, json!({"drawdowns": []}));
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let text = "The extracted data is {\"total\": 5} as requested.";
        let value = parse_model_json(text).unwrap();
        assert_eq!(value, json!({"total": 5}));
    }

    #[test]
    fn test_parse_array_span() {
        let text = "rows: [1, 2, 3]";
        assert_eq!(parse_model_json(text).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_model_json("no json here").unwrap_err();
        assert!(matches!(err, DocsiftError::Parse { .. }));
    }

    #[test]
    fn test_call_timeout_selection() {
        let long = Duration::from_secs(300);
        let short = Duration::from_secs(60);
        assert_eq!(call_timeout(long, short, true), short);
        assert_eq!(call_timeout(long, short, false), long);
    }
}
