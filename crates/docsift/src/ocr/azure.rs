//! Azure Computer Vision Read API client.
//!
//! The Read API is asynchronous: a submit call returns `202 Accepted` with
//! an `Operation-Location` header, which is then polled until the analysis
//! reaches a terminal state.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::HTTP_CLIENT;
use crate::error::{DocsiftError, Result};
use crate::types::OcrArtifact;

use super::OcrEngine;

const READ_PATH: &str = "vision/v3.2/read/analyze";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AzureReadEngine {
    endpoint: String,
    key: String,
    submit_timeout: Duration,
    /// Overall budget for polling one page to completion.
    poll_budget: Duration,
}

impl AzureReadEngine {
    pub fn new(endpoint: String, key: String) -> Self {
        Self {
            endpoint,
            key,
            submit_timeout: Duration::from_secs(30),
            poll_budget: Duration::from_secs(60),
        }
    }

    fn analyze_url(&self, language: Option<&str>) -> String {
        let base = format!("{}/{READ_PATH}", self.endpoint.trim_end_matches('/'));
        match language {
            Some(language) => format!("{base}?language={language}"),
            None => base,
        }
    }

    async fn submit(&self, image: &[u8], language: Option<&str>) -> Result<String> {
        let response = HTTP_CLIENT
            .post(self.analyze_url(language))
            .timeout(self.submit_timeout)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DocsiftError::Timeout {
                        seconds: self.submit_timeout.as_secs(),
                    }
                } else {
                    DocsiftError::transport("azure-ocr", e.status().map(|s| s.as_u16()), e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() != 202 {
            let message = response.text().await.unwrap_or_default();
            return Err(DocsiftError::transport("azure-ocr", Some(status.as_u16()), message));
        }

        response
            .headers()
            .get("Operation-Location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DocsiftError::parsing("azure-ocr accepted the request without an Operation-Location"))
    }

    async fn poll(&self, operation_url: &str) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + self.poll_budget;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(DocsiftError::Timeout {
                    seconds: self.poll_budget.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = HTTP_CLIENT
                .get(operation_url)
                .timeout(self.submit_timeout)
                .header("Ocp-Apim-Subscription-Key", &self.key)
                .send()
                .await
                .map_err(|e| DocsiftError::transport("azure-ocr", e.status().map(|s| s.as_u16()), e.to_string()))?;

            let body: Value = response
                .json()
                .await
                .map_err(|e| DocsiftError::parsing(format!("azure-ocr poll returned a non-JSON body: {e}")))?;

            match body["status"].as_str() {
                Some("succeeded") => return Ok(body),
                Some("failed") => {
                    return Err(DocsiftError::transport(
                        "azure-ocr",
                        None,
                        format!("analysis failed: {}", body["error"]["message"].as_str().unwrap_or("unknown")),
                    ));
                }
                // "notStarted" / "running"
                _ => continue,
            }
        }
    }
}

/// Flatten an analyze result into text, mean word confidence and word count.
fn collect_artifact(body: &Value) -> OcrArtifact {
    let mut lines = Vec::new();
    let mut confidence_sum = 0.0;
    let mut word_count = 0usize;

    if let Some(read_results) = body["analyzeResult"]["readResults"].as_array() {
        for page in read_results {
            if let Some(page_lines) = page["lines"].as_array() {
                for line in page_lines {
                    if let Some(text) = line["text"].as_str() {
                        lines.push(text.to_string());
                    }
                    if let Some(words) = line["words"].as_array() {
                        for word in words {
                            if let Some(confidence) = word["confidence"].as_f64() {
                                confidence_sum += confidence;
                                word_count += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    OcrArtifact {
        text: lines.join("\n"),
        confidence: if word_count > 0 {
            confidence_sum / word_count as f64
        } else {
            0.0
        },
        word_count,
    }
}

#[async_trait]
impl OcrEngine for AzureReadEngine {
    async fn recognize(&self, image: &[u8], language: Option<&str>) -> Result<OcrArtifact> {
        let operation_url = self.submit(image, language).await?;
        let body = self.poll(&operation_url).await?;
        Ok(collect_artifact(&body))
    }
}
