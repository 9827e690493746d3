//! OCR pre-pass: engine abstraction and bounded per-page fan-out.

mod azure;

pub use azure::AzureReadEngine;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::config::RuntimeConfig;
use crate::error::Result;
use crate::types::{OCR_PAGE_SEPARATOR, OcrArtifact, PageImage};

/// External OCR collaborator.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise the text on one page image.
    async fn recognize(&self, image: &[u8], language: Option<&str>) -> Result<OcrArtifact>;
}

/// Construct the configured OCR engine, if any.
pub fn engine_from_runtime(runtime: &RuntimeConfig) -> Option<Arc<dyn OcrEngine>> {
    match (&runtime.azure_ocr_endpoint, &runtime.azure_ocr_key) {
        (Some(endpoint), Some(key)) => Some(Arc::new(AzureReadEngine::new(endpoint.clone(), key.clone()))),
        _ => None,
    }
}

/// Run OCR over all pages with bounded concurrency, preserving page order.
///
/// Per-page failures are non-fatal: the page slot holds `None` and the
/// failure is returned as a warning string. The bound is enforced with a
/// semaphore so at most `concurrency` requests are in flight.
pub async fn recognize_pages(
    engine: Arc<dyn OcrEngine>,
    pages: &[PageImage],
    language: Option<String>,
    concurrency: usize,
) -> (Vec<Option<OcrArtifact>>, Vec<String>) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, page) in pages.iter().enumerate() {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        let language = language.clone();
        let data = page.data.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await.expect("OCR semaphore closed");
            let result = engine.recognize(&data, language.as_deref()).await;
            (index, result)
        });
    }

    let mut artifacts: Vec<Option<OcrArtifact>> = vec![None; pages.len()];
    let mut warnings = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(artifact))) => {
                tracing::debug!(
                    page = index,
                    words = artifact.word_count,
                    confidence = artifact.confidence,
                    "OCR page complete"
                );
                artifacts[index] = Some(artifact);
            }
            Ok((index, Err(error))) => {
                warnings.push(format!("OCR failed for page {index}: {error}"));
            }
            Err(join_error) => {
                warnings.push(format!("OCR task panicked: {join_error}"));
            }
        }
    }

    (artifacts, warnings)
}

/// Join per-page OCR texts into the full document text with page
/// separators. Pages without OCR contribute an empty segment so page
/// numbering stays aligned.
pub fn join_pages(artifacts: &[Option<OcrArtifact>]) -> Option<String> {
    if artifacts.iter().all(Option::is_none) {
        return None;
    }
    let joined = artifacts
        .iter()
        .map(|artifact| artifact.as_ref().map(|a| a.text.as_str()).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(OCR_PAGE_SEPARATOR);
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocsiftError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEngine {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_page_prefix: Option<&'static str>,
    }

    impl StubEngine {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_page_prefix: None,
            }
        }
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        async fn recognize(&self, image: &[u8], _language: Option<&str>) -> Result<OcrArtifact> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let text = String::from_utf8_lossy(image).to_string();
            if let Some(prefix) = self.fail_page_prefix
                && text.starts_with(prefix)
            {
                return Err(DocsiftError::transport("azure-ocr", Some(500), "boom"));
            }
            Ok(OcrArtifact {
                word_count: text.split_whitespace().count(),
                confidence: 0.9,
                text,
            })
        }
    }

    fn pages(texts: &[&str]) -> Vec<PageImage> {
        texts
            .iter()
            .map(|t| PageImage {
                data: t.as_bytes().to_vec(),
                width: 100,
                height: 100,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_recognize_pages_preserves_order() {
        let engine = Arc::new(StubEngine::new());
        let pages = pages(&["page one", "page two", "page three"]);
        let (artifacts, warnings) = recognize_pages(engine, &pages, None, 3).await;

        assert!(warnings.is_empty());
        let texts: Vec<_> = artifacts.iter().map(|a| a.as_ref().unwrap().text.clone()).collect();
        assert_eq!(texts, vec!["page one", "page two", "page three"]);
    }

    #[tokio::test]
    async fn test_recognize_pages_bounds_concurrency() {
        let engine = Arc::new(StubEngine::new());
        let pages = pages(&["a", "b", "c", "d", "e", "f"]);
        let (_, warnings) = recognize_pages(Arc::clone(&engine) as Arc<dyn OcrEngine>, &pages, None, 2).await;

        assert!(warnings.is_empty());
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_recognize_pages_per_page_failure_is_warning() {
        let engine = Arc::new(StubEngine {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_page_prefix: Some("bad"),
        });
        let pages = pages(&["good page", "bad page", "another good"]);
        let (artifacts, warnings) = recognize_pages(engine, &pages, None, 3).await;

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("page 1"));
        assert!(artifacts[0].is_some());
        assert!(artifacts[1].is_none());
        assert!(artifacts[2].is_some());
    }

    #[test]
    fn test_join_pages_separator_and_gaps() {
        let artifacts = vec![
            Some(OcrArtifact {
                text: "first".to_string(),
                confidence: 1.0,
                word_count: 1,
            }),
            None,
            Some(OcrArtifact {
                text: "third".to_string(),
                confidence: 1.0,
                word_count: 1,
            }),
        ];
        let joined = join_pages(&artifacts).unwrap();
        assert_eq!(joined, format!("first{0}{0}third", OCR_PAGE_SEPARATOR));
    }

    #[test]
    fn test_join_pages_all_failed() {
        assert!(join_pages(&[None, None]).is_none());
    }
}
