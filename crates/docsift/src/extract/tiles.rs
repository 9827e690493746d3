//! Tile dispatch: single, sequential and parallel extraction over tiles.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::backend::{BackendRequest, ContentPart, ModelBackend};
use crate::error::{DocsiftError, Result};
use crate::schema::spec_for;
use crate::types::{ProcessingContext, Tile, TileExtraction};

use super::instructions::{TILE_LEAD_IN, build_instructions};
use super::tag_rows;

/// Pause between parallel batches, a crude token-bucket against upstream
/// per-minute quotas.
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Run the image extraction branch over the context's tiles.
///
/// Dispatch mode depends on tile count and options:
/// - one tile: a direct call with the long timeout; failure is fatal.
/// - sequential: tile by tile with the short timeout, best-effort.
/// - parallel: batches of `maxConcurrency` with per-tile retries and
///   exponential backoff; a tile that exhausts its retries is dropped with
///   a warning.
///
/// Tile payloads are released once dispatch completes; extraction results
/// carry everything aggregation needs.
pub async fn run_tiles(ctx: &mut ProcessingContext, backend: &Arc<dyn ModelBackend>) -> Result<()> {
    let schema = ctx.request.effective_schema();
    let enforce = ctx.request.options.enforce_json_schema && backend.supports_structured_output();
    let instructions = build_instructions(
        ctx.request.doc_type,
        ctx.request.options.custom_prompt.as_deref(),
        &schema,
        !enforce,
    );
    let parallel_mode = ctx.request.options.parallel_mode;
    let max_concurrency = ctx.request.options.max_concurrency.max(1);
    let retry_attempts = ctx.request.options.retry_attempts;

    let call = CallSpec {
        backend: Arc::clone(backend),
        instructions,
        schema,
        enforce,
        doc_type: ctx.request.doc_type,
        array_field: spec_for(ctx.request.doc_type).array_field,
    };

    let tiles = std::mem::take(&mut ctx.tiles);
    let outcome = match tiles.len() {
        0 => {
            return Err(DocsiftError::Other(
                "extract stage reached with no tiles".to_string(),
            ));
        }
        1 => dispatch_single(&call, &tiles[0]).await?,
        _ if parallel_mode => dispatch_parallel(&call, &tiles, max_concurrency, retry_attempts).await,
        _ => dispatch_sequential(&call, &tiles).await,
    };

    if outcome.extractions.is_empty() {
        return Err(DocsiftError::Other(format!(
            "extraction failed for all {} tiles",
            tiles.len()
        )));
    }

    for warning in outcome.warnings {
        ctx.record_warning(warning);
    }
    ctx.metadata.tiles_dropped = tiles.len() - outcome.extractions.len();
    ctx.metadata.retries += outcome.retries;
    ctx.extractions = outcome.extractions;
    Ok(())
}

struct CallSpec {
    backend: Arc<dyn ModelBackend>,
    instructions: String,
    schema: Value,
    enforce: bool,
    doc_type: crate::types::DocumentType,
    array_field: Option<&'static str>,
}

#[derive(Default)]
struct DispatchOutcome {
    extractions: Vec<TileExtraction>,
    warnings: Vec<String>,
    retries: usize,
}

async fn call_tile(call: &CallSpec, tile: &Tile, use_tile_timeout: bool) -> Result<TileExtraction> {
    let mut parts = Vec::with_capacity(tile.images.len() + 1);
    parts.push(ContentPart::Text(TILE_LEAD_IN.to_string()));
    parts.extend(tile.images.iter().cloned().map(ContentPart::ImageJpeg));

    let response = call
        .backend
        .extract(BackendRequest {
            parts: &parts,
            instructions: &call.instructions,
            doc_type: call.doc_type,
            schema: call.enforce.then_some(&call.schema),
            enforce_schema: call.enforce,
            use_tile_timeout,
        })
        .await?;

    let mut data = response.data;
    tag_rows(
        &mut data,
        call.array_field,
        Some(tile.global_index),
        Some(tile.page_index),
        Some(tile.slice_index),
    );

    Ok(TileExtraction {
        data,
        response_id: response.response_id,
        tile_index: Some(tile.global_index),
    })
}

async fn dispatch_single(call: &CallSpec, tile: &Tile) -> Result<DispatchOutcome> {
    let extraction = call_tile(call, tile, false).await?;
    Ok(DispatchOutcome {
        extractions: vec![extraction],
        ..Default::default()
    })
}

async fn dispatch_sequential(call: &CallSpec, tiles: &[Tile]) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    for tile in tiles {
        match call_tile(call, tile, true).await {
            Ok(extraction) => outcome.extractions.push(extraction),
            Err(error) => outcome
                .warnings
                .push(format!("tile {} dropped: {error}", tile.global_index)),
        }
    }
    outcome
}

async fn dispatch_parallel(call: &CallSpec, tiles: &[Tile], batch_size: usize, retry_attempts: u32) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    let batch_count = tiles.len().div_ceil(batch_size);

    for (batch_index, batch) in tiles.chunks(batch_size).enumerate() {
        tracing::debug!(
            batch = batch_index + 1,
            of = batch_count,
            tiles = batch.len(),
            "dispatching tile batch"
        );

        let settled = join_all(batch.iter().map(|tile| call_with_retry(call, tile, retry_attempts))).await;
        for (tile, result) in batch.iter().zip(settled) {
            match result {
                Ok((extraction, retries)) => {
                    outcome.retries += retries;
                    outcome.extractions.push(extraction);
                }
                Err((error, retries)) => {
                    outcome.retries += retries;
                    outcome.warnings.push(format!(
                        "tile {} dropped after {} attempts: {error}",
                        tile.global_index,
                        retry_attempts + 1
                    ));
                }
            }
        }

        if batch_index + 1 < batch_count {
            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }
    }

    // join_all settles batches in input order, so extractions already follow
    // global_index order.
    outcome
}

/// One tile with up to `retry_attempts` retries; the k-th retry (1-indexed)
/// waits 2^k seconds. Only retryable failures are retried.
async fn call_with_retry(
    call: &CallSpec,
    tile: &Tile,
    retry_attempts: u32,
) -> std::result::Result<(TileExtraction, usize), (DocsiftError, usize)> {
    let mut retries = 0usize;
    loop {
        match call_tile(call, tile, true).await {
            Ok(extraction) => return Ok((extraction, retries)),
            Err(error) => {
                let attempted = retries as u32;
                if !error.is_retryable() || attempted >= retry_attempts {
                    return Err((error, retries));
                }
                let backoff = Duration::from_secs(2u64.pow(attempted + 1));
                tracing::warn!(
                    tile = tile.global_index,
                    retry = attempted + 1,
                    backoff_secs = backoff.as_secs(),
                    %error,
                    "tile call failed, backing off before retry"
                );
                tokio::time::sleep(backoff).await;
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ExtractionOptions, ModelProvider};
    use crate::types::{DocumentRequest, DocumentType, ProcessingContext};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that answers from a scripted per-call queue.
    struct ScriptedBackend {
        calls: AtomicUsize,
        /// Error injected for the first `fail_first` calls.
        fail_first: usize,
        rows_per_call: Mutex<Vec<Value>>,
    }

    impl ScriptedBackend {
        fn with_rows(rows: Vec<Value>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                rows_per_call: Mutex::new(rows),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn provider(&self) -> ModelProvider {
            ModelProvider::OpenAi
        }

        fn supports_structured_output(&self) -> bool {
            true
        }

        async fn extract(&self, _request: BackendRequest<'_>) -> Result<crate::backend::BackendResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(DocsiftError::transport("openai", Some(500), "scripted failure"));
            }
            let mut rows = self.rows_per_call.lock().unwrap();
            let data = if rows.is_empty() { json!({ "drawdowns": [] }) } else { rows.remove(0) };
            Ok(crate::backend::BackendResponse {
                data,
                response_id: Some(format!("resp-{call}")),
            })
        }
    }

    fn tile(global_index: usize, page_index: usize, slice_index: usize) -> Tile {
        Tile {
            page_index,
            slice_index,
            global_index,
            images: vec![vec![0xFF, 0xD8]],
            is_tiled: true,
            raw_slice: None,
            raw_header: None,
        }
    }

    fn context(tiles: Vec<Tile>, options: ExtractionOptions) -> ProcessingContext {
        let mut ctx = ProcessingContext::new(DocumentRequest {
            file: bytes::Bytes::from_static(b"%PDF"),
            mime_type: "application/pdf".to_string(),
            doc_type: DocumentType::Drawdown,
            schema: None,
            options,
        });
        ctx.tiles = tiles;
        ctx
    }

    #[tokio::test]
    async fn test_single_tile_failure_is_fatal() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            rows_per_call: Mutex::new(vec![]),
        });
        let mut ctx = context(vec![tile(0, 0, 0)], ExtractionOptions::default());
        let err = run_tiles(&mut ctx, &backend).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_sequential_drops_failing_tile_with_warning() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            rows_per_call: Mutex::new(vec![
                json!({ "drawdowns": [ { "invoiceNumber": "B" } ] }),
                json!({ "drawdowns": [ { "invoiceNumber": "C" } ] }),
            ]),
        });
        let options = ExtractionOptions {
            parallel_mode: false,
            ..Default::default()
        };
        let mut ctx = context(vec![tile(0, 0, 0), tile(1, 0, 1), tile(2, 0, 2)], options);
        run_tiles(&mut ctx, &backend).await.unwrap();

        assert_eq!(ctx.extractions.len(), 2);
        assert_eq!(ctx.warnings.len(), 1);
        assert!(ctx.warnings[0].contains("tile 0 dropped"));
        assert_eq!(ctx.metadata.tiles_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_retry_succeeds_on_second_attempt() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            rows_per_call: Mutex::new(vec![
                json!({ "drawdowns": [ { "invoiceNumber": "A" } ] }),
                json!({ "drawdowns": [ { "invoiceNumber": "B" } ] }),
                json!({ "drawdowns": [ { "invoiceNumber": "C" } ] }),
            ]),
        });
        let options = ExtractionOptions {
            parallel_mode: true,
            max_concurrency: 3,
            retry_attempts: 2,
            ..Default::default()
        };
        let started = tokio::time::Instant::now();
        let mut ctx = context(vec![tile(0, 0, 0), tile(1, 0, 1), tile(2, 0, 2)], options);
        run_tiles(&mut ctx, &backend).await.unwrap();

        // All three tiles contribute exactly once.
        assert_eq!(ctx.extractions.len(), 3);
        assert!(ctx.warnings.is_empty());
        assert_eq!(ctx.metadata.retries, 1);
        // First retry backs off 2^1 seconds (virtual time).
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_exhausted_retries_drop_tile() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend {
            calls: AtomicUsize::new(0),
            fail_first: 100,
            rows_per_call: Mutex::new(vec![]),
        });
        let options = ExtractionOptions {
            parallel_mode: true,
            max_concurrency: 2,
            retry_attempts: 1,
            ..Default::default()
        };
        let mut ctx = context(vec![tile(0, 0, 0), tile(1, 0, 1)], options);
        let err = run_tiles(&mut ctx, &backend).await.unwrap_err();
        // Every tile dropped: the whole stage fails.
        assert!(err.to_string().contains("all 2 tiles"));
    }

    #[tokio::test]
    async fn test_rows_tagged_with_tile_coordinates() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend::with_rows(vec![json!({
            "drawdowns": [ { "invoiceNumber": "A" } ]
        })]));
        let mut ctx = context(vec![tile(7, 2, 1)], ExtractionOptions::default());
        run_tiles(&mut ctx, &backend).await.unwrap();

        let row = &ctx.extractions[0].data["drawdowns"][0];
        assert_eq!(row[crate::types::TILE_INDEX_KEY], 7);
        assert_eq!(row[crate::types::PAGE_INDEX_KEY], 2);
        assert_eq!(row[crate::types::SLICE_INDEX_KEY], 1);
        assert_eq!(ctx.extractions[0].tile_index, Some(7));
    }

    #[tokio::test]
    async fn test_non_retryable_error_not_retried() {
        struct ParseFailBackend {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl ModelBackend for ParseFailBackend {
            fn provider(&self) -> ModelProvider {
                ModelProvider::OpenAi
            }
            async fn extract(&self, _request: BackendRequest<'_>) -> Result<crate::backend::BackendResponse> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(DocsiftError::parsing("not json"))
            }
        }

        let backend = Arc::new(ParseFailBackend {
            calls: AtomicUsize::new(0),
        });
        let dyn_backend: Arc<dyn ModelBackend> = Arc::clone(&backend) as Arc<dyn ModelBackend>;
        let options = ExtractionOptions {
            parallel_mode: true,
            retry_attempts: 2,
            ..Default::default()
        };
        let mut ctx = context(vec![tile(0, 0, 0), tile(1, 0, 1)], options);
        let _ = run_tiles(&mut ctx, &dyn_backend).await;

        // One call per tile; parse failures are deterministic.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
