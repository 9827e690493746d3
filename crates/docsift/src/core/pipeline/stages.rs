//! Stage implementations binding the pipeline skeleton to the domain
//! modules.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::ModelBackend;
use crate::core::config::RuntimeConfig;
use crate::error::{DocsiftError, Result};
use crate::ocr::OcrEngine;
use crate::types::{DocumentType, ProcessingContext, StageState};

use super::Stage;

/// PDF rasterisation / image pass-through.
pub struct PreprocessStage {
    runtime: Arc<RuntimeConfig>,
}

impl PreprocessStage {
    pub fn new(runtime: Arc<RuntimeConfig>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Stage for PreprocessStage {
    fn name(&self) -> &'static str {
        "preprocess"
    }

    fn state(&self) -> StageState {
        StageState::Preprocess
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let pages = crate::preprocess::preprocess(&ctx.request.file, &ctx.request.mime_type, &self.runtime.render).await?;
        tracing::debug!(pages = pages.len(), "preprocess complete");
        ctx.images = pages;
        Ok(())
    }
}

/// Optional OCR pre-pass.
pub struct OcrStage {
    engine: Option<Arc<dyn OcrEngine>>,
}

impl OcrStage {
    pub fn new(engine: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for OcrStage {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn state(&self) -> StageState {
        StageState::Ocr
    }

    fn should_run(&self, ctx: &mut ProcessingContext) -> bool {
        if self.engine.is_none() {
            ctx.record_warning("OCR requested but no OCR collaborator is configured; skipping OCR pre-pass");
            return false;
        }
        true
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let engine = Arc::clone(self.engine.as_ref().expect("should_run checked the engine"));
        let language = ctx.request.options.ocr_language.clone();
        let concurrency = ctx.request.options.ocr_concurrency;

        let (artifacts, warnings) = crate::ocr::recognize_pages(engine, &ctx.images, language, concurrency).await;
        for warning in warnings {
            ctx.record_warning(warning);
        }
        ctx.metadata.ocr_text = crate::ocr::join_pages(&artifacts);
        ctx.metadata.ocr_pages = artifacts;
        Ok(())
    }
}

/// Tile-or-not decision and slice production.
pub struct TilingStage {
    runtime: Arc<RuntimeConfig>,
}

impl TilingStage {
    pub fn new(runtime: Arc<RuntimeConfig>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Stage for TilingStage {
    fn name(&self) -> &'static str {
        "tiling"
    }

    fn state(&self) -> StageState {
        StageState::Tiling
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        if ctx.images.is_empty() {
            return Err(DocsiftError::Other("tiling reached with no page images".to_string()));
        }

        let geometry = ctx.request.options.tile_geometry();
        let enabled = ctx
            .request
            .options
            .enable_tiling
            .unwrap_or(ctx.request.doc_type == DocumentType::Drawdown);

        let tiles = crate::tiling::build_tiles(&ctx.images, &geometry, enabled, self.runtime.debug_dir.as_deref())?;
        tracing::debug!(tiles = tiles.len(), enabled, "tiling complete");
        ctx.metadata.tiles_built = tiles.len();
        ctx.tiles = tiles;
        Ok(())
    }
}

/// Per-tile image extraction.
pub struct ExtractStage {
    backend: Arc<dyn ModelBackend>,
}

impl ExtractStage {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn state(&self) -> StageState {
        StageState::Extract
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::extract::run_tiles(ctx, &self.backend).await
    }
}

/// Whole-document native-file extraction.
pub struct NativeExtractStage {
    backend: Arc<dyn ModelBackend>,
}

impl NativeExtractStage {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for NativeExtractStage {
    fn name(&self) -> &'static str {
        "extract-native"
    }

    fn state(&self) -> StageState {
        StageState::Extract
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::extract::run_native(ctx, &self.backend).await
    }
}

/// Per-page OCR text + image fusion extraction.
pub struct OcrEnhancedStage {
    backend: Arc<dyn ModelBackend>,
}

impl OcrEnhancedStage {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for OcrEnhancedStage {
    fn name(&self) -> &'static str {
        "extract-ocr-enhanced"
    }

    fn state(&self) -> StageState {
        StageState::Extract
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::extract::run_ocr_enhanced(ctx, &self.backend).await
    }
}

/// Text-only extraction over the joined OCR text.
pub struct OcrOnlyStage {
    backend: Arc<dyn ModelBackend>,
}

impl OcrOnlyStage {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for OcrOnlyStage {
    fn name(&self) -> &'static str {
        "extract-ocr-only"
    }

    fn state(&self) -> StageState {
        StageState::Extract
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::extract::run_ocr_only(ctx, &self.backend).await
    }
}

/// Two-pass verified extraction with IBAN repair.
pub struct OcrVerifiedStage {
    backend: Arc<dyn ModelBackend>,
}

impl OcrVerifiedStage {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for OcrVerifiedStage {
    fn name(&self) -> &'static str {
        "extract-ocr-verified"
    }

    fn state(&self) -> StageState {
        StageState::Extract
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::extract::run_ocr_verified(ctx, &self.backend).await
    }
}

/// Merge, dedup and total recompute.
pub struct AggregateStage;

#[async_trait]
impl Stage for AggregateStage {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn state(&self) -> StageState {
        StageState::Aggregate
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.result = Some(crate::aggregate::aggregate(&ctx.extractions, ctx.request.doc_type));
        // Tile payloads and extraction bodies are no longer needed.
        ctx.extractions.clear();
        ctx.tiles.clear();
        Ok(())
    }
}

/// Field validation with repair.
pub struct ValidateStage {
    backend: Arc<dyn ModelBackend>,
    runtime: Arc<RuntimeConfig>,
}

impl ValidateStage {
    pub fn new(backend: Arc<dyn ModelBackend>, runtime: Arc<RuntimeConfig>) -> Self {
        Self { backend, runtime }
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn state(&self) -> StageState {
        StageState::Validate
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        crate::validate::run_validators(ctx, &self.backend, &self.runtime).await?;
        // For drawdowns a repair may have changed amounts' rows; keep the
        // derived total consistent with the final row set.
        if ctx.request.doc_type == DocumentType::Drawdown
            && let Some(result) = ctx.result.as_mut()
        {
            crate::aggregate::recompute_total_sum(result);
        }
        Ok(())
    }
}

/// Strip internal `_` markers from the final result.
pub struct CleanupStage;

#[async_trait]
impl Stage for CleanupStage {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn state(&self) -> StageState {
        StageState::Cleanup
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()> {
        if let Some(result) = ctx.result.as_mut() {
            crate::cleanup::strip_internal_keys(result);
        }
        Ok(())
    }
}
