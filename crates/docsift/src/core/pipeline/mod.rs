//! Pipeline skeleton: the stage contract, the sequential runner and the
//! per-request stage assembly.

mod stages;

pub use stages::{
    AggregateStage, CleanupStage, ExtractStage, NativeExtractStage, OcrEnhancedStage, OcrOnlyStage, OcrStage,
    OcrVerifiedStage, PreprocessStage, TilingStage, ValidateStage,
};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::backend::{ModelBackend, backend_for};
use crate::core::config::{PipelineMode, RuntimeConfig};
use crate::error::Result;
use crate::ocr::OcrEngine;
use crate::types::{DocumentRequest, PipelineOutcome, ProcessingContext, StageState};

/// One pipeline stage.
///
/// A stage either advances the context, declines to run, or fails; the
/// runner records the failure into the context and short-circuits the rest
/// of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// The state the context enters while this stage runs.
    fn state(&self) -> StageState;

    /// Whether the stage applies to this context. Stages may record
    /// warnings here when they decline.
    fn should_run(&self, _ctx: &mut ProcessingContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<()>;
}

/// An assembled, ordered stage sequence for one request.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Assemble the stage sequence for a request.
    ///
    /// The branch structure follows the pipeline mode and the backend's
    /// capabilities: a native-file backend in default mode skips
    /// rasterisation and tiling; the OCR modes replace the tile extraction
    /// stage with their own.
    pub fn for_request(
        request: &DocumentRequest,
        runtime: Arc<RuntimeConfig>,
        backend: Arc<dyn ModelBackend>,
        ocr_engine: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        let mode = request.options.pipeline_mode;
        let native = mode == PipelineMode::Default && backend.consumes_native_pdf();

        if !native {
            stages.push(Box::new(PreprocessStage::new(Arc::clone(&runtime))));
        }
        if !native && request.options.wants_ocr() {
            stages.push(Box::new(OcrStage::new(ocr_engine)));
        }

        match mode {
            PipelineMode::Default if native => {
                stages.push(Box::new(NativeExtractStage::new(Arc::clone(&backend))));
            }
            PipelineMode::Default => {
                stages.push(Box::new(TilingStage::new(Arc::clone(&runtime))));
                stages.push(Box::new(ExtractStage::new(Arc::clone(&backend))));
            }
            PipelineMode::OcrEnhanced => {
                stages.push(Box::new(OcrEnhancedStage::new(Arc::clone(&backend))));
            }
            PipelineMode::OcrOnly => {
                stages.push(Box::new(OcrOnlyStage::new(Arc::clone(&backend))));
            }
            PipelineMode::OcrVerified => {
                stages.push(Box::new(OcrVerifiedStage::new(Arc::clone(&backend))));
            }
        }

        stages.push(Box::new(AggregateStage));
        stages.push(Box::new(ValidateStage::new(backend, runtime)));
        stages.push(Box::new(CleanupStage));

        Self { stages }
    }

    /// Run the stages to completion or first fatal error.
    pub async fn run(&self, mut ctx: ProcessingContext) -> ProcessingContext {
        for stage in &self.stages {
            if ctx.is_failed() {
                break;
            }
            if !stage.should_run(&mut ctx) {
                tracing::debug!(stage = stage.name(), "stage skipped");
                continue;
            }

            ctx.state = stage.state();
            let started = Instant::now();
            match stage.execute(&mut ctx).await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    tracing::debug!(stage = stage.name(), ?elapsed, "stage complete");
                    ctx.metadata.stage_timings.push((stage.name(), elapsed));
                }
                Err(error) => ctx.record_fatal(error),
            }
        }

        if !ctx.is_failed() {
            ctx.state = StageState::Emitted;
        }
        ctx
    }
}

/// Run the full pipeline for one request using environment configuration
/// and the singleton backend adapters.
///
/// This is the main library entry point for the inbound surface.
pub async fn extract_document(request: DocumentRequest) -> PipelineOutcome {
    let runtime = match RuntimeConfig::from_env() {
        Ok(runtime) => Arc::new(runtime),
        Err(error) => return fail_early(request, error),
    };
    let backend = match backend_for(request.options.model_provider, &runtime) {
        Ok(backend) => backend,
        Err(error) => return fail_early(request, error),
    };
    let ocr_engine = crate::ocr::engine_from_runtime(&runtime);

    extract_document_with(request, runtime, backend, ocr_engine).await
}

/// Pipeline entry point with explicit collaborators, used by tests and by
/// callers that manage their own adapters.
pub async fn extract_document_with(
    request: DocumentRequest,
    runtime: Arc<RuntimeConfig>,
    backend: Arc<dyn ModelBackend>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
) -> PipelineOutcome {
    if let Err(error) = request.validate() {
        return fail_early(request, error);
    }

    let verbose = runtime.verbose_debug;
    let pipeline = Pipeline::for_request(&request, runtime, backend, ocr_engine);
    let ctx = pipeline.run(ProcessingContext::new(request)).await;

    if verbose {
        for (stage, elapsed) in &ctx.metadata.stage_timings {
            tracing::info!(stage, ?elapsed, "stage timing");
        }
        tracing::info!(
            tiles_built = ctx.metadata.tiles_built,
            tiles_dropped = ctx.metadata.tiles_dropped,
            retries = ctx.metadata.retries,
            reverified = ctx.metadata.reverified,
            warnings = ctx.warnings.len(),
            "pipeline counters"
        );
    }

    ctx.into_outcome()
}

fn fail_early(request: DocumentRequest, error: crate::error::DocsiftError) -> PipelineOutcome {
    let mut ctx = ProcessingContext::new(request);
    ctx.record_fatal(error);
    ctx.into_outcome()
}
