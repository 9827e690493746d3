//! # docsift
//!
//! Structured data extraction from scanned and born-digital documents by
//! orchestrating multimodal language models.
//!
//! The heavy lifting is not the model call itself but the pipeline around
//! it: PDF rasterisation and normalisation, spatial tiling of dense
//! tabular pages with header context, an optional OCR pre-pass fused with
//! the images, bounded-concurrency tile dispatch with retries, dedup-aware
//! aggregation, and field-level validation with a targeted repair loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use docsift::{DocumentRequest, DocumentType, ExtractionOptions, PipelineOutcome};
//!
//! # async fn example() {
//! let request = DocumentRequest {
//!     file: std::fs::read("schedule.pdf").unwrap().into(),
//!     mime_type: "application/pdf".to_string(),
//!     doc_type: DocumentType::Drawdown,
//!     schema: None,
//!     options: ExtractionOptions::default(),
//! };
//!
//! match docsift::extract_document(request).await {
//!     PipelineOutcome::Completed { result, .. } => println!("{result}"),
//!     PipelineOutcome::Failed(payload) => eprintln!("{}: {}", payload.status, payload.error),
//! }
//! # }
//! ```

pub mod aggregate;
pub mod backend;
pub mod cleanup;
pub mod core;
pub mod error;
pub mod extract;
pub mod iban;
pub mod image;
pub mod ocr;
pub mod preprocess;
pub mod schema;
pub mod tiling;
pub mod types;
pub mod validate;

pub use crate::core::config::{ExtractionOptions, ModelProvider, PipelineMode, RuntimeConfig};
pub use crate::core::pipeline::{Pipeline, Stage, extract_document, extract_document_with};
pub use error::{DocsiftError, Result};
pub use types::{DocumentRequest, DocumentType, ErrorPayload, PipelineOutcome, ProcessingContext};
