//! docsift CLI - local driver for the extraction pipeline.
//!
//! Reads a document from disk, builds an extraction request and prints the
//! resulting JSON (or the structured error payload) to stdout.
//!
//! # Examples
//!
//! ```bash
//! # Extract a drawdown schedule with the default (Gemini) backend
//! docsift extract schedule.pdf --doc-type drawdown
//!
//! # Invoice via OpenAI with tiling forced on
//! docsift extract invoice.jpg --doc-type invoice --provider openai --tiling true
//!
//! # Two-pass verified extraction with OCR
//! docsift extract scan.pdf --doc-type drawdown --mode ocr-verified
//! ```

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsift::{DocumentRequest, DocumentType, ExtractionOptions, ModelProvider, PipelineMode, PipelineOutcome};
use tracing_subscriber::EnvFilter;

/// docsift document extraction CLI
#[derive(Parser)]
#[command(name = "docsift")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (equivalent to RUST_LOG=docsift=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract structured data from a document
    Extract {
        /// Path to the document (PDF, JPEG, PNG, GIF or WebP)
        path: PathBuf,

        /// Document type: invoice, bank-statement, loan-contract or drawdown
        #[arg(short, long)]
        doc_type: DocTypeArg,

        /// MIME type hint (derived from the extension if not provided)
        #[arg(short, long)]
        mime_type: Option<String>,

        /// Model backend: gemini, openai or azure-openai
        #[arg(short, long, default_value = "gemini")]
        provider: ProviderArg,

        /// Pipeline mode: default, ocr-enhanced, ocr-only or ocr-verified
        #[arg(long, default_value = "default")]
        mode: ModeArg,

        /// Path to a JSON Schema file overriding the built-in schema
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Custom prompt; a literal {{schema}} token is substituted
        #[arg(long)]
        prompt: Option<String>,

        /// Force tiling on or off (auto per document type if omitted)
        #[arg(long)]
        tiling: Option<bool>,

        /// Disable strict-schema enforcement on capable backends
        #[arg(long)]
        no_schema_enforcement: bool,

        /// Enable the OCR pre-pass in default mode
        #[arg(long)]
        ocr: bool,

        /// OCR language hint (e.g. "sk", "cs", "en")
        #[arg(long)]
        ocr_language: Option<String>,

        /// Sequential instead of parallel tile dispatch
        #[arg(long)]
        sequential: bool,

        /// Parallel batch size
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
    },

    /// Print the built-in extraction schema for a document type
    Schema {
        /// Document type: invoice, bank-statement, loan-contract or drawdown
        doc_type: DocTypeArg,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DocTypeArg {
    Invoice,
    BankStatement,
    LoanContract,
    Drawdown,
}

impl From<DocTypeArg> for DocumentType {
    fn from(arg: DocTypeArg) -> Self {
        match arg {
            DocTypeArg::Invoice => DocumentType::Invoice,
            DocTypeArg::BankStatement => DocumentType::BankStatement,
            DocTypeArg::LoanContract => DocumentType::LoanContract,
            DocTypeArg::Drawdown => DocumentType::Drawdown,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProviderArg {
    Gemini,
    Openai,
    AzureOpenai,
}

impl From<ProviderArg> for ModelProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Gemini => ModelProvider::Gemini,
            ProviderArg::Openai => ModelProvider::OpenAi,
            ProviderArg::AzureOpenai => ModelProvider::AzureOpenAi,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Default,
    OcrEnhanced,
    OcrOnly,
    OcrVerified,
}

impl From<ModeArg> for PipelineMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Default => PipelineMode::Default,
            ModeArg::OcrEnhanced => PipelineMode::OcrEnhanced,
            ModeArg::OcrOnly => PipelineMode::OcrOnly,
            ModeArg::OcrVerified => PipelineMode::OcrVerified,
        }
    }
}

fn mime_from_extension(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "docsift=debug" } else { "docsift=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Schema { doc_type } => {
            let schema = docsift::schema::default_schema(doc_type.into());
            println!("{}", serde_json::to_string_pretty(schema)?);
            Ok(())
        }
        Commands::Extract {
            path,
            doc_type,
            mime_type,
            provider,
            mode,
            schema,
            prompt,
            tiling,
            no_schema_enforcement,
            ocr,
            ocr_language,
            sequential,
            concurrency,
        } => {
            let file = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let Some(mime_type) = mime_type.or_else(|| mime_from_extension(&path)) else {
                bail!(
                    "cannot derive a MIME type from '{}'; pass --mime-type explicitly",
                    path.display()
                );
            };

            let custom_schema = match schema {
                Some(schema_path) => {
                    let raw = std::fs::read_to_string(&schema_path)
                        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
                    Some(serde_json::from_str(&raw).context("schema file is not valid JSON")?)
                }
                None => None,
            };

            let options = ExtractionOptions {
                model_provider: provider.into(),
                enforce_json_schema: !no_schema_enforcement,
                custom_prompt: prompt,
                custom_schema,
                enable_tiling: tiling,
                parallel_mode: !sequential,
                max_concurrency: concurrency,
                use_azure_ocr: ocr,
                ocr_language,
                pipeline_mode: mode.into(),
                ..Default::default()
            };

            let request = DocumentRequest {
                file: file.into(),
                mime_type,
                doc_type: doc_type.into(),
                schema: None,
                options,
            };

            match docsift::extract_document(request).await {
                PipelineOutcome::Completed { result, warnings } => {
                    for warning in &warnings {
                        tracing::warn!("{warning}");
                    }
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                PipelineOutcome::Failed(payload) => {
                    eprintln!("{}", serde_json::to_string_pretty(&payload)?);
                    std::process::exit(if payload.status == 400 { 2 } else { 1 });
                }
            }
        }
    }
}
