//! Thin demo binary: boots a `Pipeline` against a local Ollama-compatible
//! runtime, submits one sample job, and prints the result.
//!
//! Grounded on the teacher's `main.rs` boot sequence: dotenvy, then
//! `tracing_subscriber` with a conditional `EnvFilter`, then delegate to a
//! small command.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenderflow::config::PipelineConfig;
use tenderflow::model::{ContentType, InputRef, Priority, TaskKind};
use tenderflow::model_client::OllamaRuntime;
use tenderflow::{JobSpec, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "tenderflow-cli", about = "Run the tender-document AI pipeline on a sample document")]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults.
    #[arg(long, env = "TENDERFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a document to run through the pipeline. Defaults to a short
    /// built-in sample when omitted.
    #[arg(long)]
    document: Option<PathBuf>,

    /// Which task to run the document through.
    #[arg(long, default_value = "analyze_risk")]
    task: String,

    #[arg(long, env = "TENDERFLOW_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "tenderflow=debug" } else { "tenderflow=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let task_kind = match cli.task.as_str() {
        "extract_text" => TaskKind::ExtractText,
        "extract_tender" => TaskKind::ExtractTender,
        "generate_quotation" => TaskKind::GenerateQuotation,
        "analyze_risk" => TaskKind::AnalyzeRisk,
        other => anyhow::bail!("unknown task kind: {other}"),
    };

    let runtime = OllamaRuntime::new(config.model_runtime_url.clone());
    let pipeline = Pipeline::start(config, runtime).await?;

    let (input, content_type) = match &cli.document {
        Some(path) => (InputRef::Path(path.clone()), ContentType::Unknown),
        None => (
            InputRef::Blob(SAMPLE_TENDER_TEXT.as_bytes().to_vec()),
            ContentType::PlainText,
        ),
    };

    let mut params = serde_json::Map::new();
    if task_kind == TaskKind::GenerateQuotation {
        params.insert(
            "tender_summary".to_string(),
            serde_json::Value::String("Supply of office furniture for a regional office".to_string()),
        );
    }

    let spec = JobSpec {
        task_kind,
        input,
        content_type,
        correlation_id: Some("cli-demo".to_string()),
        priority: Priority::Normal,
        deadline: None,
        params,
    };

    let (status, result) = pipeline.submit_and_await(spec, Duration::from_secs(120)).await?;
    println!("status: {status:?}");
    if let Some(value) = result {
        println!("result: {}", serde_json::to_string_pretty(&value)?);
    }

    pipeline.shutdown().await;
    Ok(())
}

const SAMPLE_TENDER_TEXT: &str = "\
Request for Tender: Supply and Delivery of Office Furniture
Buyer: Regional Procurement Authority
Submission deadline: 2026-09-15
Estimated value: 250,000 EUR

Lot 1: Desks and chairs for 120 staff
Lot 2: Storage cabinets for three regional offices

Bidders must demonstrate prior public-sector delivery experience and provide
a two-year warranty on all supplied furniture. Late submissions will not be
considered under any circumstances.
";
