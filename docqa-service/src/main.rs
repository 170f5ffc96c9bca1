use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docqa_retrieval::{EmbedderKind, ModelHandle, Retriever};
use docqa_service::{
    AnswerGenerator, ContextEchoGenerator, GeminiAnswerGenerator, QaRequest, QaService,
    ServiceConfig, SourceLoader, parse_embedder,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Answer questions about a document using retrieved context", long_about = None)]
#[command(version)]
struct Cli {
    /// Document URL (http/https) or local file path
    #[arg(short, long)]
    document: String,

    /// Question to answer; repeat for several
    #[arg(short, long = "question", required = true)]
    questions: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Embedding variant: token-frequency, tf-idf or dense
    #[arg(long, value_parser = parse_embedder_arg)]
    embedder: Option<EmbedderKind>,

    /// Number of chunks retrieved per question
    #[arg(long)]
    top_k: Option<usize>,

    /// Print the retrieved context instead of calling the model
    #[arg(long)]
    retrieve_only: bool,
}

fn parse_embedder_arg(value: &str) -> std::result::Result<EmbedderKind, String> {
    parse_embedder(value)
        .ok_or_else(|| format!("unknown embedder '{value}' (expected token-frequency, tf-idf or dense)"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[cfg(feature = "candle")]
fn model_handle() -> ModelHandle {
    docqa_retrieval::embedding::candle::bert_model_handle(
        docqa_retrieval::embedding::candle::DEFAULT_MODEL_ID,
    )
}

#[cfg(not(feature = "candle"))]
fn model_handle() -> ModelHandle {
    ModelHandle::unavailable()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path).context("Failed to load config")?,
        None => ServiceConfig::from_env().context("Invalid configuration")?,
    };
    if let Some(kind) = cli.embedder {
        config.retrieval.embedder = kind;
    }
    if let Some(k) = cli.top_k {
        config.retrieval.top_k = k;
    }
    config.validate().context("Invalid configuration")?;

    let generator: Arc<dyn AnswerGenerator> = if cli.retrieve_only {
        Arc::new(ContextEchoGenerator)
    } else {
        Arc::new(
            GeminiAnswerGenerator::new(config.generator.clone())
                .context("Failed to create answer generator")?,
        )
    };

    let retriever = Retriever::with_model(config.retrieval.clone(), Arc::new(model_handle()))
        .context("Invalid retrieval configuration")?;
    let loader = SourceLoader::from_config(&config).context("Failed to create document loader")?;

    let service = QaService::builder()
        .loader(Arc::new(loader))
        .generator(generator)
        .retriever(retriever)
        .config(config)
        .build()
        .context("Failed to build service")?;

    let response = service
        .answer(QaRequest::new(cli.document, cli.questions))
        .await
        .context("Failed to answer questions")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
