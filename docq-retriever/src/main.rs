use anyhow::Context;
use clap::{Parser, Subcommand};
use docq_embed::{EmbedConfig, FastEmbedProvider};
use docq_retriever::document::ExtractedDocument;
use docq_retriever::generation::GeminiClient;
use docq_retriever::index::{DEFAULT_K, IndexManager};
use docq_retriever::ingest::{IngestConfig, IngestPipeline};
use docq_retriever::query::QueryAnswerer;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Ask questions about your documents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory for the index and ingestion artifacts
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest extracted documents into the index
    Ingest {
        /// Extracted-document JSON files to ingest
        docs: Vec<PathBuf>,
        /// Rebuild the index from scratch instead of merging
        #[arg(long)]
        reindex: bool,
    },
    /// Answer questions from the index
    Ask {
        /// Questions to answer, in order
        questions: Vec<String>,
        /// Number of units to retrieve per question
        #[arg(short, default_value_t = DEFAULT_K)]
        k: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Ingest { docs, reindex } => {
            anyhow::ensure!(!docs.is_empty(), "no documents given");

            let embedder = Arc::new(
                FastEmbedProvider::create(EmbedConfig::default())
                    .await
                    .context("initializing the embedding model")?,
            );
            let service = Arc::new(GeminiClient::from_env()?);
            let pipeline = IngestPipeline::new(IngestConfig::new(&args.base_dir), embedder, service);

            // Only the first document of a --reindex run rebuilds; the rest
            // merge into the fresh index.
            for (position, path) in docs.iter().enumerate() {
                let document = ExtractedDocument::load(path)?;
                let report = pipeline.ingest(&document, reindex && position == 0).await?;
                println!(
                    "{}: {} pages, {} text unit(s), {} figure unit(s), {} indexed",
                    document.name,
                    report.pages,
                    report.text_units,
                    report.figure_units,
                    report.indexed_units
                );
            }
            Ok(())
        }
        Commands::Ask { questions, k } => {
            anyhow::ensure!(!questions.is_empty(), "no questions given");

            let embedder = Arc::new(
                FastEmbedProvider::create(EmbedConfig::default())
                    .await
                    .context("initializing the embedding model")?,
            );
            let service = Arc::new(GeminiClient::from_env()?);
            let index_dir = IngestConfig::new(&args.base_dir).index_dir();
            let index = IndexManager::open(&index_dir, embedder).await?;
            let answerer = QueryAnswerer::new(index, service);

            for question in &questions {
                let answer = answerer.answer(question, k).await?;
                println!("Q: {question}");
                println!("A: {answer}");
                println!();
            }
            Ok(())
        }
    }
}
