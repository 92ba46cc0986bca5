//! docflow: inspect the ingestion graph and run it in-process.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docflow_db::{
    expected_jobs, new_v7, Database, DocType, DocumentStore, EventBus, InMemoryDocumentStore,
    JobType, PoolConfig,
};
use docflow_jobs::{
    ingestion_graph, job_queue, Dispatcher, FailingHandler, GraphConfig, Ingestor,
    SimulatedHandler, SimulationProfile, WorkerBuilder, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(author, version, about = "Job-dependency workflow engine for document ingestion")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the transition table
    Graph {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Print the job types a document of the given doctype must complete
    Expected {
        /// text, image, audio or video
        doctype: String,
    },

    /// Ingest files and run the whole graph with simulated handlers
    Simulate {
        /// Files to ingest (archives, PDFs, text, image, audio, video)
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,

        /// Job types whose handler always fails (repeatable)
        #[arg(long)]
        fail: Vec<String>,

        /// Language reported by language detection
        #[arg(long, default_value = "en")]
        language: String,

        /// Number of images embedded in every extracted HTML document
        #[arg(long, default_value_t = 0)]
        embedded_images: usize,

        /// Print pipeline events as JSON lines
        #[arg(long)]
        events: bool,

        /// Persist documents in PostgreSQL instead of memory (migrations are applied)
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Text,
    Dot,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Graph { format } => cmd_graph(format),
        Commands::Expected { doctype } => cmd_expected(&doctype),
        Commands::Simulate {
            paths,
            fail,
            language,
            embedded_images,
            events,
            database_url,
        } => {
            let fail = fail
                .iter()
                .map(|s| JobType::from_str(s))
                .collect::<docflow_db::Result<Vec<_>>>()?;
            let profile = SimulationProfile::default()
                .with_language(language)
                .with_embedded_images(embedded_images);
            cmd_simulate(paths, fail, profile, events, database_url).await
        }
    }
}

// Environment variables:
//   LOG_FORMAT - "json" or "text" (default: "text")
//   RUST_LOG   - standard env filter (default: "docflow=info,docflow_jobs=warn,docflow_db=warn")
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docflow=info,docflow_jobs=warn,docflow_db=warn".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr; stdout carries command output.
    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn cmd_graph(format: GraphFormat) -> Result<()> {
    let table = ingestion_graph(&GraphConfig::from_env())?;
    match format {
        GraphFormat::Text => print!("{}", table.describe()),
        GraphFormat::Dot => print!("{}", table.to_dot()),
    }
    Ok(())
}

fn cmd_expected(doctype: &str) -> Result<()> {
    let doctype = DocType::from_str(doctype)?;
    for job_type in expected_jobs(doctype) {
        println!("{}", job_type);
    }
    Ok(())
}

async fn cmd_simulate(
    paths: Vec<PathBuf>,
    fail: Vec<JobType>,
    profile: SimulationProfile,
    print_events: bool,
    database_url: Option<String>,
) -> Result<()> {
    let graph_config = GraphConfig::from_env();
    let table = Arc::new(ingestion_graph(&graph_config)?);

    let worker_config = WorkerConfig::from_env();
    let store: Arc<dyn DocumentStore> = match database_url {
        Some(url) => {
            let pool_config =
                PoolConfig::from_env().sized_for_workers(worker_config.max_concurrent_jobs);
            let db = Database::connect_with_config(&url, pool_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(db.documents)
        }
        None => Arc::new(InMemoryDocumentStore::new()),
    };

    let (executor, queue) = job_queue(worker_config.queue_capacity);
    let events = Arc::new(EventBus::new(4096));
    let mut event_rx = events.subscribe();
    let dispatcher = Arc::new(
        Dispatcher::new(table, store.clone(), Arc::new(executor)).with_events(events.clone()),
    );

    let mut builder = WorkerBuilder::new(dispatcher.clone(), queue)
        .with_config(worker_config)
        .with_handlers(SimulatedHandler::all(profile));
    for job_type in &fail {
        builder = builder.with_handler(FailingHandler::new(*job_type, "simulated failure"));
    }
    let handle = builder.build().await.start();

    let project_id = new_v7();
    let ingestor = Ingestor::new(dispatcher.clone(), graph_config);
    for path in &paths {
        ingestor
            .ingest_file(project_id, path, None)
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;
    }

    handle.wait_idle().await?;
    handle.join().await?;

    if print_events {
        loop {
            match event_rx.try_recv() {
                Ok(envelope) => println!("{}", serde_json::to_string(&envelope)?),
                Err(TryRecvError::Lagged(skipped)) => {
                    eprintln!("({} events dropped)", skipped);
                }
                Err(_) => break,
            }
        }
    }

    let documents = store.list_documents(project_id).await?;
    info!(
        project_id = %project_id,
        documents = documents.len(),
        "Simulation finished"
    );
    for doc in documents {
        let failed = doc.completion.failed_jobs();
        let failed = if failed.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = failed.iter().map(|jt| jt.as_str()).collect();
            format!("  failed: {}", names.join(", "))
        };
        println!(
            "{}  {:<5}  {:<10}  {:>2}/{:<2}  {}{}",
            doc.id,
            doc.doctype.as_str(),
            doc.status().as_str(),
            doc.completion.processed_count(),
            doc.completion.len(),
            doc.file_path.display(),
            failed
        );
    }
    Ok(())
}
