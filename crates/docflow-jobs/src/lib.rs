//! # docflow-jobs
//!
//! Job-dependency workflow engine for docflow.
//!
//! This crate provides:
//! - The transition table (direct, switch and loop edges) and the ingestion graph
//! - The dispatcher, the single completion callback that records outcomes and
//!   submits follow-up jobs
//! - An in-process worker with bounded concurrency, retries and timeouts
//! - A watchdog that fails cells of documents that stopped making progress
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docflow_jobs::{ingestion_graph, job_queue, Dispatcher, GraphConfig, Ingestor, WorkerBuilder};
//! use docflow_db::InMemoryDocumentStore;
//!
//! let config = GraphConfig::from_env();
//! let table = Arc::new(ingestion_graph(&config)?);
//! let (executor, queue) = job_queue(1024);
//! let dispatcher = Arc::new(Dispatcher::new(
//!     table,
//!     Arc::new(InMemoryDocumentStore::new()),
//!     Arc::new(executor),
//! ));
//!
//! let handle = WorkerBuilder::new(dispatcher.clone(), queue)
//!     .with_handler(MyOcrHandler::new())
//!     .build()
//!     .await
//!     .start();
//!
//! Ingestor::new(dispatcher, config)
//!     .ingest_file(project_id, "upload.zip", None)
//!     .await?;
//! handle.wait_idle().await?;
//! ```

pub mod dispatcher;
pub mod graph;
pub mod handler;
pub mod ingest;
pub mod testing;
pub mod tracker;
pub mod transitions;
pub mod watchdog;
pub mod worker;

// Re-export core types
pub use docflow_core::*;

pub use dispatcher::{Completion, DispatchReport, Dispatcher};
pub use graph::{ingestion_graph, GraphConfig};
pub use handler::{JobContext, JobHandler, JobResult};
pub use ingest::{Ingested, Ingestor};
pub use testing::{
    Executed, FailingHandler, Harness, RecordingExecutor, SimulatedHandler, SimulationProfile,
};
pub use tracker::CompletionTracker;
pub use transitions::{
    Direct, Edge, LoopItem, NextJob, Spawn, TransitionContext, TransitionTable,
    TransitionTableBuilder,
};
pub use watchdog::{SweepReport, Watchdog, WatchdogConfig};
pub use worker::{
    job_queue, ChannelExecutor, JobQueue, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
