//! In-process job execution service.
//!
//! [`ChannelExecutor`] is the submitting side (it implements
//! [`JobExecutor`]); [`JobWorker`] drains the queue, runs handlers with
//! bounded concurrency, retries and timeouts, and reports every finished job
//! to the [`Dispatcher`]. A completion is delivered again only when some of
//! its follow-ups could not be started.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use docflow_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_MAX_CONCURRENT, JOB_MAX_RETRIES, JOB_QUEUE_CAPACITY,
    JOB_RETRY_DELAY_MS, JOB_TIMEOUT_SECS,
};
use docflow_core::{extract_timestamp, Error, JobExecutor, JobRequest, JobType, Result};

use crate::dispatcher::{Completion, Dispatcher};
use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs running at once.
    pub max_concurrent_jobs: usize,
    /// Per-attempt execution timeout.
    pub job_timeout_secs: u64,
    /// Retries granted to a handler returning `Retry`.
    pub max_retries: u32,
    /// Pause between retry attempts.
    pub retry_delay_ms: u64,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Whether job processing is enabled.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            max_retries: JOB_MAX_RETRIES,
            retry_delay_ms: JOB_RETRY_DELAY_MS,
            queue_capacity: JOB_QUEUE_CAPACITY,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let enabled = std::env::var("DOCFLOW_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("DOCFLOW_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let job_timeout_secs = std::env::var("DOCFLOW_JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_TIMEOUT_SECS);

        let max_retries = std::env::var("DOCFLOW_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(JOB_MAX_RETRIES);

        let queue_capacity = std::env::var("DOCFLOW_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_QUEUE_CAPACITY)
            .max(1);

        Self {
            max_concurrent_jobs,
            job_timeout_secs,
            max_retries,
            queue_capacity,
            enabled,
            ..Self::default()
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A handler asked for another attempt.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        attempt: u32,
        error: String,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

// =============================================================================
// QUEUE
// =============================================================================

/// Submitting side of the in-process queue.
#[derive(Clone)]
pub struct ChannelExecutor {
    tx: mpsc::Sender<JobRequest>,
    in_flight: Arc<watch::Sender<usize>>,
}

/// Receiving side of the in-process queue, consumed by [`JobWorker`].
pub struct JobQueue {
    rx: mpsc::Receiver<JobRequest>,
    in_flight: Arc<watch::Sender<usize>>,
}

/// Create a bounded job queue.
pub fn job_queue(capacity: usize) -> (ChannelExecutor, JobQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (in_flight, _) = watch::channel(0usize);
    let in_flight = Arc::new(in_flight);
    (
        ChannelExecutor {
            tx,
            in_flight: in_flight.clone(),
        },
        JobQueue { rx, in_flight },
    )
}

impl ChannelExecutor {
    /// Jobs submitted and not yet reported to the dispatcher.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }
}

#[async_trait]
impl JobExecutor for ChannelExecutor {
    async fn submit(&self, request: JobRequest) -> Result<()> {
        // Counted before sending so a parent's children are in flight
        // before the parent itself is released.
        self.in_flight.send_modify(|n| *n += 1);
        if let Err(e) = self.tx.send(request).await {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            return Err(Error::Submit(format!(
                "Job queue closed, dropped {} job",
                e.0.job_type
            )));
        }
        Ok(())
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Handle for controlling a running worker.
///
/// Dropping the handle stops the worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    in_flight: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait until every submitted job, including follow-ups, has been
    /// reported to the dispatcher.
    pub async fn wait_idle(&self) -> Result<()> {
        let mut in_flight = self.in_flight.clone();
        in_flight
            .wait_for(|n| *n == 0)
            .await
            .map_err(|_| Error::Internal("Job queue dropped while waiting".into()))?;
        Ok(())
    }

    /// Shut down and wait for running jobs to finish.
    pub async fn join(self) -> Result<()> {
        // The worker may already have stopped on its own.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Job worker that processes jobs from the in-process queue.
pub struct JobWorker {
    dispatcher: Arc<Dispatcher>,
    queue: JobQueue,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(dispatcher: Arc<Dispatcher>, queue: JobQueue, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            dispatcher,
            queue,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let in_flight = self.queue.in_flight.subscribe();

        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            in_flight,
            task,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "Job worker is disabled, not starting"
            );
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            max_concurrent = self.config.max_concurrent_jobs,
            max_retries = self.config.max_retries,
            job_timeout_secs = self.config.job_timeout_secs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let request = tokio::select! {
                _ = shutdown_rx.recv() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked");
                    }
                    continue;
                }
                request = self.queue.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let worker = self.clone_refs();
            tasks.spawn(async move {
                worker.execute_job(request).await;
                drop(permit);
            });
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            running = tasks.len(),
            "Job worker draining running jobs"
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            dispatcher: self.dispatcher.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            in_flight: self.queue.in_flight.clone(),
            config: self.config.clone(),
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    dispatcher: Arc<Dispatcher>,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    in_flight: Arc<watch::Sender<usize>>,
    config: WorkerConfig,
}

impl JobWorkerRef {
    /// Execute a single job, then report it to the dispatcher.
    async fn execute_job(self, request: JobRequest) {
        let start = Instant::now();
        let job_id = request.job_id;
        let job_type = request.job_type;
        let document_id = request.input.document_id();
        let queued_ms = extract_timestamp(&job_id)
            .map(|submitted| (Utc::now() - submitted).num_milliseconds().max(0))
            .unwrap_or(0);

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            job_type = %job_type,
            document_id = ?document_id,
            queued_ms,
            "Processing job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        let result = self.run_with_retries(&request).await;
        let completion = match result {
            JobResult::Success(output) => Completion::Succeeded(output),
            JobResult::Failed(error) | JobResult::Retry(error) => Completion::Failed(error),
        };

        match &completion {
            Completion::Succeeded(_) => {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            Completion::Failed(error) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error: error.clone(),
                });
            }
        }

        self.report(&request, completion).await;
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Hand the completion to the dispatcher. Follow-ups that could not be
    /// started are retried by delivering the same completion again, up to
    /// `max_retries` times.
    async fn report(&self, request: &JobRequest, completion: Completion) {
        let job_id = request.job_id;
        let job_type = request.job_type;
        let document_id = request.input.document_id();

        let mut delivery = 1;
        loop {
            let result = self
                .dispatcher
                .on_job_finished(job_id, job_type, &request.input, completion.clone())
                .await;
            match result {
                Ok(report) if report.errors.is_empty() => return,
                Ok(report) if delivery <= self.config.max_retries => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        document_id = ?document_id,
                        delivery,
                        failed_follow_ups = report.errors.len(),
                        "Follow-up jobs not started, redelivering completion"
                    );
                    delivery += 1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Ok(report) => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        document_id = ?document_id,
                        deliveries = delivery,
                        errors = ?report.errors,
                        "Gave up starting follow-up jobs"
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        document_id = ?document_id,
                        contract_violation = e.is_contract_violation(),
                        error = %e,
                        "Dispatcher rejected job completion"
                    );
                    return;
                }
            }
        }
    }

    async fn run_with_retries(&self, request: &JobRequest) -> JobResult {
        let job_id = request.job_id;
        let job_type = request.job_type;

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };
        let Some(handler) = handler else {
            warn!(
                subsystem = "jobs",
                component = "worker",
                job_type = %job_type,
                "No handler registered for job type"
            );
            return JobResult::Failed(format!("No handler for job type: {}", job_type));
        };

        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        let mut attempt = 1;
        loop {
            let event_tx = self.event_tx.clone();
            let ctx = JobContext::new(request.clone())
                .with_attempt(attempt)
                .with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        percent,
                        message: message.map(String::from),
                    });
                });

            let result = match tokio::time::timeout(job_timeout, handler.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        "Job exceeded timeout of {}s",
                        self.config.job_timeout_secs
                    );
                    JobResult::Failed(format!(
                        "Job exceeded timeout of {}s",
                        self.config.job_timeout_secs
                    ))
                }
            };

            match result {
                JobResult::Retry(error) if attempt <= self.config.max_retries => {
                    debug!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = %job_type,
                        attempt,
                        %error,
                        "Job asked for retry"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobRetrying {
                        job_id,
                        job_type,
                        attempt,
                        error,
                    });
                    attempt += 1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                JobResult::Retry(error) => {
                    return JobResult::Failed(format!(
                        "Gave up after {} attempts: {}",
                        attempt, error
                    ))
                }
                other => return other,
            }
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    dispatcher: Arc<Dispatcher>,
    queue: JobQueue,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(dispatcher: Arc<Dispatcher>, queue: JobQueue) -> Self {
        Self {
            dispatcher,
            queue,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add boxed handlers, e.g. one per job type.
    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Box<dyn JobHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Build and return the worker.
    pub async fn build(self) -> JobWorker {
        let worker = JobWorker::new(self.dispatcher, self.queue, self.config);

        for handler in self.handlers {
            let job_type = handler.job_type();
            let mut handlers = worker.handlers.write().await;
            handlers.insert(job_type, Arc::from(handler));
        }

        worker
    }
}
