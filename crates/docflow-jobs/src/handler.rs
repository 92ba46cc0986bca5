//! Job handlers for each job type.

use async_trait::async_trait;
use uuid::Uuid;

use docflow_core::{JobInput, JobOutput, JobRequest, JobType};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub request: JobRequest,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            attempt: 1,
            progress_callback: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.request.job_id
    }

    /// Get the document ID for this job, if any.
    pub fn document_id(&self) -> Option<Uuid> {
        self.request.input.document_id()
    }

    /// Get the typed job input.
    pub fn input(&self) -> &JobInput {
        &self.request.input
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with its typed output.
    Success(JobOutput),
    /// Job failed with an error message.
    Failed(String),
    /// Job should be retried after a delay.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}
