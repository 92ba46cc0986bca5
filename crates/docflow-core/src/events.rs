//! Pipeline event types, envelope, and event bus.
//!
//! The dispatcher, the ingestion entry points and the watchdog publish
//! document lifecycle events on a single broadcast channel. Consumers
//! (progress reporting, CLI output, tests) subscribe independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{DocType, JobType};

// ============================================================================
// Event Envelope
// ============================================================================

/// Self-describing wrapper around a [`PipelineEvent`].
///
/// `event_type` uses dot-namespaced names (e.g. `"document.finished"`).
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Document or job the event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    pub payload: PipelineEvent,
}

impl EventEnvelope {
    pub fn new(event: PipelineEvent) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            entity_id: event.entity_id(),
            payload: event,
        }
    }
}

// ============================================================================
// Pipeline Event (domain payloads)
// ============================================================================

/// Domain events of the ingestion graph, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A document row was created (upload or fan-out child).
    DocumentCreated {
        document_id: Uuid,
        project_id: Uuid,
        doctype: DocType,
        #[serde(skip_serializing_if = "Option::is_none")]
        folder_id: Option<Uuid>,
    },
    /// A job was handed to the execution service.
    JobSubmitted {
        job_id: Uuid,
        job_type: JobType,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<Uuid>,
    },
    /// A job completed successfully.
    JobSucceeded {
        job_type: JobType,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<Uuid>,
    },
    /// A job reported failure.
    JobFailed {
        job_type: JobType,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<Uuid>,
        error: String,
    },
    /// A completion for an already-dispatched (job type, document) arrived again.
    DuplicateCompletion {
        job_type: JobType,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<Uuid>,
    },
    /// Every expected cell of the document succeeded.
    DocumentFinished { document_id: Uuid, doctype: DocType },
    /// At least one expected cell of the document failed.
    DocumentErroneous {
        document_id: Uuid,
        doctype: DocType,
        failed_jobs: Vec<JobType>,
    },
    /// The watchdog failed a cell that stayed pending for too long.
    CellMarkedStale { document_id: Uuid, job_type: JobType },
    /// A branch could not continue; its pending cells were failed.
    BranchAbandoned {
        document_id: Uuid,
        job_type: JobType,
        reason: String,
        failed_jobs: Vec<JobType>,
    },
    /// A document was removed again because its entry job was not accepted.
    DocumentRolledBack { document_id: Uuid, error: String },
}

impl PipelineEvent {
    /// Legacy event type name (PascalCase variant name).
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DocumentCreated { .. } => "DocumentCreated",
            PipelineEvent::JobSubmitted { .. } => "JobSubmitted",
            PipelineEvent::JobSucceeded { .. } => "JobSucceeded",
            PipelineEvent::JobFailed { .. } => "JobFailed",
            PipelineEvent::DuplicateCompletion { .. } => "DuplicateCompletion",
            PipelineEvent::DocumentFinished { .. } => "DocumentFinished",
            PipelineEvent::DocumentErroneous { .. } => "DocumentErroneous",
            PipelineEvent::CellMarkedStale { .. } => "CellMarkedStale",
            PipelineEvent::BranchAbandoned { .. } => "BranchAbandoned",
            PipelineEvent::DocumentRolledBack { .. } => "DocumentRolledBack",
        }
    }

    /// Namespaced event type for the envelope (e.g. `"job.failed"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DocumentCreated { .. } => "document.created",
            PipelineEvent::JobSubmitted { .. } => "job.submitted",
            PipelineEvent::JobSucceeded { .. } => "job.succeeded",
            PipelineEvent::JobFailed { .. } => "job.failed",
            PipelineEvent::DuplicateCompletion { .. } => "job.duplicate",
            PipelineEvent::DocumentFinished { .. } => "document.finished",
            PipelineEvent::DocumentErroneous { .. } => "document.erroneous",
            PipelineEvent::CellMarkedStale { .. } => "document.cell_stale",
            PipelineEvent::BranchAbandoned { .. } => "document.branch_abandoned",
            PipelineEvent::DocumentRolledBack { .. } => "document.rolled_back",
        }
    }

    /// Primary entity the event relates to.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            PipelineEvent::JobSubmitted { job_id, .. } => Some(*job_id),
            PipelineEvent::DocumentCreated { document_id, .. }
            | PipelineEvent::DocumentFinished { document_id, .. }
            | PipelineEvent::DocumentErroneous { document_id, .. }
            | PipelineEvent::CellMarkedStale { document_id, .. }
            | PipelineEvent::BranchAbandoned { document_id, .. }
            | PipelineEvent::DocumentRolledBack { document_id, .. } => Some(*document_id),
            PipelineEvent::JobSucceeded { document_id, .. }
            | PipelineEvent::JobFailed { document_id, .. }
            | PipelineEvent::DuplicateCompletion { document_id, .. } => *document_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
