//! Per-document completion vector.
//!
//! One cell per job type in `ExpectedJobs[doctype]`, each holding a
//! three-state [`CellStatus`]. The aggregate status is always recomputed
//! from the cells, never cached.
//!
//! Recording rules:
//! - A cell is written once: `NotStarted` moves to `Succeeded` or `Failed`
//!   and never changes again. `Failed` is sticky, and so is `Succeeded`, so
//!   a Finished document stays Finished.
//! - Re-recording the value a cell already holds is a no-op.
//! - Job types outside the expected set are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{AggregateStatus, CellStatus, DocType, JobType};
use crate::registry::expected_jobs;

/// Result of applying one outcome to a completion vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Aggregate status before the recording.
    pub previous: AggregateStatus,
    /// Aggregate status after the recording.
    pub current: AggregateStatus,
    /// Whether the cell value actually changed.
    pub cell_changed: bool,
    /// Whether the job type has a cell for this document at all.
    pub tracked: bool,
    /// Value the cell holds after the recording.
    pub cell: Option<CellStatus>,
}

impl RecordOutcome {
    /// True when this recording moved the document into a terminal status.
    pub fn became_terminal(&self) -> bool {
        !self.previous.is_terminal() && self.current.is_terminal()
    }

    /// True when a success was recorded over a cell that had already failed.
    pub fn rejected_by_failure(&self, attempted: CellStatus) -> bool {
        attempted == CellStatus::Succeeded && self.cell == Some(CellStatus::Failed)
    }

    /// True when the attempted value lost to a different value already
    /// settled in the cell.
    pub fn conflicted(&self, attempted: CellStatus) -> bool {
        match self.cell {
            Some(settled) => settled != CellStatus::NotStarted && settled != attempted,
            None => false,
        }
    }
}

/// Completion cells for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionVector {
    cells: BTreeMap<JobType, CellStatus>,
}

impl CompletionVector {
    /// A vector with every expected cell pending.
    pub fn new(doctype: DocType) -> Self {
        Self {
            cells: expected_jobs(doctype)
                .iter()
                .map(|jt| (*jt, CellStatus::NotStarted))
                .collect(),
        }
    }

    /// Rebuild a vector from stored cells. Cells outside the expected set are
    /// dropped and missing expected cells start pending.
    pub fn from_cells(
        doctype: DocType,
        stored: impl IntoIterator<Item = (JobType, CellStatus)>,
    ) -> Self {
        let mut vector = Self::new(doctype);
        for (job_type, status) in stored {
            if let Some(cell) = vector.cells.get_mut(&job_type) {
                *cell = status;
            }
        }
        vector
    }

    /// Apply an outcome to the cell for `job_type`.
    pub fn record(&mut self, job_type: JobType, status: CellStatus) -> RecordOutcome {
        let previous = self.aggregate();
        let Some(cell) = self.cells.get_mut(&job_type) else {
            return RecordOutcome {
                previous,
                current: previous,
                cell_changed: false,
                tracked: false,
                cell: None,
            };
        };

        let cell_changed = match (*cell, status) {
            (CellStatus::NotStarted, CellStatus::NotStarted) => false,
            (CellStatus::NotStarted, next) => {
                *cell = next;
                true
            }
            _ => false,
        };
        let cell = Some(*cell);

        RecordOutcome {
            previous,
            current: self.aggregate(),
            cell_changed,
            tracked: true,
            cell,
        }
    }

    /// Finished iff all cells succeeded, Erroneous iff any failed.
    pub fn aggregate(&self) -> AggregateStatus {
        if self.cells.values().any(|c| *c == CellStatus::Failed) {
            AggregateStatus::Erroneous
        } else if self.cells.values().all(|c| *c == CellStatus::Succeeded) {
            AggregateStatus::Finished
        } else {
            AggregateStatus::Processing
        }
    }

    /// Number of succeeded cells (progress counter).
    pub fn processed_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| **c == CellStatus::Succeeded)
            .count()
    }

    /// Sum of the legacy numeric cell encoding.
    ///
    /// Negative iff some cell failed; equal to `len()` iff finished.
    pub fn numeric_sum(&self) -> i32 {
        self.cells.values().map(|c| i32::from(c.as_i16())).sum()
    }

    pub fn get(&self, job_type: JobType) -> Option<CellStatus> {
        self.cells.get(&job_type).copied()
    }

    pub fn is_tracked(&self, job_type: JobType) -> bool {
        self.cells.contains_key(&job_type)
    }

    pub fn pending_jobs(&self) -> Vec<JobType> {
        self.jobs_with(CellStatus::NotStarted)
    }

    pub fn failed_jobs(&self) -> Vec<JobType> {
        self.jobs_with(CellStatus::Failed)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobType, CellStatus)> + '_ {
        self.cells.iter().map(|(jt, c)| (*jt, *c))
    }

    fn jobs_with(&self, status: CellStatus) -> Vec<JobType> {
        self.cells
            .iter()
            .filter(|(_, c)| **c == status)
            .map(|(jt, _)| *jt)
            .collect()
    }
}
