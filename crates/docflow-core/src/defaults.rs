//! Centralized default constants for docflow.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// COMPLETION TRACKING
// =============================================================================

/// Numeric encoding of a failed cell in exported/legacy completion vectors.
///
/// Its magnitude must exceed the largest expected-job set so that a sum of
/// cells is negative whenever any cell failed.
pub const FAILED_CELL_SENTINEL: i16 = -100;

// =============================================================================
// INGESTION GRAPH
// =============================================================================

/// Languages the NLP annotation stage has models for.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "de", "it"];

/// PDFs are split into child documents of at most this many pages.
pub const PAGES_PER_CHUNK: u32 = 10;

// =============================================================================
// JOB WORKER
// =============================================================================

/// Maximum number of retries for a job handler returning `Retry`.
pub const JOB_MAX_RETRIES: u32 = 3;

/// Maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Per-job execution timeout.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Bounded capacity of the in-process job queue.
pub const JOB_QUEUE_CAPACITY: usize = 1024;

/// Delay between retry attempts.
pub const JOB_RETRY_DELAY_MS: u64 = 250;

// =============================================================================
// WATCHDOG
// =============================================================================

/// A Processing document untouched for this long has its pending cells failed.
pub const STALE_AFTER_SECS: u64 = 3600;

/// Interval between watchdog sweeps.
pub const WATCHDOG_INTERVAL_SECS: u64 = 60;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the pipeline event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, JobType};
    use crate::registry::expected_jobs;

    #[test]
    fn test_failed_sentinel_dominates_every_expected_set() {
        for doctype in DocType::ALL {
            let max_sum = expected_jobs(doctype).len() as i16;
            assert!(
                FAILED_CELL_SENTINEL + max_sum < 0,
                "sentinel must dominate {doctype} partial sums"
            );
        }
        assert!(JobType::ALL.len() < FAILED_CELL_SENTINEL.unsigned_abs() as usize);
    }

    #[test]
    fn test_supported_languages_are_iso_codes() {
        for lang in SUPPORTED_LANGUAGES {
            assert_eq!(lang.len(), 2);
            assert_eq!(*lang, lang.to_lowercase());
        }
    }
}
