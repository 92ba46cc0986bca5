//! UUID v7 utilities for time-ordered identifiers.
//!
//! Documents and jobs get UUIDv7 ids, so the id alone tells when a job was
//! submitted (the worker uses this to report queue wait time).

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Extract the embedded timestamp from a UUIDv7.
///
/// Returns `None` if the UUID is not version 7.
///
/// # Example
///
/// ```
/// use docflow_core::uuid_utils::{extract_timestamp, new_v7};
///
/// let id = new_v7();
/// assert!(extract_timestamp(&id).is_some());
/// ```
pub fn extract_timestamp(uuid: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(uuid) {
        return None;
    }
    let bytes = uuid.as_bytes();
    let millis = bytes[..6]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}
