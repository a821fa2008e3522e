//! Per-binding record of processed delivery identifiers.
//!
//! A component checks [`is_duplicate`] before doing any work and calls
//! [`record`] once its side effects are done. The record is written in the
//! delivery's transaction, so it exists only if the whole delivery commits.
//! A delivery that fails after a remote call went out leaves no record, and
//! the sender's retry repeats that call: remote side effects are
//! at-least-once, local bookkeeping is exactly-once.
//!
//! Records older than the retention window are dropped by [`prune`]. The
//! window must stay longer than the sender's retry horizon, otherwise a late
//! retry is processed twice.

use chrono::{DateTime, Utc};

use crate::error::{ComponentError, StoreError};
use crate::storage::BucketMut;
use crate::types::Delivery;

pub const DELIVERIES: &str = "deliveries";

/// Creates the `deliveries` sub-namespace. Called from `init`.
pub fn provision(ns: &mut BucketMut<'_>) -> Result<(), StoreError> {
    ns.create_bucket_if_not_exists(DELIVERIES)?;
    Ok(())
}

/// The delivery identifier, required by every deduplicating component.
pub fn delivery_id(delivery: &Delivery) -> Result<&str, ComponentError> {
    delivery
        .id
        .as_deref()
        .ok_or(ComponentError::MissingDeliveryId)
}

pub fn is_duplicate(ns: &BucketMut<'_>, id: &str) -> Result<bool, StoreError> {
    let log = ns
        .bucket(DELIVERIES)
        .ok_or_else(|| StoreError::BucketNotFound(DELIVERIES.to_string()))?;
    Ok(log.contains(id))
}

pub fn record(ns: &mut BucketMut<'_>, id: &str) -> Result<(), StoreError> {
    ns.bucket_mut(DELIVERIES)?
        .put(id, Utc::now().to_rfc3339())
}

/// Drops records written before `cutoff`, returning how many went.
/// Namespaces without a log are left alone.
pub fn prune(ns: &mut BucketMut<'_>, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
    let expired: Vec<String> = match ns.bucket(DELIVERIES) {
        Some(log) => log
            .values()
            .filter(|(_, raw)| recorded_before(raw, cutoff))
            .map(|(id, _)| id.to_string())
            .collect(),
        None => return Ok(0),
    };
    if expired.is_empty() {
        return Ok(0);
    }
    let mut log = ns.bucket_mut(DELIVERIES)?;
    for id in &expired {
        log.delete(id)?;
    }
    Ok(expired.len())
}

/// Unreadable timestamps are kept.
fn recorded_before(raw: &[u8], cutoff: DateTime<Utc>) -> bool {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|at| at.with_timezone(&Utc) < cutoff)
}
