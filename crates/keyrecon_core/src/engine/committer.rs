//! Batch committer.
//!
//! # Invariants
//! - One store call per commit; none for an empty batch.
//! - Results follow input order; each record ends `Persisted` or `Rejected`.
//! - No automatic retry. Retry policy belongs to the caller.

use crate::engine::cancel::CancellationToken;
use crate::engine::error::{EngineError, EngineResult};
use crate::model::record::{DomainRecord, RecordId};
use crate::repo::record_store::{RecordStore, StoreError, WriteMode};
use log::{info, warn};
use std::time::Instant;

/// Per-record commit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Persisted(RecordId),
    Rejected(String),
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn persisted_id(&self) -> Option<RecordId> {
        match self {
            Self::Persisted(id) => Some(*id),
            _ => None,
        }
    }
}

/// Writes `records` of `kind` in one store call.
///
/// # Errors
/// - `EngineError::Cancelled` when `cancel` fired before or during the call.
/// - `EngineError::StoreUnavailable` when the call fails as a whole or the
///   store answers with a result count that does not match the input.
pub fn commit<S>(
    store: &S,
    kind: &str,
    records: &[DomainRecord],
    mode: WriteMode,
    cancel: &CancellationToken,
) -> EngineResult<Vec<RecordState>>
where
    S: RecordStore + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let started_at = Instant::now();
    let mut states = vec![RecordState::Pending; records.len()];
    let outcomes = store.write_batch(kind, records, mode, cancel)?;
    if outcomes.len() != records.len() {
        return Err(EngineError::StoreUnavailable(StoreError::InvalidData(format!(
            "store returned {} outcomes for {} {kind} records",
            outcomes.len(),
            records.len()
        ))));
    }

    for (state, outcome) in states.iter_mut().zip(outcomes) {
        *state = match outcome {
            Ok(id) => RecordState::Persisted(id),
            Err(message) => RecordState::Rejected(message),
        };
    }

    let rejected = states
        .iter()
        .filter(|state| matches!(state, RecordState::Rejected(_)))
        .count();
    if rejected > 0 {
        warn!(
            "event=batch_commit module=engine status=partial kind={} mode={} records={} rejected={}",
            kind,
            mode.as_str(),
            records.len(),
            rejected
        );
    }
    info!(
        "event=batch_commit module=engine status=ok kind={} mode={} records={} duration_ms={}",
        kind,
        mode.as_str(),
        records.len(),
        started_at.elapsed().as_millis()
    );
    Ok(states)
}
