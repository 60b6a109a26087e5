//! Per-position outcome reports and the reconcile-then-commit step.

use crate::engine::cancel::CancellationToken;
use crate::engine::committer::{commit, RecordState};
use crate::engine::error::{EngineResult, RecordError, RecordFailure};
use crate::engine::reconciler::{ReconcileAction, ReconciliationBatch};
use crate::model::record::{DomainRecord, RecordId};
use crate::repo::record_store::{RecordStore, WriteMode};

/// Final outcome of one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(RecordId),
    Updated(RecordId),
    Deleted(RecordId),
    Failed(RecordError),
}

impl RecordOutcome {
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Deleted(id) => Some(*id),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RecordError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Outcome of one input record at its input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub position: usize,
    /// Natural key, when one was extracted.
    pub key: Option<String>,
    pub outcome: RecordOutcome,
}

/// Outcomes of one call for one kind, one report per input record in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub kind: String,
    pub records: Vec<RecordReport>,
}

impl UpsertReport {
    pub fn new(kind: impl Into<String>, mut records: Vec<RecordReport>) -> Self {
        records.sort_by_key(|report| report.position);
        Self {
            kind: kind.into(),
            records,
        }
    }

    pub fn created(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Created(_)))
    }

    pub fn updated(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Updated(_)))
    }

    pub fn deleted(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Deleted(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| !outcome.is_success())
    }

    /// Ids in input order; `None` for failed records.
    pub fn ids(&self) -> Vec<Option<RecordId>> {
        self.records
            .iter()
            .map(|report| report.outcome.id())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordReport> {
        self.records
            .iter()
            .filter(|report| !report.outcome.is_success())
    }

    fn count(&self, predicate: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.records
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// Writes updates and creates of `batch` in one upsert call and fans the
/// per-record states out to every input position.
///
/// Positions folded into one entry share that entry's outcome.
pub fn commit_batch<S>(
    store: &S,
    kind: &str,
    batch: ReconciliationBatch,
    cancel: &CancellationToken,
) -> EngineResult<Vec<RecordReport>>
where
    S: RecordStore + ?Sized,
{
    let entries: Vec<(ReconcileAction, String, Vec<usize>)> = batch
        .entries()
        .map(|(action, entry)| (action, entry.key.clone(), entry.positions.clone()))
        .collect();
    let records: Vec<DomainRecord> = batch
        .to_update
        .into_iter()
        .chain(batch.to_create)
        .map(|entry| entry.record)
        .collect();

    let states = commit(store, kind, &records, WriteMode::Upsert, cancel)?;

    let mut reports = failure_reports(batch.failures);
    for ((action, key, positions), state) in entries.into_iter().zip(states) {
        let outcome = match (state, action) {
            (RecordState::Persisted(id), ReconcileAction::Update) => RecordOutcome::Updated(id),
            (RecordState::Persisted(id), ReconcileAction::Create) => RecordOutcome::Created(id),
            (RecordState::Rejected(message), _) => {
                RecordOutcome::Failed(RecordError::StoreRejection {
                    kind: kind.to_string(),
                    message,
                })
            }
            (RecordState::Pending, _) => RecordOutcome::Failed(RecordError::StoreRejection {
                kind: kind.to_string(),
                message: "record was not written".to_string(),
            }),
        };
        for position in positions {
            reports.push(RecordReport {
                position,
                key: Some(key.clone()),
                outcome: outcome.clone(),
            });
        }
    }
    Ok(reports)
}

/// Converts collected failures into reports.
pub fn failure_reports(failures: Vec<RecordFailure>) -> Vec<RecordReport> {
    failures
        .into_iter()
        .map(|failure| RecordReport {
            position: failure.position,
            key: None,
            outcome: RecordOutcome::Failed(failure.error),
        })
        .collect()
}
