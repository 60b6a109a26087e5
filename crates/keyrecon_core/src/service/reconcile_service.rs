//! Reconciliation use-case service.
//!
//! # Responsibility
//! - Run the full index → reconcile → link → commit pipeline per use-case.
//! - Report one outcome per input record, in input order.
//!
//! # Invariants
//! - Each use-case issues at most one `find` and one `write_batch` per kind.
//! - Per-record failures never abort a call; store failures always do.
//! - Service layer remains storage-agnostic.

use crate::config::{KindConfig, LinkSpec};
use crate::engine::cancel::CancellationToken;
use crate::engine::committer::{commit, RecordState};
use crate::engine::error::{EngineError, EngineResult, RecordError, RecordFailure};
use crate::engine::index::build_index;
use crate::engine::key::extract_key;
use crate::engine::linker::{ParentLinker, ParentSummary};
use crate::engine::reconciler::{reconcile, ReconciliationBatch};
use crate::engine::report::{
    commit_batch, failure_reports, RecordOutcome, RecordReport, UpsertReport,
};
use crate::model::record::{AttrValue, DomainRecord, RecordId};
use crate::repo::record_store::{Predicate, RecordStore, WriteMode};
use log::info;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock returning epoch milliseconds, used to resolve date defaults.
pub type Clock = fn() -> i64;

/// Outcome of a child upsert with parent linking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedUpsertReport {
    /// One report per input child, in input order.
    pub children: UpsertReport,
    pub parents: ParentSummary,
}

/// Use-case service over a [`RecordStore`].
pub struct ReconcileService<S: RecordStore> {
    store: S,
    clock: Clock,
}

impl<S: RecordStore> ReconcileService<S> {
    /// Creates a service using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, system_clock)
    }

    /// Creates a service with an injected clock.
    pub fn with_clock(store: S, clock: Clock) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles without writing; shows what an upsert would do.
    pub fn preview(
        &self,
        config: &KindConfig,
        candidates: Vec<DomainRecord>,
        cancel: &CancellationToken,
    ) -> EngineResult<ReconciliationBatch> {
        config.validate()?;
        let keys = candidate_keys(config, &candidates);
        let index = build_index(&self.store, config, &keys, cancel)?;
        Ok(reconcile(config, candidates, &index, (self.clock)()))
    }

    /// Upserts `candidates` by natural key.
    ///
    /// Matched records are updated in place, the rest are created with the
    /// configured defaults; everything is written in one upsert call.
    pub fn upsert_by_key(
        &self,
        config: &KindConfig,
        candidates: Vec<DomainRecord>,
        cancel: &CancellationToken,
    ) -> EngineResult<UpsertReport> {
        let started_at = Instant::now();
        let total = candidates.len();
        let batch = self.preview(config, candidates, cancel)?;
        let reports = commit_batch(&self.store, &config.kind, batch, cancel)?;
        let report = UpsertReport::new(config.kind.clone(), reports);

        log_report("upsert_by_key", &report, total, started_at);
        Ok(report)
    }

    /// Creates every record without matching (pure create flow).
    pub fn insert_all(
        &self,
        kind: &str,
        records: Vec<DomainRecord>,
        cancel: &CancellationToken,
    ) -> EngineResult<UpsertReport> {
        let started_at = Instant::now();
        let total = records.len();
        let states = commit(&self.store, kind, &records, WriteMode::Insert, cancel)?;
        let reports = states
            .into_iter()
            .enumerate()
            .map(|(position, state)| RecordReport {
                position,
                key: None,
                outcome: state_outcome(kind, state, RecordOutcome::Created),
            })
            .collect();
        let report = UpsertReport::new(kind, reports);

        log_report("insert_all", &report, total, started_at);
        Ok(report)
    }

    /// Upserts children by their own natural key after linking each to a
    /// get-or-created parent.
    ///
    /// Children are keyed before linking, so a child without its own key
    /// never causes a parent to be created. Children whose reference is
    /// missing, or whose parent was rejected by the store, are reported and
    /// excluded from the child write. Matched children always receive the
    /// resolved parent id, whatever `child.mutable_attributes` allows.
    pub fn upsert_with_parents(
        &self,
        child: &KindConfig,
        link: &LinkSpec,
        children: Vec<DomainRecord>,
        cancel: &CancellationToken,
    ) -> EngineResult<LinkedUpsertReport> {
        child.validate()?;
        link.validate_for_child(child)?;
        let started_at = Instant::now();
        let total = children.len();
        let now_epoch_ms = (self.clock)();

        let mut failures = Vec::new();
        let mut keyed_positions = Vec::with_capacity(children.len());
        let mut keyed = Vec::with_capacity(children.len());
        for (position, record) in children.into_iter().enumerate() {
            match extract_key(&record, &child.key_attribute) {
                Ok(_) => {
                    keyed_positions.push(position);
                    keyed.push(record);
                }
                Err(error) => failures.push(RecordFailure { position, error }),
            }
        }

        let linker = ParentLinker::new(&self.store, link, now_epoch_ms, cancel);
        let linked = linker.link_by_reference(keyed)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        failures.extend(linked.failures.into_iter().map(|failure| RecordFailure {
            position: keyed_positions[failure.position],
            error: failure.error,
        }));

        let mut positions = Vec::with_capacity(linked.linked.len());
        let mut parent_ids = Vec::with_capacity(linked.linked.len());
        let mut records = Vec::with_capacity(linked.linked.len());
        for entry in linked.linked {
            positions.push(keyed_positions[entry.position]);
            parent_ids.push(entry.parent_id);
            records.push(entry.record);
        }

        let keys = candidate_keys(child, &records);
        let index = build_index(&self.store, child, &keys, cancel)?;
        let mut batch = reconcile(child, records, &index, now_epoch_ms);
        for entry in &mut batch.to_update {
            // Folded entries keep the link of their last occurrence.
            if let Some(&last) = entry.positions.last() {
                entry.record.set(
                    link.foreign_key_attribute.clone(),
                    AttrValue::from(parent_ids[last]),
                );
            }
        }

        let mut reports = commit_batch(&self.store, &child.kind, batch, cancel)?;
        for report in &mut reports {
            report.position = positions[report.position];
        }
        reports.extend(failure_reports(failures));

        let report = LinkedUpsertReport {
            children: UpsertReport::new(child.kind.clone(), reports),
            parents: linked.parents,
        };
        log_report("upsert_with_parents", &report.children, total, started_at);
        Ok(report)
    }

    /// Loads one record by id.
    pub fn get_record(
        &self,
        kind: &str,
        id: RecordId,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<DomainRecord>> {
        let mut found = self.store.find(kind, &Predicate::IdIn(vec![id]), cancel)?;
        Ok(found.pop())
    }

    /// Lists every record of `kind` in creation order.
    pub fn list_records(
        &self,
        kind: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<DomainRecord>> {
        Ok(self.store.find(kind, &Predicate::All, cancel)?)
    }

    /// Deletes records by id in one call.
    pub fn delete_records(
        &self,
        kind: &str,
        ids: &[RecordId],
        cancel: &CancellationToken,
    ) -> EngineResult<UpsertReport> {
        let started_at = Instant::now();
        let records: Vec<DomainRecord> = ids
            .iter()
            .map(|id| DomainRecord::with_id(kind, *id))
            .collect();
        let states = commit(&self.store, kind, &records, WriteMode::Delete, cancel)?;
        let reports = states
            .into_iter()
            .enumerate()
            .map(|(position, state)| RecordReport {
                position,
                key: None,
                outcome: state_outcome(kind, state, RecordOutcome::Deleted),
            })
            .collect();
        let report = UpsertReport::new(kind, reports);

        log_report("delete_records", &report, ids.len(), started_at);
        Ok(report)
    }
}

fn candidate_keys(config: &KindConfig, candidates: &[DomainRecord]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|candidate| extract_key(candidate, &config.key_attribute).ok())
        .collect()
}

fn state_outcome(
    kind: &str,
    state: RecordState,
    persisted: fn(RecordId) -> RecordOutcome,
) -> RecordOutcome {
    match state {
        RecordState::Persisted(id) => persisted(id),
        RecordState::Rejected(message) => RecordOutcome::Failed(RecordError::StoreRejection {
            kind: kind.to_string(),
            message,
        }),
        RecordState::Pending => RecordOutcome::Failed(RecordError::StoreRejection {
            kind: kind.to_string(),
            message: "record was not written".to_string(),
        }),
    }
}

fn log_report(use_case: &str, report: &UpsertReport, total: usize, started_at: Instant) {
    info!(
        "event={} module=service status=ok kind={} records={} created={} updated={} deleted={} failed={} duration_ms={}",
        use_case,
        report.kind,
        total,
        report.created(),
        report.updated(),
        report.deleted(),
        report.failed(),
        started_at.elapsed().as_millis()
    );
}

fn system_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
