//! Candidate reconciliation against an existing-record index.
//!
//! # Responsibility
//! - Classify each candidate as an update of a persisted record or a create.
//! - Build the record to write for each class without touching the store.
//!
//! # Invariants
//! - Every input position lands in exactly one of `to_update`, `to_create`
//!   or `failures`; entries keep first-position input order.
//! - A key repeated within one batch folds into the entry of its first
//!   occurrence, so one batch never creates the same key twice.

use crate::config::KindConfig;
use crate::engine::error::RecordFailure;
use crate::engine::index::NaturalKeyIndex;
use crate::engine::key::extract_key;
use crate::model::record::DomainRecord;
use std::collections::HashMap;

/// Partition a reconciled entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Update,
    Create,
}

/// One record to write, covering one or more input positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub key: String,
    /// Input positions folded into this entry, ascending.
    pub positions: Vec<usize>,
    pub record: DomainRecord,
}

/// Working set of one kind for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationBatch {
    /// Copies of persisted records with candidate updates overlaid.
    pub to_update: Vec<BatchEntry>,
    /// New records without ids.
    pub to_create: Vec<BatchEntry>,
    /// Candidates excluded before commit.
    pub failures: Vec<RecordFailure>,
}

impl ReconciliationBatch {
    /// Number of input positions covered by update and create entries.
    pub fn reconciled_positions(&self) -> usize {
        self.to_update
            .iter()
            .chain(self.to_create.iter())
            .map(|entry| entry.positions.len())
            .sum()
    }

    /// Number of input positions covered, failures included.
    pub fn covered_positions(&self) -> usize {
        self.reconciled_positions() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_create.is_empty() && self.failures.is_empty()
    }

    /// Entries in write order (updates first) with their action.
    pub fn entries(&self) -> impl Iterator<Item = (ReconcileAction, &BatchEntry)> {
        self.to_update
            .iter()
            .map(|entry| (ReconcileAction::Update, entry))
            .chain(
                self.to_create
                    .iter()
                    .map(|entry| (ReconcileAction::Create, entry)),
            )
    }
}

/// Reconciles `candidates` of `config.kind` against `index`.
///
/// Matched candidates overlay their mutable attributes onto a copy of the
/// persisted record. Unmatched candidates become new records carrying their
/// own attributes plus `config.defaults` resolved against `now_epoch_ms`.
/// The configured kind overrides the candidates' `kind` and candidate ids
/// are ignored: matching is by natural key only.
pub fn reconcile(
    config: &KindConfig,
    candidates: Vec<DomainRecord>,
    index: &NaturalKeyIndex,
    now_epoch_ms: i64,
) -> ReconciliationBatch {
    let mut batch = ReconciliationBatch::default();
    let mut seen: HashMap<String, (ReconcileAction, usize)> = HashMap::new();

    for (position, candidate) in candidates.into_iter().enumerate() {
        let key = match extract_key(&candidate, &config.key_attribute) {
            Ok(key) => key,
            Err(error) => {
                batch.failures.push(RecordFailure { position, error });
                continue;
            }
        };

        if let Some((action, slot)) = seen.get(&key).copied() {
            match action {
                ReconcileAction::Update => {
                    let entry = &mut batch.to_update[slot];
                    overlay_mutable(config, &mut entry.record, candidate);
                    entry.positions.push(position);
                }
                ReconcileAction::Create => {
                    let entry = &mut batch.to_create[slot];
                    entry.record.attributes.extend(candidate.attributes);
                    entry.positions.push(position);
                }
            }
            continue;
        }

        match index.get(&key) {
            Some(persisted) => {
                let mut record = persisted.clone();
                record.kind = config.kind.clone();
                overlay_mutable(config, &mut record, candidate);
                seen.insert(key.clone(), (ReconcileAction::Update, batch.to_update.len()));
                batch.to_update.push(BatchEntry {
                    key,
                    positions: vec![position],
                    record,
                });
            }
            None => {
                let record = new_record(config, candidate, now_epoch_ms);
                seen.insert(key.clone(), (ReconcileAction::Create, batch.to_create.len()));
                batch.to_create.push(BatchEntry {
                    key,
                    positions: vec![position],
                    record,
                });
            }
        }
    }

    batch
}

fn overlay_mutable(config: &KindConfig, target: &mut DomainRecord, candidate: DomainRecord) {
    for (name, value) in candidate.attributes {
        if config.is_mutable(&name) {
            target.attributes.insert(name, value);
        }
    }
}

fn new_record(config: &KindConfig, candidate: DomainRecord, now_epoch_ms: i64) -> DomainRecord {
    let mut record = DomainRecord::new(config.kind.clone());
    record.attributes = candidate.attributes;
    for (name, default) in &config.defaults {
        if !record.attributes.contains_key(name) {
            record
                .attributes
                .insert(name.clone(), default.resolve(now_epoch_ms));
        }
    }
    record
}
