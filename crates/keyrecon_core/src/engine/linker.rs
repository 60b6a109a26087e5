//! Parent linking for child batches.
//!
//! # Responsibility
//! - Get-or-create the parents referenced by a batch of children.
//! - Stamp each child's foreign-key attribute with its parent id.
//!
//! # Invariants
//! - Parents are committed before any child is stamped.
//! - Exactly one parent is created per distinct missing key.
//! - A child whose parent cannot be resolved is reported, never dropped, and
//!   never blocks its siblings.

use crate::config::{KindConfig, LinkSpec};
use crate::engine::cancel::CancellationToken;
use crate::engine::committer::{commit, RecordState};
use crate::engine::error::{EngineError, EngineResult, RecordError, RecordFailure};
use crate::engine::index::build_index;
use crate::engine::key::{distinct_keys, extract_key};
use crate::engine::reconciler::reconcile;
use crate::model::record::{AttrValue, DomainRecord, RecordId};
use crate::repo::record_store::{RecordStore, WriteMode};
use log::{info, warn};
use std::collections::HashMap;
use std::time::Instant;

/// Parent key → persisted parent id, valid for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkResolution {
    ids: HashMap<String, RecordId>,
}

impl LinkResolution {
    pub fn insert(&mut self, key: String, id: RecordId) {
        self.ids.insert(key, id);
    }

    pub fn resolve(&self, key: &str) -> Option<RecordId> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What happened to the parents referenced by one child batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentSummary {
    pub kind: String,
    /// Pre-existing parents, as `(key, id)`.
    pub reused: Vec<(String, RecordId)>,
    /// Parents created by this call, as `(key, id)`.
    pub created: Vec<(String, RecordId)>,
    /// Parents the store refused, as `(key, message)`.
    pub rejected: Vec<(String, String)>,
}

/// A child stamped with its parent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedChild {
    pub position: usize,
    pub parent_key: String,
    pub parent_id: RecordId,
    pub record: DomainRecord,
}

/// Result of linking one child batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Linked children in input order.
    pub linked: Vec<LinkedChild>,
    /// Children excluded from the child commit.
    pub failures: Vec<RecordFailure>,
    pub parents: ParentSummary,
}

/// Resolves and creates parents for child batches of one link.
pub struct ParentLinker<'a, S: ?Sized> {
    store: &'a S,
    link: &'a LinkSpec,
    now_epoch_ms: i64,
    cancel: &'a CancellationToken,
}

impl<'a, S> ParentLinker<'a, S>
where
    S: RecordStore + ?Sized,
{
    pub fn new(
        store: &'a S,
        link: &'a LinkSpec,
        now_epoch_ms: i64,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            link,
            now_epoch_ms,
            cancel,
        }
    }

    fn parent(&self) -> &KindConfig {
        &self.link.parent
    }

    /// Links children using the link's reference attribute as parent key.
    pub fn link_by_reference(&self, children: Vec<DomainRecord>) -> EngineResult<LinkOutcome> {
        let attribute = self.link.reference_attribute.as_str();
        self.link(children, |child| extract_key(child, attribute))
    }

    /// Links children using `key_of` to derive each child's parent key.
    ///
    /// # Errors
    /// Call-level only (`Cancelled`, `StoreUnavailable`); per-child problems
    /// are returned in [`LinkOutcome::failures`].
    pub fn link<F>(&self, children: Vec<DomainRecord>, key_of: F) -> EngineResult<LinkOutcome>
    where
        F: Fn(&DomainRecord) -> Result<String, RecordError>,
    {
        let started_at = Instant::now();
        let parent = self.parent();
        let mut outcome = LinkOutcome {
            parents: ParentSummary {
                kind: parent.kind.clone(),
                ..ParentSummary::default()
            },
            ..LinkOutcome::default()
        };

        let mut keyed = Vec::with_capacity(children.len());
        for (position, child) in children.into_iter().enumerate() {
            match key_of(&child) {
                Ok(key) => keyed.push((position, key, child)),
                Err(error) => outcome.failures.push(RecordFailure { position, error }),
            }
        }

        let keys = distinct_keys(keyed.iter().map(|(_, key, _)| key.as_str()));
        let index = build_index(self.store, parent, &keys, self.cancel)?;

        let stubs: Vec<DomainRecord> = keys
            .iter()
            .map(|key| {
                DomainRecord::new(parent.kind.clone())
                    .attr(parent.key_attribute.clone(), key.clone())
            })
            .collect();
        let batch = reconcile(parent, stubs, &index, self.now_epoch_ms);

        let mut resolution = LinkResolution::default();
        for entry in &batch.to_update {
            if let Some(id) = entry.record.id {
                resolution.insert(entry.key.clone(), id);
                outcome.parents.reused.push((entry.key.clone(), id));
            }
        }

        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let new_parents: Vec<DomainRecord> = batch
            .to_create
            .iter()
            .map(|entry| entry.record.clone())
            .collect();
        let states = commit(
            self.store,
            &parent.kind,
            &new_parents,
            WriteMode::Insert,
            self.cancel,
        )?;
        for (entry, state) in batch.to_create.iter().zip(states) {
            match state {
                RecordState::Persisted(id) => {
                    resolution.insert(entry.key.clone(), id);
                    outcome.parents.created.push((entry.key.clone(), id));
                }
                RecordState::Rejected(message) => {
                    outcome.parents.rejected.push((entry.key.clone(), message));
                }
                RecordState::Pending => {
                    outcome
                        .parents
                        .rejected
                        .push((entry.key.clone(), "parent was not written".to_string()));
                }
            }
        }

        for (position, key, mut child) in keyed {
            match resolution.resolve(&key) {
                Some(parent_id) => {
                    child.set(
                        self.link.foreign_key_attribute.clone(),
                        AttrValue::from(parent_id),
                    );
                    outcome.linked.push(LinkedChild {
                        position,
                        parent_key: key,
                        parent_id,
                        record: child,
                    });
                }
                None => outcome.failures.push(RecordFailure {
                    position,
                    error: RecordError::UnresolvedLink {
                        parent_kind: parent.kind.clone(),
                        parent_key: key,
                    },
                }),
            }
        }
        outcome.failures.sort_by_key(|failure| failure.position);

        if !outcome.parents.rejected.is_empty() {
            warn!(
                "event=parent_link module=engine status=partial parent_kind={} rejected_parents={} unlinked_children={}",
                parent.kind,
                outcome.parents.rejected.len(),
                outcome.failures.len()
            );
        }
        info!(
            "event=parent_link module=engine status=ok parent_kind={} parents_reused={} parents_created={} children_linked={} duration_ms={}",
            parent.kind,
            outcome.parents.reused.len(),
            outcome.parents.created.len(),
            outcome.linked.len(),
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }
}
