//! Existing-record index built from a single batch lookup.
//!
//! # Invariants
//! - Building an index issues at most one `find` call, whatever the key count.
//! - At most one entry per key. When the store holds several records for one
//!   key, the first one returned wins and the rest are counted as ignored.
//! - Indexes are built per call and never cached.

use crate::config::KindConfig;
use crate::engine::cancel::CancellationToken;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::key::{distinct_keys, extract_key};
use crate::model::record::{DomainRecord, RecordId};
use crate::repo::record_store::{Predicate, RecordStore};
use log::{info, warn};
use std::collections::HashMap;
use std::time::Instant;

/// Natural key → persisted record.
#[derive(Debug, Clone, Default)]
pub struct NaturalKeyIndex {
    entries: HashMap<String, DomainRecord>,
    ignored_duplicates: usize,
}

impl NaturalKeyIndex {
    /// Builds an index from records in store order.
    ///
    /// Records without an id or without a usable key are skipped.
    pub fn from_records(key_attribute: &str, records: Vec<DomainRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            if record.id.is_none() {
                continue;
            }
            let Ok(key) = extract_key(&record, key_attribute) else {
                continue;
            };
            if index.entries.contains_key(&key) {
                index.ignored_duplicates += 1;
                continue;
            }
            index.entries.insert(key, record);
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<&DomainRecord> {
        self.entries.get(key)
    }

    pub fn id_of(&self, key: &str) -> Option<RecordId> {
        self.entries.get(key).and_then(|record| record.id)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of store records dropped because their key was already indexed.
    pub fn ignored_duplicates(&self) -> usize {
        self.ignored_duplicates
    }
}

/// Looks up existing records of `config.kind` whose key is one of `keys`.
///
/// # Errors
/// - `EngineError::Cancelled` when `cancel` fired.
/// - `EngineError::StoreUnavailable` when the lookup fails.
pub fn build_index<S>(
    store: &S,
    config: &KindConfig,
    keys: &[String],
    cancel: &CancellationToken,
) -> EngineResult<NaturalKeyIndex>
where
    S: RecordStore + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let keys = distinct_keys(keys);
    if keys.is_empty() {
        return Ok(NaturalKeyIndex::default());
    }

    let started_at = Instant::now();
    let key_count = keys.len();
    let predicate = Predicate::attribute_in(config.key_attribute.as_str(), keys);
    let records = store.find(&config.kind, &predicate, cancel)?;
    let index = NaturalKeyIndex::from_records(&config.key_attribute, records);

    if index.ignored_duplicates() > 0 {
        warn!(
            "event=index_build module=engine status=duplicates kind={} ignored={}",
            config.kind,
            index.ignored_duplicates()
        );
    }
    info!(
        "event=index_build module=engine status=ok kind={} keys={} matched={} duration_ms={}",
        config.kind,
        key_count,
        index.len(),
        started_at.elapsed().as_millis()
    );
    Ok(index)
}
