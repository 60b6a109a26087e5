//! Shared fixtures for integration tests.

#![allow(dead_code)]

use keyrecon_core::{
    CancellationToken, DomainRecord, Predicate, RecordStore, StoreError, StoreResult, WriteMode,
    WriteOutcome,
};
use std::cell::Cell;

pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn fixed_clock() -> i64 {
    NOW_MS
}

/// Store wrapper counting calls, optionally refusing records or going offline.
pub struct ProbeStore<S> {
    inner: S,
    finds: Cell<usize>,
    writes: Cell<usize>,
    offline: Cell<bool>,
    reject: Option<(String, String)>,
}

impl<S: RecordStore> ProbeStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finds: Cell::new(0),
            writes: Cell::new(0),
            offline: Cell::new(false),
            reject: None,
        }
    }

    /// Refuses every written record whose `attribute` equals `value`.
    pub fn rejecting(inner: S, attribute: &str, value: &str) -> Self {
        Self {
            reject: Some((attribute.to_string(), value.to_string())),
            ..Self::new(inner)
        }
    }

    pub fn finds(&self) -> usize {
        self.finds.get()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    fn is_rejected(&self, record: &DomainRecord) -> bool {
        match &self.reject {
            Some((attribute, value)) => record.text(attribute) == Some(value.as_str()),
            None => false,
        }
    }
}

impl<S: RecordStore> RecordStore for ProbeStore<S> {
    fn find(
        &self,
        kind: &str,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DomainRecord>> {
        if self.offline.get() {
            return Err(StoreError::Unavailable("probe offline".to_string()));
        }
        self.finds.set(self.finds.get() + 1);
        self.inner.find(kind, predicate, cancel)
    }

    fn write_batch(
        &self,
        kind: &str,
        records: &[DomainRecord],
        mode: WriteMode,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>> {
        if self.offline.get() {
            return Err(StoreError::Unavailable("probe offline".to_string()));
        }
        self.writes.set(self.writes.get() + 1);

        let accepted: Vec<DomainRecord> = records
            .iter()
            .filter(|record| !self.is_rejected(record))
            .cloned()
            .collect();
        let mut written = self
            .inner
            .write_batch(kind, &accepted, mode, cancel)?
            .into_iter();

        Ok(records
            .iter()
            .map(|record| {
                if self.is_rejected(record) {
                    Err("rejected by probe".to_string())
                } else {
                    written
                        .next()
                        .unwrap_or_else(|| Err("missing inner outcome".to_string()))
                }
            })
            .collect())
    }
}
