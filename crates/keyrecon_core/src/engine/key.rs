//! Natural-key extraction.

use crate::engine::error::RecordError;
use crate::model::record::DomainRecord;
use std::collections::HashSet;

/// Returns the natural key stored in `key_attribute`.
///
/// Keys are exact and case-sensitive; the value is returned untrimmed.
/// Absent, non-text, empty and whitespace-only values are `MissingKey`.
pub fn extract_key(record: &DomainRecord, key_attribute: &str) -> Result<String, RecordError> {
    match record.text(key_attribute) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(RecordError::MissingKey {
            kind: record.kind.clone(),
            attribute: key_attribute.to_string(),
        }),
    }
}

/// Deduplicates keys, keeping first-seen order.
pub fn distinct_keys<I, K>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for key in keys {
        let key = key.as_ref();
        if seen.insert(key.to_string()) {
            distinct.push(key.to_string());
        }
    }
    distinct
}
