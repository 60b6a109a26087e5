//! Persistent store contract.

use crate::db::DbError;
use crate::engine::cancel::CancellationToken;
use crate::model::record::{DomainRecord, RecordId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-record write outcome: the persisted id or the store's rejection message.
pub type WriteOutcome = Result<RecordId, String>;

/// Call-level store failure. Per-record rejections are reported as
/// [`WriteOutcome`] values instead.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying database failure.
    Db(DbError),
    /// The store cannot be reached or is not ready for use.
    Unavailable(String),
    /// The caller's cancellation token fired.
    Cancelled,
    /// The request itself is malformed (e.g. invalid attribute name).
    InvalidRequest(String),
    /// Persisted data cannot be converted into a valid record.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::Cancelled => write!(f, "store call cancelled"),
            Self::InvalidRequest(message) => write!(f, "invalid store request: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Filter for [`RecordStore::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every record of the kind.
    All,
    /// Records whose text attribute equals one of `values`.
    AttributeIn {
        attribute: String,
        values: Vec<String>,
    },
    /// Records with one of the given identifiers.
    IdIn(Vec<RecordId>),
}

impl Predicate {
    pub fn attribute_in(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::AttributeIn {
            attribute: attribute.into(),
            values,
        }
    }
}

/// Bulk write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create only; records must not carry an id.
    Insert,
    /// Update records carrying an id, create the others.
    Upsert,
    /// Remove records by id.
    Delete,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// Batch-oriented store consumed by the reconciliation engine.
pub trait RecordStore {
    /// Returns records of `kind` matching `predicate`, in creation order.
    fn find(
        &self,
        kind: &str,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DomainRecord>>;

    /// Writes `records` of `kind` in one call.
    ///
    /// Returns exactly one outcome per input record, in input order.
    fn write_batch(
        &self,
        kind: &str,
        records: &[DomainRecord],
        mode: WriteMode,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn find(
        &self,
        kind: &str,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DomainRecord>> {
        (**self).find(kind, predicate, cancel)
    }

    fn write_batch(
        &self,
        kind: &str,
        records: &[DomainRecord],
        mode: WriteMode,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>> {
        (**self).write_batch(kind, records, mode, cancel)
    }
}
