//! Engine error taxonomy.
//!
//! Per-record errors ([`RecordError`]) are collected into reports and never
//! abort a call. Call-level errors ([`EngineError`]) abort the call and carry
//! no partial result.

use crate::config::ConfigError;
use crate::repo::record_store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of one record; siblings proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record lacks the attribute used for matching.
    MissingKey { kind: String, attribute: String },
    /// The referenced parent was not persisted.
    UnresolvedLink {
        parent_kind: String,
        parent_key: String,
    },
    /// The store refused this record.
    StoreRejection { kind: String, message: String },
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey { kind, attribute } => {
                write!(f, "{kind} record is missing key attribute `{attribute}`")
            }
            Self::UnresolvedLink {
                parent_kind,
                parent_key,
            } => write!(f, "no persisted {parent_kind} for key `{parent_key}`"),
            Self::StoreRejection { kind, message } => {
                write!(f, "store rejected {kind} record: {message}")
            }
        }
    }
}

impl Error for RecordError {}

/// A [`RecordError`] tied to the caller's input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub position: usize,
    pub error: RecordError,
}

/// Call-level failure; the whole call is aborted.
#[derive(Debug)]
pub enum EngineError {
    /// The store call could not be attempted or completed.
    StoreUnavailable(StoreError),
    /// The caller's cancellation token fired.
    Cancelled,
    InvalidConfig(ConfigError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreUnavailable(err) => write!(f, "store unavailable: {err}"),
            Self::Cancelled => write!(f, "reconciliation cancelled"),
            Self::InvalidConfig(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) => Some(err),
            Self::Cancelled => None,
            Self::InvalidConfig(err) => Some(err),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Cancelled => Self::Cancelled,
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}
