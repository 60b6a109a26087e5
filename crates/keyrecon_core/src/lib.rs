//! Natural-key reconciliation and bulk-upsert engine.
//!
//! Matches incoming records to persisted ones by a business key, creates the
//! missing ones, links children to parents and commits each kind in one bulk
//! store call, reporting one outcome per input record.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, DefaultValue, EngineConfig, KindConfig, KindSchema, LinkSpec};
pub use engine::cancel::CancellationToken;
pub use engine::committer::{commit, RecordState};
pub use engine::error::{EngineError, EngineResult, RecordError, RecordFailure};
pub use engine::index::{build_index, NaturalKeyIndex};
pub use engine::key::extract_key;
pub use engine::linker::{LinkOutcome, LinkResolution, LinkedChild, ParentLinker, ParentSummary};
pub use engine::reconciler::{reconcile, BatchEntry, ReconcileAction, ReconciliationBatch};
pub use engine::report::{RecordOutcome, RecordReport, UpsertReport};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::record::{AttrValue, Attributes, DomainRecord, RecordId};
pub use repo::record_store::{
    Predicate, RecordStore, StoreError, StoreResult, WriteMode, WriteOutcome,
};
pub use repo::sqlite_store::SqliteRecordStore;
pub use service::reconcile_service::{Clock, LinkedUpsertReport, ReconcileService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
