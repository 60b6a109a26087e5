//! Record store contract and persistence implementations.
//!
//! # Responsibility
//! - Define the batch-oriented store contract consumed by the engine.
//! - Isolate SQLite query details from reconciliation logic.
//!
//! # Invariants
//! - `find` returns records in a deterministic (creation) order.
//! - `write_batch` reports one outcome per input record, in input order,
//!   and never turns one rejected record into a whole-batch failure.

pub mod record_store;
pub mod sqlite_store;
