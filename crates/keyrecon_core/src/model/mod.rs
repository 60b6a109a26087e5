//! Domain model shared by the store and the reconciliation engine.
//!
//! # Responsibility
//! - Define the kind-agnostic record shape persisted by stores.
//! - Keep attribute values serializable for storage round-trips.
//!
//! # Invariants
//! - A record's `id` is assigned by the store and never changed afterwards.
//! - Natural keys and foreign keys are plain attributes named by caller config.

pub mod record;
