//! Natural-key reconciliation engine.
//!
//! # Responsibility
//! - Match incoming records to persisted ones by natural key.
//! - Link children to get-or-created parents.
//! - Commit each kind in one bulk store call.
//!
//! # Invariants
//! - Phases run strictly in order: index → reconcile → commit parents →
//!   link → commit children.
//! - No engine state survives a call; nothing is shared between calls, so
//!   two concurrent calls may both create the same missing key.

pub mod cancel;
pub mod committer;
pub mod error;
pub mod index;
pub mod key;
pub mod linker;
pub mod reconciler;
pub mod report;
