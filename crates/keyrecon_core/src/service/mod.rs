//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate engine phases and store calls into use-case level APIs.
//! - Keep callers decoupled from storage details.

pub mod reconcile_service;
