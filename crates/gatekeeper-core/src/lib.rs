//! Core model types for the Gatekeeper gating scheduler.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - Change descriptions (refs, branches, tags, proposals)
//! - Branch and file matchers
//! - Node sets and node requests
//! - Semaphore definitions
//! - Job definitions, variants, and frozen jobs
//! - The per-change job graph
//! - Builds, build sets, and historical timing records

pub mod build;
pub mod change;
pub mod error;
pub mod graph;
pub mod id;
pub mod job;
pub mod matcher;
pub mod node;
pub mod semaphore;
pub mod times;

pub use error::{Error, Result};
pub use id::ModelId;
