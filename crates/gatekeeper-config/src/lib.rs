//! Tenant configuration for Gatekeeper.
//!
//! This crate handles:
//! - The unparsed-config input shape (pre-parsed dict-like stanza records)
//! - Interpretation of those records into typed definitions
//! - The immutable per-tenant [`Layout`] and job-graph freezing

pub mod error;
pub mod layout;
pub mod unparsed;

pub use error::{ConfigError, ConfigResult, LoadingErrors};
pub use layout::{FreezeContext, JobConfigUpdateProbe, Layout, LayoutBuilder, NoConfigUpdates};
