//! The executor and node-provisioner boundaries.
//!
//! Job execution and node provisioning happen elsewhere; the scheduler
//! submits requests and consumes completion events. Reserved keys in a
//! build's result data: `gating.child_jobs` prunes the dependent fan-out
//! and `gating.log_url` feeds reporting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use gatekeeper_core::build::BuildResult;
use gatekeeper_core::job::Job;
use gatekeeper_core::node::{NodeRequest, NodeSet};
use gatekeeper_core::change::Change;
use gatekeeper_core::ModelId;

use crate::error::Result;

/// Everything the executor needs to start one build.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    pub build_id: ModelId,
    pub build_set_id: ModelId,
    pub item_id: ModelId,
    pub change: Change,
    /// The frozen job, playbooks and all.
    pub job: Job,
    /// Nodes assigned to the build; empty for executor-local jobs.
    pub nodeset: Option<NodeSet>,
    /// Artifact payloads from providing jobs ahead, farthest first.
    pub artifacts: Vec<Value>,
}

/// A completed build, as reported by the executor.
#[derive(Debug, Clone)]
pub struct BuildCompleted {
    pub item_id: ModelId,
    pub job_name: String,
    pub result: BuildResult,
    pub result_data: Value,
    /// Transient infrastructure failure: discard and re-attempt instead
    /// of reporting.
    pub retry: bool,
    pub end_time: DateTime<Utc>,
}

/// Build lifecycle events delivered by the executor.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Started {
        item_id: ModelId,
        job_name: String,
        start_time: DateTime<Utc>,
    },
    /// The job is deliberately holding (e.g. serving artifacts to its
    /// children) and will resume or finish later.
    Paused {
        item_id: ModelId,
        job_name: String,
    },
    Completed(BuildCompleted),
}

/// The external job executor.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn start(&self, request: ExecutorRequest) -> Result<()>;

    /// Best-effort interrupt of a running build; the result still
    /// arrives as an event.
    async fn cancel(&self, build_id: ModelId) -> Result<()>;

    /// Resume a paused build.
    async fn resume(&self, build_id: ModelId) -> Result<()>;
}

/// Outcome of a node request.
#[derive(Debug, Clone)]
pub struct NodesProvisioned {
    pub item_id: ModelId,
    pub job_name: String,
    pub request_id: ModelId,
    /// The fulfilled nodes, or None when provisioning failed.
    pub nodeset: Option<NodeSet>,
}

/// The external node provisioner.
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    async fn submit(&self, item_id: ModelId, request: NodeRequest) -> Result<()>;

    async fn cancel(&self, request_id: ModelId) -> Result<()>;
}

/// Everything the scheduling pass can be woken up by.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Merge(crate::merger::MergeCompleted),
    Build(BuildEvent),
    Nodes(NodesProvisioned),
}
