//! The merger boundary: constructing the speculative repository state a
//! build set tests.
//!
//! The scheduler only describes what to merge and consumes the outcome;
//! running git is the merger's business.

use async_trait::async_trait;

use gatekeeper_core::build::RepoFiles;
use gatekeeper_core::change::{Change, MergeMode};
use gatekeeper_core::ModelId;

use crate::error::Result;

/// One merge work unit, describing a change and the build set it is for.
#[derive(Debug, Clone)]
pub struct MergerItem {
    pub build_set_id: ModelId,
    pub project: String,
    pub connection: String,
    pub merge_mode: MergeMode,
    pub ref_name: String,
    pub branch: Option<String>,
    pub old_rev: Option<String>,
    pub new_rev: Option<String>,
}

impl MergerItem {
    pub fn for_change(change: &Change, merge_mode: MergeMode, build_set_id: ModelId) -> Self {
        let info = change.info();
        Self {
            build_set_id,
            project: info.project.clone(),
            connection: info.connection.clone(),
            merge_mode,
            ref_name: info.ref_name.clone(),
            branch: change.branch().map(str::to_string),
            old_rev: info.old_rev.clone(),
            new_rev: info.new_rev.clone(),
        }
    }
}

/// Outcome of a merge attempt, delivered asynchronously.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged {
        /// Commit id of the hypothetical merge.
        commit: String,
        /// Config-relevant repository files at the merged state.
        files: RepoFiles,
    },
    Failed {
        reason: String,
    },
}

/// A completed merge attempt for one build set.
#[derive(Debug, Clone)]
pub struct MergeCompleted {
    pub build_set_id: ModelId,
    pub outcome: MergeOutcome,
}

/// The external merge executor.
#[async_trait]
pub trait Merger: Send + Sync {
    /// Submit a merge work unit; completion arrives as a
    /// [`MergeCompleted`] event.
    async fn submit(&self, item: MergerItem) -> Result<()>;

    /// The build set no longer wants its merge result.
    async fn cancel(&self, build_set_id: ModelId) -> Result<()>;
}
