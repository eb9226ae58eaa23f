//! Builds and build sets: concrete executions of frozen jobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::JobGraph;
use crate::node::{NodeRequest, NodeSet};
use crate::ModelId;

/// Terminal outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    Skipped,
    NodeFailure,
    Canceled,
    RetryLimit,
    MergeConflict,
    ConfigError,
}

impl std::fmt::Display for BuildResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Failure => "FAILURE",
            BuildResult::Skipped => "SKIPPED",
            BuildResult::NodeFailure => "NODE_FAILURE",
            BuildResult::Canceled => "CANCELED",
            BuildResult::RetryLimit => "RETRY_LIMIT",
            BuildResult::MergeConflict => "MERGE_CONFLICT",
            BuildResult::ConfigError => "CONFIG_ERROR",
        };
        write!(f, "{s}")
    }
}

/// One execution of one job for one build set. Terminal once `result` is
/// set, unless flagged `retry` (a transient infrastructure failure that
/// must not count as an outcome).
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub id: ModelId,
    pub job_name: String,
    pub result: Option<BuildResult>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// The job deliberately holds after its run phase, e.g. to let child
    /// jobs consume its artifacts before it tears down.
    pub paused: bool,
    /// Transient infra failure; the build is discarded and re-attempted
    /// rather than reported.
    pub retry: bool,
    /// Cancellation was requested from the executor.
    pub canceled: bool,
    /// Arbitrary key/value payload returned by the job, consumed by
    /// dependent jobs and reporting.
    pub result_data: Value,
    /// Nodes the build ran on, once assigned.
    pub nodeset: Option<NodeSet>,
    /// Estimated duration in seconds, from historical timing data.
    pub estimated_duration: Option<f64>,
}

impl Build {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            id: ModelId::new(),
            job_name: job_name.into(),
            result: None,
            start_time: None,
            end_time: None,
            paused: false,
            retry: false,
            canceled: false,
            result_data: Value::Object(Default::default()),
            nodeset: None,
            estimated_duration: None,
        }
    }

    /// A synthetic build recording an outcome for a job that never ran
    /// (skips, config errors, requirement failures).
    pub fn synthetic(job_name: impl Into<String>, result: BuildResult) -> Self {
        let mut build = Self::new(job_name);
        build.result = Some(result);
        build
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.start_time.map(|s| self.end_time.unwrap_or(now) - s)
    }
}

/// Merge state of the hypothetical commit a build set tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeState {
    New,
    Pending,
    Complete,
}

/// A user-visible configuration diagnostic attributed to its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationError {
    /// "project branch path" origin of the offending stanza.
    pub context: String,
    /// Short location hint within the stanza.
    pub mark: String,
    pub text: String,
}

/// Repository file contents produced by the merger:
/// connection → project → branch → path → content.
pub type RepoFiles = HashMap<String, HashMap<String, HashMap<String, HashMap<String, String>>>>;

/// The aggregate of all builds for one speculative configuration of a
/// change. Owned by exactly one queue item at a time; discarded wholesale
/// when the item resets, never reused.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSet {
    pub id: ModelId,
    /// UUID identifying the hypothetical merge commit under test.
    pub commit_id: ModelId,
    /// One live build per job.
    builds: HashMap<String, Build>,
    /// History of retried attempts per job.
    retry_builds: HashMap<String, Vec<Build>>,
    /// Attempt counts per job; only ever increases.
    tries: HashMap<String, u32>,
    /// Fulfilled node assignments per job.
    nodesets: HashMap<String, NodeSet>,
    /// Pending node requests per job.
    node_requests: HashMap<String, NodeRequest>,
    pub config_errors: Vec<ConfigurationError>,
    pub unable_to_merge: bool,
    pub merge_state: MergeState,
    /// Repo-files snapshot from the merger, for layout updates.
    pub files: RepoFiles,
    pub warning_messages: Vec<String>,
    pub job_graph: Option<JobGraph>,
}

impl BuildSet {
    pub fn new() -> Self {
        Self {
            id: ModelId::new(),
            commit_id: ModelId::new(),
            builds: HashMap::new(),
            retry_builds: HashMap::new(),
            tries: HashMap::new(),
            nodesets: HashMap::new(),
            node_requests: HashMap::new(),
            config_errors: Vec::new(),
            unable_to_merge: false,
            merge_state: MergeState::New,
            files: RepoFiles::new(),
            warning_messages: Vec::new(),
            job_graph: None,
        }
    }

    /// Record the live build for a job, bumping its try counter. At most
    /// one live build may exist per job; a second insert is a caller bug
    /// surfaced as an error, not arbitrated as a race.
    pub fn add_build(&mut self, build: Build) -> Result<()> {
        if self.builds.contains_key(&build.job_name) {
            return Err(Error::DuplicateBuild(build.job_name));
        }
        *self.tries.entry(build.job_name.clone()).or_insert(0) += 1;
        self.node_requests.remove(&build.job_name);
        self.builds.insert(build.job_name.clone(), build);
        Ok(())
    }

    pub fn get_build(&self, job_name: &str) -> Option<&Build> {
        self.builds.get(job_name)
    }

    pub fn get_build_mut(&mut self, job_name: &str) -> Option<&mut Build> {
        self.builds.get_mut(job_name)
    }

    pub fn builds(&self) -> impl Iterator<Item = &Build> {
        self.builds.values()
    }

    /// Move a retry-flagged build to the retry history. The try counter
    /// keeps its value; the next [`BuildSet::add_build`] for the job
    /// increments it again.
    pub fn retry_build(&mut self, job_name: &str) -> Option<Build> {
        let build = self.builds.remove(job_name)?;
        self.retry_builds
            .entry(job_name.to_string())
            .or_default()
            .push(build.clone());
        Some(build)
    }

    pub fn retry_builds(&self, job_name: &str) -> &[Build] {
        self.retry_builds
            .get(job_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tries(&self, job_name: &str) -> u32 {
        self.tries.get(job_name).copied().unwrap_or(0)
    }

    /// Record a pending node request. A job may not have both a live
    /// build and a pending request.
    pub fn set_node_request(&mut self, job_name: impl Into<String>, request: NodeRequest) {
        let job_name = job_name.into();
        debug_assert!(!self.builds.contains_key(&job_name));
        self.node_requests.insert(job_name, request);
    }

    pub fn get_node_request(&self, job_name: &str) -> Option<&NodeRequest> {
        self.node_requests.get(job_name)
    }

    pub fn node_requests(&self) -> impl Iterator<Item = (&String, &NodeRequest)> {
        self.node_requests.iter()
    }

    /// Resolve a fulfilled request into a node assignment.
    pub fn set_nodeset(&mut self, job_name: impl Into<String>, nodeset: NodeSet) {
        let job_name = job_name.into();
        self.node_requests.remove(&job_name);
        self.nodesets.insert(job_name, nodeset);
    }

    pub fn get_nodeset(&self, job_name: &str) -> Option<&NodeSet> {
        self.nodesets.get(job_name)
    }

    pub fn remove_node_request(&mut self, job_name: &str) -> Option<NodeRequest> {
        self.node_requests.remove(job_name)
    }
}

impl Default for BuildSet {
    fn default() -> Self {
        Self::new()
    }
}
