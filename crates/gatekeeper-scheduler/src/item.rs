//! Queue items: one change's position and speculative build state, and
//! the readiness/propagation state machine that drives it.
//!
//! Items live in an arena and refer to their neighbors by id, so the
//! speculative chain (`item_ahead`/`items_behind`) carries no ownership.
//! An item's execution state is not a stored enum; it is derived on
//! demand from the build set (which jobs have builds, node requests,
//! results), matching the predicates below.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use gatekeeper_config::{FreezeContext, JobConfigUpdateProbe, Layout, NoConfigUpdates};
use gatekeeper_core::build::{Build, BuildResult, BuildSet, ConfigurationError};
use gatekeeper_core::change::Change;
use gatekeeper_core::graph::JobGraph;
use gatekeeper_core::job::Job;
use gatekeeper_core::ModelId;

use crate::semaphores::SemaphoreHandler;

/// Last-resort lookup for artifacts of builds that are no longer in any
/// pipeline. Persistent build records are external; the in-tree default
/// knows nothing.
pub trait ArtifactHistory {
    /// Artifacts from the most recent successful build providing
    /// `requirement` for this change, if known.
    fn successful_artifacts(&self, change: &Change, requirement: &str) -> Option<Value>;
}

/// The default, empty history.
pub struct NoHistory;

impl ArtifactHistory for NoHistory {
    fn successful_artifacts(&self, _change: &Change, _requirement: &str) -> Option<Value> {
        None
    }
}

/// Readiness of a job's cross-job artifact requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementsStatus {
    Ready,
    /// A providing job exists ahead but has not finished; wait.
    Waiting,
    /// A providing job terminally failed; the requirement can never be
    /// satisfied on this build set.
    Failed(String),
}

/// External work that must be cancelled after a state transition.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cancellations {
    pub builds: Vec<ModelId>,
    pub node_requests: Vec<ModelId>,
}

impl Cancellations {
    pub fn is_empty(&self) -> bool {
        self.builds.is_empty() && self.node_requests.is_empty()
    }

    fn merge(&mut self, other: Cancellations) {
        self.builds.extend(other.builds);
        self.node_requests.extend(other.node_requests);
    }
}

/// One change's position in a queue and its current build set.
#[derive(Debug)]
pub struct QueueItem {
    pub id: ModelId,
    pub change: Change,
    pub build_set: BuildSet,
    pub item_ahead: Option<ModelId>,
    pub items_behind: Vec<ModelId>,
    /// Whether the item is actually being tested, as opposed to a
    /// synthetic ancestor placeholder enqueued for dependency context.
    pub live: bool,
    /// Whether the item is inside the admission window.
    pub active: bool,
    pub bundle: Option<ModelId>,
    pub enqueue_time: DateTime<Utc>,
    pub report_time: Option<DateTime<Utc>>,
    pub dequeued_needing_change: bool,
    pub dequeued_bundle_failing: bool,
    /// Generation of the layout the current job graph was frozen under.
    pub layout_uuid: Option<ModelId>,
}

impl QueueItem {
    pub fn new(change: Change, live: bool) -> Self {
        Self {
            id: ModelId::new(),
            change,
            build_set: BuildSet::new(),
            item_ahead: None,
            items_behind: Vec::new(),
            live,
            active: false,
            bundle: None,
            enqueue_time: Utc::now(),
            report_time: None,
            dequeued_needing_change: false,
            dequeued_bundle_failing: false,
            layout_uuid: None,
        }
    }
}

/// Arena of queue items for one pipeline, indexed by opaque id.
#[derive(Debug, Default)]
pub struct ItemArena {
    items: HashMap<ModelId, QueueItem>,
}

impl ItemArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: QueueItem) -> ModelId {
        let id = item.id;
        self.items.insert(id, item);
        id
    }

    pub fn remove(&mut self, id: ModelId) -> Option<QueueItem> {
        self.items.remove(&id)
    }

    pub fn get(&self, id: ModelId) -> Option<&QueueItem> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ModelId) -> Option<&mut QueueItem> {
        self.items.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the item (or anything ahead of it) has an unfinished job
    /// marked hold-following-changes. Following items may not start jobs
    /// until such jobs succeed; this is the dependent-pipeline
    /// serialization mechanism.
    pub fn is_holding_following_changes(&self, id: ModelId) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        if item.live {
            if let Some(graph) = &item.build_set.job_graph {
                for job in graph.jobs() {
                    if !job.hold_following_changes {
                        continue;
                    }
                    match item.build_set.get_build(&job.name) {
                        Some(build) if build.result == Some(BuildResult::Success) => {}
                        _ => return true,
                    }
                }
            }
        }
        match item.item_ahead {
            Some(ahead) => self.is_holding_following_changes(ahead),
            None => false,
        }
    }

    /// Jobs whose node requests should be submitted now: dependencies
    /// satisfied, requirements ready, nothing requested or fulfilled
    /// yet, and the semaphore admitted us (unless it is resources-first,
    /// which defers to the run phase).
    pub fn find_jobs_to_request(
        &mut self,
        id: ModelId,
        layout: &Layout,
        semaphores: &mut SemaphoreHandler,
    ) -> Vec<String> {
        let mut to_request = Vec::new();
        let mut requirement_failures = Vec::new();
        {
            let Some(item) = self.get(id) else {
                return to_request;
            };
            if !item.live {
                return to_request;
            }
            let Some(graph) = &item.build_set.job_graph else {
                return to_request;
            };
            for job in graph.jobs() {
                if item.build_set.get_build(&job.name).is_some()
                    || item.build_set.get_node_request(&job.name).is_some()
                    || item.build_set.get_nodeset(&job.name).is_some()
                    || job.nodeset.is_empty()
                {
                    continue;
                }
                if !self.dependencies_ready(item, graph, &job.name) {
                    continue;
                }
                match self.requirements_status(item, job) {
                    RequirementsStatus::Ready => {}
                    RequirementsStatus::Waiting => continue,
                    RequirementsStatus::Failed(reason) => {
                        requirement_failures.push((job.name.clone(), reason));
                        continue;
                    }
                }
                if !semaphores.acquire(layout, id, job, true) {
                    continue;
                }
                to_request.push(job.name.clone());
            }
        }
        for (job_name, reason) in requirement_failures {
            self.record_requirement_failure(id, &job_name, &reason);
        }
        to_request
    }

    /// Jobs that are runnable now: dependencies satisfied, requirements
    /// ready, nodes in hand (or none needed), no upstream hold, and the
    /// semaphore acquired. Pure over current state apart from semaphore
    /// acquisition and requirement-failure degradation.
    pub fn find_jobs_to_run(
        &mut self,
        id: ModelId,
        layout: &Layout,
        semaphores: &mut SemaphoreHandler,
    ) -> Vec<String> {
        let mut to_run = Vec::new();
        let mut requirement_failures = Vec::new();
        {
            let Some(item) = self.get(id) else {
                return to_run;
            };
            if !item.live {
                return to_run;
            }
            let Some(graph) = &item.build_set.job_graph else {
                return to_run;
            };
            if let Some(ahead) = item.item_ahead {
                if self.is_holding_following_changes(ahead) {
                    return to_run;
                }
            }
            for job in graph.jobs() {
                if item.build_set.get_build(&job.name).is_some() {
                    continue;
                }
                if !self.dependencies_ready(item, graph, &job.name) {
                    continue;
                }
                match self.requirements_status(item, job) {
                    RequirementsStatus::Ready => {}
                    RequirementsStatus::Waiting => continue,
                    RequirementsStatus::Failed(reason) => {
                        requirement_failures.push((job.name.clone(), reason));
                        continue;
                    }
                }
                if !job.nodeset.is_empty() && item.build_set.get_nodeset(&job.name).is_none() {
                    continue;
                }
                if !semaphores.acquire(layout, id, job, false) {
                    continue;
                }
                to_run.push(job.name.clone());
            }
        }
        for (job_name, reason) in requirement_failures {
            self.record_requirement_failure(id, &job_name, &reason);
        }
        to_run
    }

    /// Every dependency of the job must be satisfied: hard dependencies
    /// by a successful (or paused) build, soft dependencies also by a
    /// skipped one. A parent still queued or failed blocks the job.
    fn dependencies_ready(&self, item: &QueueItem, graph: &JobGraph, job_name: &str) -> bool {
        for parent in graph.parent_jobs_recursive(job_name, false) {
            match item.build_set.get_build(&parent.name) {
                None => return false,
                Some(build) => {
                    let ok = build.paused
                        || matches!(
                            build.result,
                            Some(BuildResult::Success | BuildResult::Skipped)
                        );
                    if !ok {
                        return false;
                    }
                }
            }
        }
        for parent in graph.parent_jobs_recursive(job_name, true) {
            match item.build_set.get_build(&parent.name) {
                None => return false,
                Some(build) => {
                    let ok = build.paused || build.result == Some(BuildResult::Success);
                    if !ok {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whether the artifact requirements of a job can be met, walking the
    /// item-ahead chain. Non-live placeholders defer to a live item with
    /// the same change when one exists, and to historical records as a
    /// last resort.
    pub fn requirements_status(&self, item: &QueueItem, job: &Job) -> RequirementsStatus {
        if job.requires.is_empty() {
            return RequirementsStatus::Ready;
        }
        let requires: HashSet<&str> = job.requires.iter().map(String::as_str).collect();
        let mut cursor = item.item_ahead;
        while let Some(ahead_id) = cursor {
            let Some(ahead) = self.get(ahead_id) else {
                break;
            };
            let status = self.item_provides_status(ahead, &requires);
            if status != RequirementsStatus::Ready {
                return status;
            }
            cursor = ahead.item_ahead;
        }
        RequirementsStatus::Ready
    }

    fn item_provides_status(
        &self,
        item: &QueueItem,
        requires: &HashSet<&str>,
    ) -> RequirementsStatus {
        // A placeholder's own build set is empty; a live item testing the
        // same change carries the authoritative builds.
        let source = if item.live {
            item
        } else {
            self.items
                .values()
                .find(|other| other.live && other.change == item.change)
                .unwrap_or(item)
        };
        // A change with no graph anywhere has no in-pipeline providers;
        // that is not a blocker (historical artifacts, if any, are picked
        // up at handoff time).
        let Some(graph) = &source.build_set.job_graph else {
            return RequirementsStatus::Ready;
        };
        for job in graph.jobs() {
            if !job.provides.iter().any(|p| requires.contains(p.as_str())) {
                continue;
            }
            match source.build_set.get_build(&job.name) {
                None => return RequirementsStatus::Waiting,
                Some(build) if build.result.is_none() && !build.paused => {
                    return RequirementsStatus::Waiting;
                }
                Some(build)
                    if build.paused || build.result == Some(BuildResult::Success) => {}
                Some(build) if build.result == Some(BuildResult::Skipped) => {}
                Some(build) => {
                    return RequirementsStatus::Failed(format!(
                        "job {} which provides a required artifact finished with {}",
                        job.name,
                        build
                            .result
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "no result".to_string()),
                    ));
                }
            }
        }
        RequirementsStatus::Ready
    }

    /// Artifact payloads published by providing jobs ahead of this item,
    /// in chain order (farthest first), for handoff to the executor.
    pub fn collect_provided_artifacts(
        &self,
        id: ModelId,
        job: &Job,
        history: &dyn ArtifactHistory,
    ) -> Vec<Value> {
        let Some(item) = self.get(id) else {
            return Vec::new();
        };
        if job.requires.is_empty() {
            return Vec::new();
        }
        let requires: HashSet<&str> = job.requires.iter().map(String::as_str).collect();
        let mut chain = Vec::new();
        let mut cursor = item.item_ahead;
        while let Some(ahead_id) = cursor {
            let Some(ahead) = self.get(ahead_id) else {
                break;
            };
            chain.push(ahead);
            cursor = ahead.item_ahead;
        }
        let mut artifacts = Vec::new();
        for ahead in chain.into_iter().rev() {
            let source = if ahead.live {
                ahead
            } else {
                self.items
                    .values()
                    .find(|other| other.live && other.change == ahead.change)
                    .unwrap_or(ahead)
            };
            let Some(graph) = &source.build_set.job_graph else {
                for requirement in &requires {
                    if let Some(data) = history.successful_artifacts(&ahead.change, requirement) {
                        artifacts.push(data);
                    }
                }
                continue;
            };
            for provider in graph.jobs() {
                if !provider.provides.iter().any(|p| requires.contains(p.as_str())) {
                    continue;
                }
                if let Some(build) = source.build_set.get_build(&provider.name) {
                    if let Some(data) = build
                        .result_data
                        .get("gating")
                        .and_then(|g| g.get("artifacts"))
                    {
                        artifacts.push(data.clone());
                    }
                }
            }
        }
        artifacts
    }

    /// Record a completed (or retried) build result and propagate it.
    /// Returns the names of jobs newly skipped by the cascade.
    pub fn record_build_result(
        &mut self,
        id: ModelId,
        job_name: &str,
        result: BuildResult,
        result_data: Value,
        retry: bool,
        end_time: DateTime<Utc>,
    ) -> Vec<String> {
        let Some(item) = self.get_mut(id) else {
            return Vec::new();
        };
        let attempts = item
            .build_set
            .job_graph
            .as_ref()
            .and_then(|g| g.get_job(job_name))
            .map(|j| j.attempts)
            .unwrap_or(3);
        let tries = item.build_set.tries(job_name);
        if retry && tries < attempts {
            // A transient failure is discarded, not reported; the try
            // counter keeps the history.
            info!(item = %id.short(), job = %job_name, tries, "build flagged for retry");
            item.build_set.retry_build(job_name);
            return Vec::new();
        }
        let Some(build) = item.build_set.get_build_mut(job_name) else {
            warn!(item = %id.short(), job = %job_name, "result for unknown build");
            return Vec::new();
        };
        let result = if retry {
            info!(item = %id.short(), job = %job_name, attempts, "retry limit reached");
            BuildResult::RetryLimit
        } else {
            result
        };
        build.result = Some(result);
        build.result_data = result_data;
        build.end_time = Some(end_time);
        self.set_result(id, job_name)
    }

    /// Propagate a build's terminal result: a failure skips the job's
    /// full dependent closure (a failed parent satisfies no edge, soft or
    /// hard); a success (or pause) that names `gating.child_jobs` prunes
    /// the fan-out to exactly the named children, an empty list skipping
    /// all of them. Pruned children end up skipped, which a soft edge
    /// tolerates, so that cascade follows hard edges only.
    pub fn set_result(&mut self, id: ModelId, job_name: &str) -> Vec<String> {
        let mut to_skip: Vec<String> = Vec::new();
        {
            let Some(item) = self.get(id) else {
                return to_skip;
            };
            let Some(graph) = &item.build_set.job_graph else {
                return to_skip;
            };
            let Some(build) = item.build_set.get_build(job_name) else {
                return to_skip;
            };
            let failed = matches!(
                build.result,
                Some(
                    BuildResult::Failure
                        | BuildResult::NodeFailure
                        | BuildResult::RetryLimit
                        | BuildResult::Canceled
                        | BuildResult::MergeConflict
                        | BuildResult::ConfigError
                )
            ) && !build.paused;
            if failed {
                to_skip.extend(
                    graph
                        .dependent_jobs_recursive(job_name, false)
                        .iter()
                        .map(|j| j.name.clone()),
                );
            } else if let Some(child_jobs) = build
                .result_data
                .get("gating")
                .and_then(|g| g.get("child_jobs"))
                .and_then(Value::as_array)
            {
                let allowed: HashSet<&str> =
                    child_jobs.iter().filter_map(Value::as_str).collect();
                for child in graph.direct_dependent_jobs(job_name) {
                    if allowed.contains(child.name.as_str()) {
                        continue;
                    }
                    to_skip.push(child.name.clone());
                    to_skip.extend(
                        graph
                            .dependent_jobs_recursive(&child.name, true)
                            .iter()
                            .map(|j| j.name.clone()),
                    );
                }
            }
        }
        let mut skipped = Vec::new();
        let Some(item) = self.get_mut(id) else {
            return skipped;
        };
        for name in to_skip {
            if item.build_set.get_build(&name).is_none()
                && item
                    .build_set
                    .add_build(Build::synthetic(&name, BuildResult::Skipped))
                    .is_ok()
            {
                skipped.push(name);
            }
        }
        if !skipped.is_empty() {
            debug!(item = %id.short(), source = %job_name, ?skipped, "skip cascade");
        }
        skipped
    }

    fn record_requirement_failure(&mut self, id: ModelId, job_name: &str, reason: &str) {
        warn!(item = %id.short(), job = %job_name, %reason, "job requirements cannot be met");
        let Some(item) = self.get_mut(id) else {
            return;
        };
        if item.build_set.get_build(job_name).is_some() {
            return;
        }
        // Never retried; the requirement will not improve on this set.
        if item
            .build_set
            .add_build(Build::synthetic(job_name, BuildResult::Failure))
            .is_ok()
        {
            self.set_result(id, job_name);
        }
    }

    /// Replace the item's build set for a fresh speculative attempt,
    /// releasing its semaphores. Returns external work to cancel.
    pub fn reset_all_builds(
        &mut self,
        id: ModelId,
        semaphores: &mut SemaphoreHandler,
    ) -> Cancellations {
        let cancellations = self.collect_cancellations(id);
        if let Some(item) = self.get_mut(id) {
            info!(item = %id.short(), "resetting builds");
            item.build_set = BuildSet::new();
            item.layout_uuid = None;
        }
        semaphores.release_all_for_item(id);
        cancellations
    }

    fn collect_cancellations(&mut self, id: ModelId) -> Cancellations {
        let mut cancellations = Cancellations::default();
        let Some(item) = self.get_mut(id) else {
            return cancellations;
        };
        let pending: Vec<String> = item
            .build_set
            .node_requests()
            .map(|(job, _)| job.clone())
            .collect();
        for job_name in pending {
            if let Some(request) = item.build_set.remove_node_request(&job_name) {
                cancellations.node_requests.push(request.id);
            }
        }
        let incomplete: Vec<String> = item
            .build_set
            .builds()
            .filter(|b| !b.is_complete())
            .map(|b| b.job_name.clone())
            .collect();
        for job_name in incomplete {
            if let Some(build) = item.build_set.get_build_mut(&job_name) {
                build.canceled = true;
                cancellations.builds.push(build.id);
            }
        }
        cancellations
    }

    /// Skip every job without a terminal result. With `only_unbuilt`,
    /// jobs that already have a build are left alone (the
    /// bundle-failing transition).
    fn skip_all_jobs(&mut self, id: ModelId, only_unbuilt: bool) -> Cancellations {
        let mut cancellations = Cancellations::default();
        if !only_unbuilt {
            cancellations.merge(self.collect_cancellations(id));
        }
        let Some(item) = self.get_mut(id) else {
            return cancellations;
        };
        let Some(graph) = item.build_set.job_graph.as_ref() else {
            return cancellations;
        };
        let job_names: Vec<String> = graph.jobs().iter().map(|j| j.name.clone()).collect();
        for name in job_names {
            match item.build_set.get_build_mut(&name) {
                None => {
                    let _ = item
                        .build_set
                        .add_build(Build::synthetic(&name, BuildResult::Skipped));
                }
                Some(build) if !build.is_complete() && !only_unbuilt => {
                    build.result = Some(BuildResult::Skipped);
                }
                Some(_) => {}
            }
        }
        cancellations
    }

    /// The item is leaving the pipeline because its change can no longer
    /// merge (e.g. a dependency failed); every job ends skipped.
    pub fn set_dequeued_needing_change(&mut self, id: ModelId, reason: &str) -> Cancellations {
        info!(item = %id.short(), %reason, "dequeued needing change");
        if let Some(item) = self.get_mut(id) {
            item.dequeued_needing_change = true;
        }
        self.skip_all_jobs(id, false)
    }

    /// A bundle partner failed; jobs not yet started are skipped, while
    /// finished builds keep their results for reporting.
    pub fn set_dequeued_bundle_failing(&mut self, id: ModelId, reason: &str) -> Cancellations {
        info!(item = %id.short(), %reason, "dequeued with failing bundle");
        if let Some(item) = self.get_mut(id) {
            item.dequeued_bundle_failing = true;
        }
        self.skip_all_jobs(id, true)
    }

    /// The merger could not construct the speculative state.
    pub fn set_unable_to_merge(&mut self, id: ModelId, messages: Vec<String>) -> Cancellations {
        info!(item = %id.short(), "unable to merge");
        if let Some(item) = self.get_mut(id) {
            item.build_set.unable_to_merge = true;
            item.build_set.warning_messages.extend(messages);
        }
        self.skip_all_jobs(id, false)
    }

    /// Configuration errors short-circuit the item: everything skips and
    /// the errors ride along for reporting.
    pub fn set_config_errors(
        &mut self,
        id: ModelId,
        errors: Vec<ConfigurationError>,
    ) -> Cancellations {
        if let Some(item) = self.get_mut(id) {
            item.build_set.config_errors = errors;
        }
        self.skip_all_jobs(id, false)
    }

    /// All jobs in the graph have terminal results. An item without a
    /// graph is complete only if it was short-circuited.
    pub fn are_all_jobs_complete(&self, id: ModelId) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        match &item.build_set.job_graph {
            Some(graph) => graph.jobs().iter().all(|job| {
                item.build_set
                    .get_build(&job.name)
                    .is_some_and(Build::is_complete)
            }),
            None => {
                item.build_set.unable_to_merge
                    || !item.build_set.config_errors.is_empty()
                    || item.dequeued_needing_change
            }
        }
    }

    /// A voting job ended with something other than success or skip.
    pub fn has_any_job_failed(&self, id: ModelId) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        let Some(graph) = &item.build_set.job_graph else {
            return item.build_set.unable_to_merge || !item.build_set.config_errors.is_empty();
        };
        graph.jobs().iter().filter(|j| j.voting).any(|job| {
            item.build_set.get_build(&job.name).is_some_and(|build| {
                matches!(
                    build.result,
                    Some(result) if !matches!(result, BuildResult::Success | BuildResult::Skipped)
                )
            })
        })
    }

    pub fn did_all_jobs_succeed(&self, id: ModelId) -> bool {
        self.are_all_jobs_complete(id)
            && !self.has_any_job_failed(id)
            && !self
                .get(id)
                .map(|i| i.build_set.unable_to_merge || !i.build_set.config_errors.is_empty())
                .unwrap_or(true)
    }
}

/// Decides the file-matcher bypass for one item by freezing its change
/// under the layout the item ahead used and structurally diffing the
/// frozen jobs. The comparison graph is computed at most once.
pub struct ItemConfigUpdateProbe<'a> {
    change: &'a Change,
    ahead_layout: &'a Layout,
    pipeline: &'a str,
    post_review: bool,
    cache: RefCell<Option<Option<JobGraph>>>,
}

impl<'a> ItemConfigUpdateProbe<'a> {
    pub fn new(
        change: &'a Change,
        ahead_layout: &'a Layout,
        pipeline: &'a str,
        post_review: bool,
    ) -> Self {
        Self {
            change,
            ahead_layout,
            pipeline,
            post_review,
            cache: RefCell::new(None),
        }
    }
}

impl JobConfigUpdateProbe for ItemConfigUpdateProbe<'_> {
    fn updates_job_config(&self, job: &Job) -> bool {
        let mut cache = self.cache.borrow_mut();
        let old_graph = cache.get_or_insert_with(|| {
            self.ahead_layout
                .create_job_graph(
                    self.change,
                    self.change.project(),
                    FreezeContext {
                        pipeline: self.pipeline,
                        post_review: self.post_review,
                        skip_file_matcher: true,
                    },
                    &NoConfigUpdates,
                )
                .ok()
        });
        match old_graph {
            // The old layout cannot even freeze this change; its config
            // is certainly being changed.
            None => true,
            Some(graph) => match graph.get_job(&job.name) {
                None => true,
                Some(old_job) => old_job.config_digest() != job.config_digest(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::change::{ProposedInfo, RefInfo};
    use gatekeeper_core::job::JobDependency;
    use serde_json::json;

    fn change(project: &str, number: u64) -> Change {
        Change::Proposed {
            info: RefInfo {
                project: project.to_string(),
                connection: "gerrit".to_string(),
                ref_name: format!("refs/changes/{number}/1"),
                old_rev: None,
                new_rev: Some("abc".to_string()),
                files: vec!["src/lib.rs".to_string()],
                message: String::new(),
            },
            proposed: ProposedInfo {
                number,
                patchset: 1,
                url: None,
                branch: "main".to_string(),
                needs_changes: vec![],
                needed_by: vec![],
                is_merged: false,
            },
        }
    }

    fn job(name: &str, deps: Vec<JobDependency>) -> Job {
        let mut j = Job::new(name);
        j.dependencies = deps;
        j
    }

    /// a <- b <- c, all hard edges.
    fn chain_graph() -> JobGraph {
        let mut graph = JobGraph::new();
        graph.add_job(job("a", vec![])).unwrap();
        graph.add_job(job("b", vec![JobDependency::hard("a")])).unwrap();
        graph.add_job(job("c", vec![JobDependency::hard("b")])).unwrap();
        graph
    }

    fn item_with_graph(arena: &mut ItemArena, graph: JobGraph) -> ModelId {
        let mut item = QueueItem::new(change("demo", 1), true);
        item.build_set.job_graph = Some(graph);
        arena.insert(item)
    }

    fn empty_layout() -> Layout {
        Layout::builder("acme").build()
    }

    fn complete(arena: &mut ItemArena, id: ModelId, job: &str, result: BuildResult) {
        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new(job))
            .unwrap();
        arena.record_build_result(id, job, result, json!({}), false, Utc::now());
    }

    #[test]
    fn test_runnable_in_dependency_order() {
        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, chain_graph());
        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();

        let runnable = arena.find_jobs_to_run(id, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["a"]);

        complete(&mut arena, id, "a", BuildResult::Success);
        let runnable = arena.find_jobs_to_run(id, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["b"]);
    }

    #[test]
    fn test_failure_skips_dependent_closure() {
        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, chain_graph());

        complete(&mut arena, id, "a", BuildResult::Failure);

        let item = arena.get(id).unwrap();
        assert_eq!(
            item.build_set.get_build("b").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert_eq!(
            item.build_set.get_build("c").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert!(arena.are_all_jobs_complete(id));
        assert!(arena.has_any_job_failed(id));
    }

    #[test]
    fn test_empty_child_jobs_skips_all_dependents() {
        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, chain_graph());

        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("a"))
            .unwrap();
        arena.record_build_result(
            id,
            "a",
            BuildResult::Success,
            json!({"gating": {"child_jobs": []}}),
            false,
            Utc::now(),
        );

        let item = arena.get(id).unwrap();
        assert_eq!(
            item.build_set.get_build("b").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert_eq!(
            item.build_set.get_build("c").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert!(arena.did_all_jobs_succeed(id));
    }

    #[test]
    fn test_named_child_jobs_prune_fanout() {
        // a <- b, a <- d, b <- c
        let mut graph = JobGraph::new();
        graph.add_job(job("a", vec![])).unwrap();
        graph.add_job(job("b", vec![JobDependency::hard("a")])).unwrap();
        graph.add_job(job("c", vec![JobDependency::hard("b")])).unwrap();
        graph.add_job(job("d", vec![JobDependency::hard("a")])).unwrap();

        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, graph);
        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("a"))
            .unwrap();
        arena.record_build_result(
            id,
            "a",
            BuildResult::Success,
            json!({"gating": {"child_jobs": ["b"]}}),
            false,
            Utc::now(),
        );

        let item = arena.get(id).unwrap();
        // b still runs; d (and nothing under b) is skipped.
        assert!(item.build_set.get_build("b").is_none());
        assert!(item.build_set.get_build("c").is_none());
        assert_eq!(
            item.build_set.get_build("d").unwrap().result,
            Some(BuildResult::Skipped)
        );
    }

    #[test]
    fn test_soft_dependency_runs_after_skip() {
        // a <- b (hard), b <- c (hard), b <- d (soft)
        let mut graph = JobGraph::new();
        graph.add_job(job("a", vec![])).unwrap();
        graph.add_job(job("b", vec![JobDependency::hard("a")])).unwrap();
        graph.add_job(job("c", vec![JobDependency::hard("b")])).unwrap();
        graph.add_job(job("d", vec![JobDependency::soft("b")])).unwrap();

        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, graph);
        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();

        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("a"))
            .unwrap();
        arena.record_build_result(
            id,
            "a",
            BuildResult::Success,
            json!({"gating": {"child_jobs": []}}),
            false,
            Utc::now(),
        );

        let item = arena.get(id).unwrap();
        // The pruning cascade covers b and its hard dependents.
        assert_eq!(
            item.build_set.get_build("c").unwrap().result,
            Some(BuildResult::Skipped)
        );
        // d soft-depends on b, and b ended up skipped rather than
        // failed, so d may still run.
        assert!(item.build_set.get_build("d").is_none());
        let runnable = arena.find_jobs_to_run(id, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["d"]);
    }

    #[test]
    fn test_failed_soft_parent_skips_dependent() {
        // b (root), c hard-depends on b, d soft-depends on b. A soft edge
        // tolerates a skipped parent, never a failed one.
        let mut graph = JobGraph::new();
        graph.add_job(job("b", vec![])).unwrap();
        graph.add_job(job("c", vec![JobDependency::hard("b")])).unwrap();
        graph.add_job(job("d", vec![JobDependency::soft("b")])).unwrap();

        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, graph);
        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();

        complete(&mut arena, id, "b", BuildResult::Failure);

        let item = arena.get(id).unwrap();
        assert_eq!(
            item.build_set.get_build("c").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert_eq!(
            item.build_set.get_build("d").unwrap().result,
            Some(BuildResult::Skipped)
        );
        // Every job has a terminal build; nothing is left runnable.
        assert!(arena.are_all_jobs_complete(id));
        let runnable = arena.find_jobs_to_run(id, &layout, &mut semaphores);
        assert!(runnable.is_empty());
    }

    #[test]
    fn test_retry_discards_until_attempt_limit() {
        let mut graph = JobGraph::new();
        let mut unit = job("unit", vec![]);
        unit.attempts = 2;
        graph.add_job(unit).unwrap();

        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, graph);

        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("unit"))
            .unwrap();
        arena.record_build_result(id, "unit", BuildResult::Failure, json!({}), true, Utc::now());
        // First retry: build discarded, not terminal.
        assert!(arena.get(id).unwrap().build_set.get_build("unit").is_none());
        assert_eq!(arena.get(id).unwrap().build_set.tries("unit"), 1);

        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("unit"))
            .unwrap();
        assert_eq!(arena.get(id).unwrap().build_set.tries("unit"), 2);
        arena.record_build_result(id, "unit", BuildResult::Failure, json!({}), true, Utc::now());
        // Attempt limit reached: terminal RETRY_LIMIT instead of discard.
        assert_eq!(
            arena.get(id).unwrap().build_set.get_build("unit").unwrap().result,
            Some(BuildResult::RetryLimit)
        );
        assert!(arena.has_any_job_failed(id));
    }

    #[test]
    fn test_requirements_wait_then_collect() {
        let mut provider_graph = JobGraph::new();
        let mut image_job = job("build-image", vec![]);
        image_job.provides = vec!["container-image".to_string()];
        provider_graph.add_job(image_job).unwrap();

        let mut consumer_graph = JobGraph::new();
        let mut consumer_job = job("use-image", vec![]);
        consumer_job.requires = vec!["container-image".to_string()];
        consumer_graph.add_job(consumer_job).unwrap();

        let mut arena = ItemArena::new();
        let ahead = item_with_graph(&mut arena, provider_graph);
        let behind = item_with_graph(&mut arena, consumer_graph);
        arena.get_mut(behind).unwrap().item_ahead = Some(ahead);
        arena.get_mut(ahead).unwrap().items_behind.push(behind);

        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();

        // Provider not yet run: the consumer waits.
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert!(runnable.is_empty());

        arena
            .get_mut(ahead)
            .unwrap()
            .build_set
            .add_build(Build::new("build-image"))
            .unwrap();
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert!(runnable.is_empty());

        arena.record_build_result(
            ahead,
            "build-image",
            BuildResult::Success,
            json!({"gating": {"artifacts": [{"name": "image", "url": "oci://img"}]}}),
            false,
            Utc::now(),
        );
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["use-image"]);

        let consumer = arena.get(behind).unwrap();
        let consumer_job = consumer
            .build_set
            .job_graph
            .as_ref()
            .unwrap()
            .get_job("use-image")
            .unwrap()
            .clone();
        let artifacts = arena.collect_provided_artifacts(behind, &consumer_job, &NoHistory);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0][0]["name"], json!("image"));
    }

    #[test]
    fn test_failed_requirement_degrades_to_synthetic_failure() {
        let mut provider_graph = JobGraph::new();
        let mut image_job = job("build-image", vec![]);
        image_job.provides = vec!["container-image".to_string()];
        provider_graph.add_job(image_job).unwrap();

        let mut consumer_graph = JobGraph::new();
        let mut consumer_job = job("use-image", vec![]);
        consumer_job.requires = vec!["container-image".to_string()];
        consumer_graph.add_job(consumer_job).unwrap();
        consumer_graph
            .add_job(job("report", vec![JobDependency::hard("use-image")]))
            .unwrap();

        let mut arena = ItemArena::new();
        let ahead = item_with_graph(&mut arena, provider_graph);
        let behind = item_with_graph(&mut arena, consumer_graph);
        arena.get_mut(behind).unwrap().item_ahead = Some(ahead);

        complete(&mut arena, ahead, "build-image", BuildResult::Failure);

        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert!(runnable.is_empty());

        // The consumer got a synthetic FAILURE and its dependent skipped.
        let item = arena.get(behind).unwrap();
        assert_eq!(
            item.build_set.get_build("use-image").unwrap().result,
            Some(BuildResult::Failure)
        );
        assert_eq!(
            item.build_set.get_build("report").unwrap().result,
            Some(BuildResult::Skipped)
        );
        assert!(arena.are_all_jobs_complete(behind));
    }

    #[test]
    fn test_hold_following_changes_blocks_item_behind() {
        let mut ahead_graph = JobGraph::new();
        let mut holding = job("deploy", vec![]);
        holding.hold_following_changes = true;
        ahead_graph.add_job(holding).unwrap();

        let mut arena = ItemArena::new();
        let ahead = item_with_graph(&mut arena, ahead_graph);
        let behind = item_with_graph(&mut arena, chain_graph());
        arena.get_mut(behind).unwrap().item_ahead = Some(ahead);

        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();
        // The ahead item's hold job has not succeeded yet.
        assert!(arena.is_holding_following_changes(ahead));
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert!(runnable.is_empty());

        complete(&mut arena, ahead, "deploy", BuildResult::Success);
        assert!(!arena.is_holding_following_changes(ahead));
        let runnable = arena.find_jobs_to_run(behind, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["a"]);
    }

    #[test]
    fn test_terminal_transitions_yield_one_build_per_job() {
        for transition in ["needing-change", "unable-to-merge", "config-error", "bundle"] {
            let mut arena = ItemArena::new();
            let id = item_with_graph(&mut arena, chain_graph());
            // One job already finished, one is in flight.
            complete(&mut arena, id, "a", BuildResult::Success);
            arena
                .get_mut(id)
                .unwrap()
                .build_set
                .add_build(Build::new("b"))
                .unwrap();

            let cancellations = match transition {
                "needing-change" => arena.set_dequeued_needing_change(id, "dependency failed"),
                "unable-to-merge" => {
                    arena.set_unable_to_merge(id, vec!["merge conflict".to_string()])
                }
                "config-error" => arena.set_config_errors(
                    id,
                    vec![ConfigurationError {
                        context: "demo (main) ci/config.yaml".to_string(),
                        mark: "job".to_string(),
                        text: "broken".to_string(),
                    }],
                ),
                _ => arena.set_dequeued_bundle_failing(id, "bundle partner failed"),
            };

            let item = arena.get(id).unwrap();
            let graph = item.build_set.job_graph.as_ref().unwrap();
            if transition == "bundle" {
                // Only unbuilt jobs are skipped; the in-flight build of b
                // keeps running and nothing is cancelled.
                assert!(cancellations.is_empty());
                assert!(!item.build_set.get_build("b").unwrap().is_complete());
                assert_eq!(
                    item.build_set.get_build("c").unwrap().result,
                    Some(BuildResult::Skipped)
                );
            } else {
                assert_eq!(cancellations.builds.len(), 1);
                for job in graph.jobs() {
                    let build = item.build_set.get_build(&job.name).unwrap();
                    assert!(build.is_complete(), "{transition}: {}", job.name);
                }
                assert_eq!(
                    item.build_set.get_build("a").unwrap().result,
                    Some(BuildResult::Success)
                );
            }
        }
    }

    #[test]
    fn test_reset_all_builds_releases_and_cancels() {
        let mut graph = JobGraph::new();
        let mut guarded = job("guarded", vec![]);
        guarded.semaphore = Some(gatekeeper_core::semaphore::JobSemaphore {
            name: "slots".to_string(),
            resources_first: false,
        });
        graph.add_job(guarded).unwrap();

        let mut arena = ItemArena::new();
        let id = item_with_graph(&mut arena, graph);
        let layout = empty_layout();
        let mut semaphores = SemaphoreHandler::new();

        let runnable = arena.find_jobs_to_run(id, &layout, &mut semaphores);
        assert_eq!(runnable, vec!["guarded"]);
        assert_eq!(semaphores.held("slots"), 1);
        arena
            .get_mut(id)
            .unwrap()
            .build_set
            .add_build(Build::new("guarded"))
            .unwrap();

        let old_id = arena.get(id).unwrap().build_set.id;
        let cancellations = arena.reset_all_builds(id, &mut semaphores);
        assert_eq!(cancellations.builds.len(), 1);
        assert_eq!(semaphores.held("slots"), 0);
        // A brand-new build set, never the old one.
        assert_ne!(arena.get(id).unwrap().build_set.id, old_id);
        assert!(arena.get(id).unwrap().build_set.get_build("guarded").is_none());
    }
}
