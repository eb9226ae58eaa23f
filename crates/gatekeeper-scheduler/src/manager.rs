//! The per-tenant scheduling pass.
//!
//! All mutation of a tenant's pipelines, items and semaphore tables goes
//! through one `TenantScheduler`, giving the per-tenant linearization the
//! model requires; separate tenants run in parallel by running separate
//! schedulers. A pass never blocks: it computes decisions from current
//! state into an [`Actions`] batch, and the batch is dispatched to the
//! external merger/executor/provisioner afterwards. Results come back as
//! [`SchedulerEvent`]s and are applied by a later pass.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gatekeeper_config::unparsed::ManagerKind;
use gatekeeper_config::{FreezeContext, Layout};
use gatekeeper_core::build::{Build, BuildResult, ConfigurationError, MergeState};
use gatekeeper_core::change::Change;
use gatekeeper_core::node::NodeRequest;
use gatekeeper_core::times::{TimeDatabase, TimeKey};
use gatekeeper_core::ModelId;

use crate::error::Result;
use crate::executor::{
    BuildCompleted, BuildEvent, Executor, ExecutorRequest, NodeProvisioner, NodesProvisioned,
    SchedulerEvent,
};
use crate::item::{ArtifactHistory, Cancellations, ItemConfigUpdateProbe, NoHistory};
use crate::merger::{MergeCompleted, MergeOutcome, Merger, MergerItem};
use crate::pipeline::Pipeline;
use crate::semaphores::SemaphoreHandler;
use crate::status::{format_item_status, ItemStatus};

/// One tenant's complete scheduling state.
pub struct Tenant {
    pub name: String,
    pub layout: Arc<Layout>,
    pub pipelines: Vec<Pipeline>,
    pub semaphores: SemaphoreHandler,
    pub times: TimeDatabase,
}

impl Tenant {
    /// Build a tenant from a layout, instantiating its pipelines.
    pub fn new(name: impl Into<String>, layout: Arc<Layout>) -> Self {
        let name = name.into();
        let pipelines = layout
            .pipelines()
            .map(|def| Pipeline::from_def(&name, def))
            .collect();
        Self {
            name,
            layout,
            pipelines,
            semaphores: SemaphoreHandler::new(),
            times: TimeDatabase::new(),
        }
    }
}

/// External calls computed by one pass, dispatched after all decisions
/// are made.
#[derive(Default)]
pub struct Actions {
    pub merges: Vec<MergerItem>,
    pub node_requests: Vec<(ModelId, NodeRequest)>,
    pub starts: Vec<ExecutorRequest>,
    pub resumes: Vec<ModelId>,
    pub cancels: Cancellations,
    pub merge_cancels: Vec<ModelId>,
}

impl Actions {
    fn absorb_cancellations(&mut self, cancellations: Cancellations) {
        self.cancels.builds.extend(cancellations.builds);
        self.cancels.node_requests.extend(cancellations.node_requests);
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
            && self.node_requests.is_empty()
            && self.starts.is_empty()
            && self.resumes.is_empty()
            && self.cancels.is_empty()
            && self.merge_cancels.is_empty()
    }
}

/// The reportable outcome of one dequeued item. Delivery to review
/// systems is external; this is the formatted payload.
#[derive(Debug)]
pub struct ItemReport {
    pub pipeline: String,
    pub item: ItemStatus,
    pub success: bool,
    pub config_errors: Vec<ConfigurationError>,
    pub warnings: Vec<String>,
}

/// Drives one tenant's pipelines.
pub struct TenantScheduler {
    tenant: Tenant,
    merger: Arc<dyn Merger>,
    executor: Arc<dyn Executor>,
    provisioner: Arc<dyn NodeProvisioner>,
    history: Box<dyn ArtifactHistory + Send + Sync>,
}

impl TenantScheduler {
    pub fn new(
        tenant: Tenant,
        merger: Arc<dyn Merger>,
        executor: Arc<dyn Executor>,
        provisioner: Arc<dyn NodeProvisioner>,
    ) -> Self {
        Self {
            tenant,
            merger,
            executor,
            provisioner,
            history: Box::new(NoHistory),
        }
    }

    pub fn with_history(mut self, history: Box<dyn ArtifactHistory + Send + Sync>) -> Self {
        self.history = history;
        self
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn tenant_mut(&mut self) -> &mut Tenant {
        &mut self.tenant
    }

    /// Enqueue a change into a pipeline, selecting the queue configured
    /// for its project.
    pub fn enqueue_change(
        &mut self,
        pipeline_name: &str,
        change: Change,
        live: bool,
    ) -> Result<ModelId> {
        let queue_name = self
            .tenant
            .layout
            .project(change.project())
            .and_then(|p| p.pipelines.get(pipeline_name))
            .and_then(|ppc| ppc.queue_name.clone());
        let pipeline = self
            .tenant
            .pipelines
            .iter_mut()
            .find(|p| p.name == pipeline_name)
            .ok_or_else(|| crate::error::SchedulerError::UnknownPipeline(pipeline_name.to_string()))?;
        Ok(pipeline.enqueue_change(change, live, queue_name.as_deref()))
    }

    /// Apply one completion event. Returns cancellations that must be
    /// dispatched; scheduling reactions happen in the next pass.
    pub fn handle_event(&mut self, event: SchedulerEvent) -> Actions {
        let mut actions = Actions::default();
        match event {
            SchedulerEvent::Merge(MergeCompleted {
                build_set_id,
                outcome,
            }) => {
                let Some((pipeline_index, item_id)) = self.find_item_by_build_set(build_set_id)
                else {
                    debug!(build_set = %build_set_id.short(), "merge result for unknown build set");
                    return actions;
                };
                let pipeline = &mut self.tenant.pipelines[pipeline_index];
                match outcome {
                    MergeOutcome::Merged { commit, files } => {
                        if let Some(item) = pipeline.items.get_mut(item_id) {
                            debug!(item = %item_id.short(), %commit, "merge complete");
                            item.build_set.merge_state = MergeState::Complete;
                            item.build_set.files = files;
                        }
                    }
                    MergeOutcome::Failed { reason } => {
                        if let Some(item) = pipeline.items.get_mut(item_id) {
                            item.build_set.merge_state = MergeState::Complete;
                        }
                        actions.absorb_cancellations(
                            pipeline.items.set_unable_to_merge(item_id, vec![reason]),
                        );
                    }
                }
            }
            SchedulerEvent::Build(BuildEvent::Started {
                item_id,
                job_name,
                start_time,
            }) => {
                if let Some(build) = self.build_mut(item_id, &job_name) {
                    build.start_time = Some(start_time);
                }
            }
            SchedulerEvent::Build(BuildEvent::Paused { item_id, job_name }) => {
                if let Some(build) = self.build_mut(item_id, &job_name) {
                    build.paused = true;
                }
            }
            SchedulerEvent::Build(BuildEvent::Completed(completed)) => {
                self.apply_build_completed(completed);
            }
            SchedulerEvent::Nodes(NodesProvisioned {
                item_id,
                job_name,
                request_id,
                nodeset,
            }) => {
                let Some(pipeline) = self
                    .tenant
                    .pipelines
                    .iter_mut()
                    .find(|p| p.items.get(item_id).is_some())
                else {
                    return actions;
                };
                match nodeset {
                    Some(nodeset) => {
                        if let Some(item) = pipeline.items.get_mut(item_id) {
                            item.build_set.set_nodeset(&job_name, nodeset);
                        }
                    }
                    None => {
                        warn!(item = %item_id.short(), job = %job_name, request = %request_id.short(), "node request failed");
                        if let Some(item) = pipeline.items.get_mut(item_id) {
                            item.build_set.remove_node_request(&job_name);
                            let _ = item
                                .build_set
                                .add_build(Build::synthetic(&job_name, BuildResult::NodeFailure));
                        }
                        pipeline.items.set_result(item_id, &job_name);
                    }
                }
            }
        }
        actions
    }

    fn apply_build_completed(&mut self, completed: BuildCompleted) {
        let BuildCompleted {
            item_id,
            job_name,
            result,
            result_data,
            retry,
            end_time,
        } = completed;
        let Some(pipeline) = self
            .tenant
            .pipelines
            .iter_mut()
            .find(|p| p.items.get(item_id).is_some())
        else {
            return;
        };
        // Historical timing feeds remaining-time estimates.
        if let Some(item) = pipeline.items.get(item_id) {
            if let Some(build) = item.build_set.get_build(&job_name) {
                if let (Some(start), false) = (build.start_time, retry) {
                    let duration = (end_time - start).num_seconds().max(0) as u64;
                    self.tenant.times.record(
                        TimeKey {
                            tenant: self.tenant.name.clone(),
                            project: item.change.project().to_string(),
                            branch: item.change.branch().unwrap_or("").to_string(),
                            job: job_name.clone(),
                        },
                        duration,
                        result,
                    );
                }
            }
        }
        pipeline
            .items
            .record_build_result(item_id, &job_name, result, result_data, retry, end_time);
        // The semaphore is held for the duration of the build only.
        let job = pipeline.items.get(item_id).and_then(|item| {
            item.build_set
                .job_graph
                .as_ref()
                .and_then(|g| g.get_job(&job_name))
                .cloned()
        });
        if let Some(job) = job {
            if pipeline
                .items
                .get(item_id)
                .and_then(|i| i.build_set.get_build(&job_name))
                .is_some_and(Build::is_complete)
            {
                self.tenant.semaphores.release(item_id, &job);
            }
        }
    }

    fn build_mut(&mut self, item_id: ModelId, job_name: &str) -> Option<&mut Build> {
        self.tenant
            .pipelines
            .iter_mut()
            .find_map(|p| p.items.get_mut(item_id))
            .and_then(|item| item.build_set.get_build_mut(job_name))
    }

    fn find_item_by_build_set(&self, build_set_id: ModelId) -> Option<(usize, ModelId)> {
        for (index, pipeline) in self.tenant.pipelines.iter().enumerate() {
            for item in pipeline.items.iter() {
                if item.build_set.id == build_set_id {
                    return Some((index, item.id));
                }
            }
        }
        None
    }

    /// One non-blocking scheduling pass over every pipeline: admit items
    /// into windows, submit merges, freeze job graphs, request nodes,
    /// start runnable jobs, resume paused builds whose children are
    /// done, and dequeue finished items. Returns the computed external
    /// calls and the reports for dequeued items.
    pub fn compute_pass(&mut self) -> (Actions, Vec<ItemReport>) {
        let mut actions = Actions::default();
        let mut reports = Vec::new();
        let layout = self.tenant.layout.clone();
        let tenant_name = self.tenant.name.clone();
        let history = &*self.history;
        let semaphores = &mut self.tenant.semaphores;
        let times = &self.tenant.times;

        for pipeline in &mut self.tenant.pipelines {
            if pipeline.is_disabled() {
                continue;
            }
            Self::schedule_pipeline_work(
                pipeline,
                &layout,
                semaphores,
                history,
                &mut actions,
            );
            Self::complete_pipeline_items(
                pipeline,
                semaphores,
                times,
                &tenant_name,
                &mut actions,
                &mut reports,
            );
        }
        (actions, reports)
    }

    fn schedule_pipeline_work(
        pipeline: &mut Pipeline,
        layout: &Arc<Layout>,
        semaphores: &mut SemaphoreHandler,
        history: &(dyn ArtifactHistory + Send + Sync),
        actions: &mut Actions,
    ) {
        let pipeline_name = pipeline.name.clone();
        let post_review = pipeline.post_review;
        let precedence = pipeline.precedence;

        for id in pipeline.all_item_ids() {
            let actionable = pipeline
                .queue_of(id)
                .map(|q| q.is_actionable(&pipeline.items, &pipeline.bundles, id))
                .unwrap_or(false);
            let relative_priority = pipeline
                .queue_of(id)
                .and_then(|q| q.items().iter().position(|&i| i == id))
                .unwrap_or(0) as u32;
            {
                let Some(item) = pipeline.items.get_mut(id) else {
                    continue;
                };
                item.active = actionable;
                if !actionable || !item.live {
                    continue;
                }
            }

            // Merge phase: the speculative state must exist before any
            // job can be considered.
            let (merge_state, build_set_id, short_circuited) = {
                let Some(item) = pipeline.items.get(id) else {
                    continue;
                };
                (
                    item.build_set.merge_state,
                    item.build_set.id,
                    item.build_set.unable_to_merge || !item.build_set.config_errors.is_empty(),
                )
            };
            if short_circuited {
                continue;
            }
            match merge_state {
                MergeState::New => {
                    let Some(item) = pipeline.items.get_mut(id) else {
                        continue;
                    };
                    let merge_mode = layout
                        .project(item.change.project())
                        .map(|p| p.merge_mode)
                        .unwrap_or_default();
                    actions.merges.push(MergerItem::for_change(
                        &item.change,
                        merge_mode,
                        build_set_id,
                    ));
                    item.build_set.merge_state = MergeState::Pending;
                    continue;
                }
                MergeState::Pending => continue,
                MergeState::Complete => {}
            }

            // Freeze phase.
            let needs_graph = pipeline
                .items
                .get(id)
                .is_some_and(|item| item.build_set.job_graph.is_none());
            if needs_graph {
                let change = match pipeline.items.get(id) {
                    Some(item) => item.change.clone(),
                    None => continue,
                };
                let probe =
                    ItemConfigUpdateProbe::new(&change, layout, &pipeline_name, post_review);
                let frozen = layout.create_job_graph(
                    &change,
                    change.project(),
                    FreezeContext {
                        pipeline: &pipeline_name,
                        post_review,
                        skip_file_matcher: false,
                    },
                    &probe,
                );
                match frozen {
                    Ok(graph) => {
                        debug!(item = %id.short(), jobs = graph.len(), "job graph frozen");
                        if let Some(item) = pipeline.items.get_mut(id) {
                            item.build_set.job_graph = Some(graph);
                            item.layout_uuid = Some(layout.uuid);
                        }
                    }
                    Err(error) => {
                        warn!(item = %id.short(), %error, "job graph freeze failed");
                        let diagnostic = ConfigurationError {
                            context: format!(
                                "{} ({})",
                                change.project(),
                                change.branch().unwrap_or("?")
                            ),
                            mark: "job graph".to_string(),
                            text: error.to_string(),
                        };
                        let cancels = pipeline.items.set_config_errors(id, vec![diagnostic]);
                        actions.absorb_cancellations(cancels);
                        continue;
                    }
                }
            }

            // Resource phase.
            let to_request = pipeline
                .items
                .find_jobs_to_request(id, layout, semaphores);
            for job_name in to_request {
                let request = {
                    let Some(item) = pipeline.items.get(id) else {
                        continue;
                    };
                    let Some(job) = item
                        .build_set
                        .job_graph
                        .as_ref()
                        .and_then(|g| g.get_job(&job_name))
                    else {
                        continue;
                    };
                    let unblocks_paused_parent = job.dependencies.iter().any(|dep| {
                        item.build_set
                            .get_build(&dep.name)
                            .map(|b| b.paused)
                            .unwrap_or(false)
                    });
                    NodeRequest::new(
                        &job_name,
                        job.nodeset.clone(),
                        precedence.priority(),
                        relative_priority,
                        unblocks_paused_parent,
                    )
                };
                if let Some(item) = pipeline.items.get_mut(id) {
                    item.build_set.set_node_request(&job_name, request.clone());
                }
                actions.node_requests.push((id, request));
            }

            // Run phase.
            let to_run = pipeline.items.find_jobs_to_run(id, layout, semaphores);
            for job_name in to_run {
                let request = {
                    let Some(item) = pipeline.items.get(id) else {
                        continue;
                    };
                    let Some(job) = item
                        .build_set
                        .job_graph
                        .as_ref()
                        .and_then(|g| g.get_job(&job_name))
                        .cloned()
                    else {
                        continue;
                    };
                    let artifacts = pipeline
                        .items
                        .collect_provided_artifacts(id, &job, history);
                    ExecutorRequest {
                        build_id: ModelId::new(),
                        build_set_id,
                        item_id: id,
                        change: item.change.clone(),
                        nodeset: item.build_set.get_nodeset(&job_name).cloned(),
                        job,
                        artifacts,
                    }
                };
                let added = pipeline.items.get_mut(id).is_some_and(|item| {
                    let mut build = Build::new(&job_name);
                    build.id = request.build_id;
                    item.build_set.add_build(build).is_ok()
                });
                if added {
                    info!(item = %id.short(), job = %job_name, "starting job");
                    actions.starts.push(request);
                }
            }

            // Resume paused builds once every direct dependent finished.
            let resumes: Vec<(String, ModelId)> = {
                let Some(item) = pipeline.items.get(id) else {
                    continue;
                };
                let Some(graph) = item.build_set.job_graph.as_ref() else {
                    continue;
                };
                graph
                    .jobs()
                    .iter()
                    .filter_map(|job| {
                        let build = item.build_set.get_build(&job.name)?;
                        if !build.paused || build.is_complete() {
                            return None;
                        }
                        let children_done = graph.direct_dependent_jobs(&job.name).iter().all(
                            |child| {
                                item.build_set
                                    .get_build(&child.name)
                                    .is_some_and(Build::is_complete)
                            },
                        );
                        children_done.then(|| (job.name.clone(), build.id))
                    })
                    .collect()
            };
            for (job_name, build_id) in resumes {
                if let Some(build) = pipeline
                    .items
                    .get_mut(id)
                    .and_then(|i| i.build_set.get_build_mut(&job_name))
                {
                    build.paused = false;
                }
                actions.resumes.push(build_id);
            }
        }
    }

    fn complete_pipeline_items(
        pipeline: &mut Pipeline,
        semaphores: &mut SemaphoreHandler,
        times: &TimeDatabase,
        tenant_name: &str,
        actions: &mut Actions,
        reports: &mut Vec<ItemReport>,
    ) {
        for queue_index in 0..pipeline.queues.len() {
            let item_ids: Vec<ModelId> = pipeline.queues[queue_index].items().to_vec();
            for id in item_ids {
                let Some(item) = pipeline.items.get(id) else {
                    continue;
                };
                if !item.live {
                    // A placeholder is only useful while something is
                    // speculating on it.
                    if item.items_behind.is_empty() {
                        pipeline.dequeue_item(id);
                    }
                    continue;
                }
                if !pipeline.items.are_all_jobs_complete(id) {
                    continue;
                }
                // A finished bundle member waits for its partners; the
                // window arithmetic stops it from blocking the queue.
                let mut bundle_failed = false;
                if let Some(bundle_id) = item.bundle {
                    if let Some(bundle) = pipeline.bundles.get(&bundle_id) {
                        if !bundle.all_items_complete(&pipeline.items) {
                            continue;
                        }
                        bundle_failed = bundle.has_any_failed(&pipeline.items);
                    }
                }

                if bundle_failed && !pipeline.items.has_any_job_failed(id) {
                    // This member finished fine, but a partner did not.
                    actions.absorb_cancellations(
                        pipeline
                            .items
                            .set_dequeued_bundle_failing(id, "bundle partner failed"),
                    );
                }

                let success = pipeline.items.did_all_jobs_succeed(id) && !bundle_failed;
                if let Some(queue) = pipeline
                    .queues
                    .get_mut(queue_index)
                {
                    if success {
                        queue.increase_window_size();
                    } else {
                        queue.decrease_window_size();
                    }
                }
                pipeline.record_reporting_result(success);

                if let Some(status) =
                    format_item_status(&pipeline.items, id, tenant_name, times, Utc::now())
                {
                    let item = pipeline.items.get(id);
                    reports.push(ItemReport {
                        pipeline: pipeline.name.clone(),
                        item: status,
                        success,
                        config_errors: item
                            .map(|i| i.build_set.config_errors.clone())
                            .unwrap_or_default(),
                        warnings: item
                            .map(|i| i.build_set.warning_messages.clone())
                            .unwrap_or_default(),
                    });
                }

                info!(pipeline = %pipeline.name, item = %id.short(), success, "reporting and dequeuing item");
                let behind_ids: Vec<ModelId> = pipeline.queues[queue_index]
                    .items()
                    .iter()
                    .skip_while(|&&i| i != id)
                    .skip(1)
                    .copied()
                    .collect();
                if let Some(removed) = pipeline.dequeue_item(id) {
                    actions.merge_cancels.push(removed.build_set.id);
                }
                semaphores.release_all_for_item(id);

                // A failure invalidates the speculative state of every
                // item behind: they re-test against the spliced chain.
                if !success && pipeline.manager == ManagerKind::Dependent {
                    for behind_id in behind_ids {
                        let is_live = pipeline
                            .items
                            .get(behind_id)
                            .map(|i| i.live)
                            .unwrap_or(false);
                        if is_live {
                            let cancels =
                                pipeline.items.reset_all_builds(behind_id, semaphores);
                            actions.absorb_cancellations(cancels);
                        }
                    }
                }
            }
        }
    }

    /// Dispatch a batch of external calls. Failures degrade the affected
    /// build rather than crashing the pass.
    pub async fn dispatch(&mut self, actions: Actions) {
        for merge in actions.merges {
            let build_set_id = merge.build_set_id;
            if let Err(error) = self.merger.submit(merge).await {
                warn!(%error, "merge submission failed");
                if let Some((pipeline_index, item_id)) = self.find_item_by_build_set(build_set_id)
                {
                    let pipeline = &mut self.tenant.pipelines[pipeline_index];
                    if let Some(item) = pipeline.items.get_mut(item_id) {
                        item.build_set.merge_state = MergeState::Complete;
                    }
                    pipeline
                        .items
                        .set_unable_to_merge(item_id, vec![error.to_string()]);
                }
            }
        }
        for (item_id, request) in actions.node_requests {
            let job_name = request.job_name.clone();
            let request_id = request.id;
            if let Err(error) = self.provisioner.submit(item_id, request).await {
                warn!(%error, job = %job_name, "node request submission failed");
                self.handle_event(SchedulerEvent::Nodes(NodesProvisioned {
                    item_id,
                    job_name,
                    request_id,
                    nodeset: None,
                }));
            }
        }
        for start in actions.starts {
            let item_id = start.item_id;
            let job_name = start.job.name.clone();
            if let Err(error) = self.executor.start(start).await {
                warn!(%error, job = %job_name, "build start failed");
                self.handle_event(SchedulerEvent::Build(BuildEvent::Completed(
                    BuildCompleted {
                        item_id,
                        job_name,
                        result: BuildResult::Failure,
                        result_data: serde_json::Value::Object(Default::default()),
                        retry: true,
                        end_time: Utc::now(),
                    },
                )));
            }
        }
        for build_id in actions.resumes {
            if let Err(error) = self.executor.resume(build_id).await {
                warn!(%error, build = %build_id.short(), "build resume failed");
            }
        }
        for build_id in actions.cancels.builds {
            if let Err(error) = self.executor.cancel(build_id).await {
                warn!(%error, build = %build_id.short(), "build cancel failed");
            }
        }
        for request_id in actions.cancels.node_requests {
            if let Err(error) = self.provisioner.cancel(request_id).await {
                warn!(%error, request = %request_id.short(), "node request cancel failed");
            }
        }
        for build_set_id in actions.merge_cancels {
            if let Err(error) = self.merger.cancel(build_set_id).await {
                warn!(%error, build_set = %build_set_id.short(), "merge cancel failed");
            }
        }
    }

    /// Compute and dispatch one pass, returning the reports for items
    /// that left their pipelines.
    pub async fn run_pass(&mut self) -> Vec<ItemReport> {
        let (actions, reports) = self.compute_pass();
        self.dispatch(actions).await;
        reports
    }

    /// Event loop: apply each completion event, then reschedule. Runs
    /// until the event channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SchedulerEvent>,
        reports: mpsc::Sender<ItemReport>,
    ) {
        info!(tenant = %self.tenant.name, "starting tenant scheduler");
        for report in self.run_pass().await {
            let _ = reports.send(report).await;
        }
        while let Some(event) = events.recv().await {
            let actions = self.handle_event(event);
            self.dispatch(actions).await;
            for report in self.run_pass().await {
                let _ = reports.send(report).await;
            }
        }
    }

    /// Discard an item's speculative state (new build set) and cancel
    /// its in-flight work; used when the change is updated in place.
    pub async fn reset_item(&mut self, pipeline_name: &str, item_id: ModelId) {
        let mut batch = Actions::default();
        if let Some(pipeline) = self
            .tenant
            .pipelines
            .iter_mut()
            .find(|p| p.name == pipeline_name)
        {
            let old_build_set = pipeline.items.get(item_id).map(|i| i.build_set.id);
            let cancels = pipeline
                .items
                .reset_all_builds(item_id, &mut self.tenant.semaphores);
            batch.absorb_cancellations(cancels);
            if let Some(bs) = old_build_set {
                batch.merge_cancels.push(bs);
            }
        }
        self.dispatch(batch).await;
    }

    /// Status export for every pipeline of the tenant.
    pub fn format_status(&self) -> Vec<crate::status::PipelineStatus> {
        self.tenant
            .pipelines
            .iter()
            .map(|p| crate::status::format_pipeline_status(p, &self.tenant.times, Utc::now()))
            .collect()
    }
}
