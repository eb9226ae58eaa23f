//! Pipelines: named gates owning change queues and their items.

use std::collections::HashMap;

use tracing::{info, warn};

use gatekeeper_config::unparsed::{ManagerKind, PipelineDef, Precedence, WindowConfig};
use gatekeeper_core::change::Change;
use gatekeeper_core::ModelId;

use crate::bundle::Bundle;
use crate::item::{ItemArena, QueueItem};
use crate::queue::ChangeQueue;

/// One pipeline of a tenant: definition plus live queue state.
#[derive(Debug)]
pub struct Pipeline {
    pub name: String,
    pub tenant: String,
    pub manager: ManagerKind,
    pub precedence: Precedence,
    pub post_review: bool,
    disable_after: Option<u32>,
    window_config: WindowConfig,
    pub queues: Vec<ChangeQueue>,
    pub items: ItemArena,
    pub bundles: HashMap<ModelId, Bundle>,
    consecutive_failures: u32,
    disabled: bool,
}

impl Pipeline {
    pub fn from_def(tenant: impl Into<String>, def: &PipelineDef) -> Self {
        Self {
            name: def.name.clone(),
            tenant: tenant.into(),
            manager: def.manager,
            precedence: def.precedence,
            post_review: def.post_review,
            disable_after: def.disable_after_consecutive_failures,
            window_config: def.window,
            queues: Vec::new(),
            items: ItemArena::new(),
            bundles: HashMap::new(),
            consecutive_failures: 0,
            disabled: false,
        }
    }

    /// Enqueue a change, selecting or creating the right queue.
    ///
    /// Independent pipelines test every item alone, so each change gets
    /// its own throwaway queue. Dependent pipelines share queues by
    /// project affinity: an existing queue serving the (project, branch)
    /// pair wins, then a queue with the configured name, then a new one.
    /// A pair never lands in two queues of one pipeline.
    pub fn enqueue_change(
        &mut self,
        change: Change,
        live: bool,
        queue_name: Option<&str>,
    ) -> ModelId {
        let queue_index = self.queue_index_for(&change, queue_name);
        self.queues[queue_index].enqueue_change(&mut self.items, change, live)
    }

    fn queue_index_for(&mut self, change: &Change, queue_name: Option<&str>) -> usize {
        let project = change.project().to_string();
        let branch = change.branch().map(str::to_string);

        if self.manager == ManagerKind::Independent {
            let mut queue = ChangeQueue::new(change.display_id(), self.window_config);
            queue.add_project_branch(project, branch);
            self.queues.push(queue);
            return self.queues.len() - 1;
        }

        if let Some(index) = self
            .queues
            .iter()
            .position(|q| q.serves(&project, branch.as_deref()))
        {
            return index;
        }
        let name = queue_name.unwrap_or(&project).to_string();
        if let Some(index) = self.queues.iter().position(|q| q.name == name) {
            self.queues[index].add_project_branch(project, branch);
            return index;
        }
        info!(pipeline = %self.name, queue = %name, "creating change queue");
        let mut queue = ChangeQueue::new(name, self.window_config);
        queue.add_project_branch(project, branch);
        self.queues.push(queue);
        self.queues.len() - 1
    }

    /// Remove an item from whichever queue holds it. Empty throwaway
    /// queues of independent pipelines are dropped with it.
    pub fn dequeue_item(&mut self, id: ModelId) -> Option<QueueItem> {
        let queue = self
            .queues
            .iter_mut()
            .find(|q| q.items().contains(&id))?;
        let item = queue.dequeue_item(&mut self.items, id);
        if self.manager == ManagerKind::Independent {
            self.queues.retain(|q| !q.is_empty());
        }
        item
    }

    pub fn queue_of(&self, id: ModelId) -> Option<&ChangeQueue> {
        self.queues.iter().find(|q| q.items().contains(&id))
    }

    /// All item ids in processing order, queue by queue.
    pub fn all_item_ids(&self) -> Vec<ModelId> {
        self.queues
            .iter()
            .flat_map(|q| q.items().iter().copied())
            .collect()
    }

    /// Track a reporting outcome for the auto-disable threshold.
    pub fn record_reporting_result(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
            return;
        }
        self.consecutive_failures += 1;
        if let Some(threshold) = self.disable_after {
            if !self.disabled && self.consecutive_failures >= threshold {
                warn!(
                    pipeline = %self.name,
                    failures = self.consecutive_failures,
                    "disabling pipeline after consecutive reporting failures"
                );
                self.disabled = true;
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn re_enable(&mut self) {
        self.disabled = false;
        self.consecutive_failures = 0;
    }
}
