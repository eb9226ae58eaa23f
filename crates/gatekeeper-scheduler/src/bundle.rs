//! Bundles: sets of queue items that succeed or fail together.
//!
//! Circular cross-repo dependencies enqueue one item per change; the
//! bundle ties their outcomes so none is reported merged unless all can
//! be.

use gatekeeper_core::ModelId;

use crate::item::ItemArena;

#[derive(Debug, Default)]
pub struct Bundle {
    pub id: ModelId,
    pub items: Vec<ModelId>,
    /// Reporting of the bundle's items has begun; membership is frozen.
    pub started_reporting: bool,
    /// Some item failed to report; the rest must not merge.
    pub failed_reporting: bool,
    /// The merger could not construct the combined state.
    pub cannot_merge: bool,
}

impl Bundle {
    pub fn new() -> Self {
        Self {
            id: ModelId::new(),
            ..Default::default()
        }
    }

    pub fn add_item(&mut self, item: ModelId) {
        if !self.items.contains(&item) {
            self.items.push(item);
        }
    }

    pub fn all_items_complete(&self, arena: &ItemArena) -> bool {
        self.items.iter().all(|&id| arena.are_all_jobs_complete(id))
    }

    pub fn did_all_succeed(&self, arena: &ItemArena) -> bool {
        !self.cannot_merge
            && !self.failed_reporting
            && self.items.iter().all(|&id| arena.did_all_jobs_succeed(id))
    }

    pub fn has_any_failed(&self, arena: &ItemArena) -> bool {
        self.cannot_merge
            || self.failed_reporting
            || self.items.iter().any(|&id| arena.has_any_job_failed(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::QueueItem;
    use chrono::Utc;
    use gatekeeper_core::build::{Build, BuildResult};
    use gatekeeper_core::change::{Change, ProposedInfo, RefInfo};
    use gatekeeper_core::graph::JobGraph;
    use gatekeeper_core::job::Job;
    use serde_json::json;

    fn change(project: &str) -> Change {
        Change::Proposed {
            info: RefInfo {
                project: project.to_string(),
                connection: "gerrit".to_string(),
                ref_name: "refs/changes/1/1".to_string(),
                old_rev: None,
                new_rev: None,
                files: vec![],
                message: String::new(),
            },
            proposed: ProposedInfo {
                number: 1,
                patchset: 1,
                url: None,
                branch: "main".to_string(),
                needs_changes: vec![],
                needed_by: vec![],
                is_merged: false,
            },
        }
    }

    fn one_job_item(arena: &mut ItemArena, project: &str) -> ModelId {
        let mut graph = JobGraph::new();
        graph.add_job(Job::new("unit")).unwrap();
        let mut item = QueueItem::new(change(project), true);
        item.build_set.job_graph = Some(graph);
        arena.insert(item)
    }

    #[test]
    fn test_bundle_completion_tracks_members() {
        let mut arena = ItemArena::new();
        let a = one_job_item(&mut arena, "repo-a");
        let b = one_job_item(&mut arena, "repo-b");
        let mut bundle = Bundle::new();
        bundle.add_item(a);
        bundle.add_item(b);

        assert!(!bundle.all_items_complete(&arena));

        for id in [a, b] {
            arena
                .get_mut(id)
                .unwrap()
                .build_set
                .add_build(Build::new("unit"))
                .unwrap();
        }
        arena.record_build_result(a, "unit", BuildResult::Success, json!({}), false, Utc::now());
        assert!(!bundle.all_items_complete(&arena));

        arena.record_build_result(b, "unit", BuildResult::Failure, json!({}), false, Utc::now());
        assert!(bundle.all_items_complete(&arena));
        assert!(bundle.has_any_failed(&arena));
        assert!(!bundle.did_all_succeed(&arena));
    }
}
