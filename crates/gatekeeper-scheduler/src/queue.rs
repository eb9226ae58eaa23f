//! Change queues: ordered runs of queue items sharing project affinity,
//! with a sliding admission window.
//!
//! The window follows the shape of TCP congestion control: grow after
//! each success, back off after each failure, never below the floor.
//! This bounds how many speculative merge attempts run concurrently when
//! changes ahead may still fail.

use std::collections::HashMap;

use tracing::{debug, info};

use gatekeeper_config::unparsed::{WindowConfig, WindowMode};
use gatekeeper_core::change::Change;
use gatekeeper_core::ModelId;

use crate::bundle::Bundle;
use crate::item::{ItemArena, QueueItem};

/// An ordered, windowed run of queue items within one pipeline.
#[derive(Debug)]
pub struct ChangeQueue {
    pub name: String,
    /// (project, branch) pairs this queue serves; `None` branch means
    /// every branch of the project.
    project_branches: Vec<(String, Option<String>)>,
    items: Vec<ModelId>,
    /// 0 means unbounded; distinct from a window decayed to the floor.
    pub window: u32,
    pub window_floor: u32,
    increase_mode: WindowMode,
    increase_factor: u32,
    decrease_mode: WindowMode,
    decrease_factor: u32,
}

impl ChangeQueue {
    pub fn new(name: impl Into<String>, config: WindowConfig) -> Self {
        Self {
            name: name.into(),
            project_branches: Vec::new(),
            items: Vec::new(),
            window: config.window,
            window_floor: config.floor.max(1),
            increase_mode: config.increase_mode,
            increase_factor: config.increase_factor,
            decrease_mode: config.decrease_mode,
            decrease_factor: config.decrease_factor,
        }
    }

    pub fn add_project_branch(&mut self, project: impl Into<String>, branch: Option<String>) {
        let pair = (project.into(), branch);
        if !self.project_branches.contains(&pair) {
            self.project_branches.push(pair);
        }
    }

    pub fn serves(&self, project: &str, branch: Option<&str>) -> bool {
        self.project_branches.iter().any(|(p, b)| {
            p == project && (b.is_none() || b.as_deref() == branch)
        })
    }

    /// Item ids in processing (enqueue) order.
    pub fn items(&self) -> &[ModelId] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a new item for a change and link it behind the current
    /// tail.
    pub fn enqueue_change(&mut self, arena: &mut ItemArena, change: Change, live: bool) -> ModelId {
        let mut item = QueueItem::new(change, live);
        let tail = self.items.last().copied();
        item.item_ahead = tail;
        let id = arena.insert(item);
        if let Some(tail_id) = tail {
            if let Some(tail_item) = arena.get_mut(tail_id) {
                tail_item.items_behind.push(id);
            }
        }
        self.items.push(id);
        info!(queue = %self.name, item = %id.short(), "enqueued item");
        id
    }

    /// Splice an item out, relinking its neighbors in O(1) chain work,
    /// and return it.
    pub fn dequeue_item(&mut self, arena: &mut ItemArena, id: ModelId) -> Option<QueueItem> {
        let position = self.items.iter().position(|&i| i == id)?;
        self.items.remove(position);
        let item = arena.remove(id)?;
        if let Some(ahead_id) = item.item_ahead {
            if let Some(ahead) = arena.get_mut(ahead_id) {
                ahead.items_behind.retain(|&b| b != id);
                ahead.items_behind.extend(&item.items_behind);
            }
        }
        for &behind_id in &item.items_behind {
            if let Some(behind) = arena.get_mut(behind_id) {
                behind.item_ahead = item.item_ahead;
            }
        }
        info!(queue = %self.name, item = %id.short(), "dequeued item");
        Some(item)
    }

    /// Relocate an item behind a new ahead item (or to the front), used
    /// for manual reordering. Returns false when already in place.
    pub fn move_item(
        &mut self,
        arena: &mut ItemArena,
        id: ModelId,
        new_ahead: Option<ModelId>,
    ) -> bool {
        let Some(current_ahead) = self.items.iter().position(|&i| i == id).map(|_| {
            arena.get(id).and_then(|i| i.item_ahead)
        }) else {
            return false;
        };
        if current_ahead == new_ahead {
            return false;
        }

        // Detach: re-parent everything behind us onto our old ahead.
        let (old_ahead, behinds) = {
            let Some(item) = arena.get_mut(id) else {
                return false;
            };
            let behinds = std::mem::take(&mut item.items_behind);
            (item.item_ahead.take(), behinds)
        };
        if let Some(old_ahead_id) = old_ahead {
            if let Some(old) = arena.get_mut(old_ahead_id) {
                old.items_behind.retain(|&b| b != id);
                old.items_behind.extend(&behinds);
            }
        }
        for &behind_id in &behinds {
            if let Some(behind) = arena.get_mut(behind_id) {
                behind.item_ahead = old_ahead;
            }
        }

        // Attach behind the new ahead.
        if let Some(item) = arena.get_mut(id) {
            item.item_ahead = new_ahead;
        }
        if let Some(new_ahead_id) = new_ahead {
            if let Some(new) = arena.get_mut(new_ahead_id) {
                new.items_behind.push(id);
            }
        }

        // Reposition in processing order.
        self.items.retain(|&i| i != id);
        let insert_at = match new_ahead {
            Some(ahead_id) => {
                self.items
                    .iter()
                    .position(|&i| i == ahead_id)
                    .map(|p| p + 1)
                    .unwrap_or(self.items.len())
            }
            None => 0,
        };
        self.items.insert(insert_at, id);
        true
    }

    /// Whether the item may be worked on. With an unbounded window every
    /// item is actionable; otherwise the item must sit within the first
    /// `window + num_waiting` positions, where waiting counts items that
    /// are done themselves but whose bundle partners are still pending.
    /// A finished-but-blocked bundle member must not eat a window slot,
    /// or the bundle deadlocks.
    pub fn is_actionable(
        &self,
        arena: &ItemArena,
        bundles: &HashMap<ModelId, Bundle>,
        id: ModelId,
    ) -> bool {
        if self.window == 0 {
            return true;
        }
        let num_waiting = self
            .items
            .iter()
            .filter(|&&item_id| {
                let Some(item) = arena.get(item_id) else {
                    return false;
                };
                let Some(bundle_id) = item.bundle else {
                    return false;
                };
                arena.are_all_jobs_complete(item_id)
                    && bundles
                        .get(&bundle_id)
                        .map(|b| !b.all_items_complete(arena))
                        .unwrap_or(false)
            })
            .count();
        let window = self.window as usize + num_waiting;
        self.items.iter().take(window).any(|&i| i == id)
    }

    /// Grow the window after a successful item. No-op when unbounded.
    pub fn increase_window_size(&mut self) {
        if self.window == 0 {
            return;
        }
        let old = self.window;
        self.window = match self.increase_mode {
            WindowMode::Linear => self.window.saturating_add(self.increase_factor),
            WindowMode::Exponential => self.window.saturating_mul(self.increase_factor.max(1)),
        };
        debug!(queue = %self.name, old, new = self.window, "window increased");
    }

    /// Shrink the window after a failed item, never below the floor.
    /// No-op when unbounded.
    pub fn decrease_window_size(&mut self) {
        if self.window == 0 {
            return;
        }
        let old = self.window;
        self.window = match self.decrease_mode {
            WindowMode::Linear => self
                .window
                .saturating_sub(self.decrease_factor)
                .max(self.window_floor),
            WindowMode::Exponential => {
                (self.window / self.decrease_factor.max(1)).max(self.window_floor)
            }
        };
        debug!(queue = %self.name, old, new = self.window, "window decreased");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::change::{ProposedInfo, RefInfo};
    use gatekeeper_core::graph::JobGraph;
    use gatekeeper_core::job::Job;

    fn change(number: u64) -> Change {
        Change::Proposed {
            info: RefInfo {
                project: "demo".to_string(),
                connection: "gerrit".to_string(),
                ref_name: format!("refs/changes/{number}/1"),
                old_rev: None,
                new_rev: None,
                files: vec![],
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

    fn window_config(window: u32, floor: u32) -> WindowConfig {
        WindowConfig {
            window,
            floor,
            increase_mode: WindowMode::Linear,
            increase_factor: 1,
            decrease_mode: WindowMode::Exponential,
            decrease_factor: 2,
        }
    }

    #[test]
    fn test_enqueue_links_chain() {
        let mut arena = ItemArena::new();
        let mut queue = ChangeQueue::new("integrated", window_config(0, 1));
        let a = queue.enqueue_change(&mut arena, change(1), true);
        let b = queue.enqueue_change(&mut arena, change(2), true);
        let c = queue.enqueue_change(&mut arena, change(3), true);

        assert_eq!(arena.get(a).unwrap().item_ahead, None);
        assert_eq!(arena.get(b).unwrap().item_ahead, Some(a));
        assert_eq!(arena.get(c).unwrap().item_ahead, Some(b));
        assert_eq!(arena.get(a).unwrap().items_behind, vec![b]);
        assert_eq!(arena.get(b).unwrap().items_behind, vec![c]);
    }

    #[test]
    fn test_dequeue_relinks_neighbors() {
        let mut arena = ItemArena::new();
        let mut queue = ChangeQueue::new("integrated", window_config(0, 1));
        let a = queue.enqueue_change(&mut arena, change(1), true);
        let b = queue.enqueue_change(&mut arena, change(2), true);
        let c = queue.enqueue_change(&mut arena, change(3), true);

        queue.dequeue_item(&mut arena, b).unwrap();
        assert_eq!(queue.items(), &[a, c]);
        assert_eq!(arena.get(c).unwrap().item_ahead, Some(a));
        assert_eq!(arena.get(a).unwrap().items_behind, vec![c]);
        assert!(arena.get(b).is_none());

        // Dequeue the head: c becomes the new head.
        queue.dequeue_item(&mut arena, a).unwrap();
        assert_eq!(arena.get(c).unwrap().item_ahead, None);
    }

    #[test]
    fn test_move_item_to_front() {
        let mut arena = ItemArena::new();
        let mut queue = ChangeQueue::new("integrated", window_config(0, 1));
        let a = queue.enqueue_change(&mut arena, change(1), true);
        let b = queue.enqueue_change(&mut arena, change(2), true);
        let c = queue.enqueue_change(&mut arena, change(3), true);

        assert!(queue.move_item(&mut arena, c, None));
        assert_eq!(queue.items(), &[c, a, b]);
        assert_eq!(arena.get(c).unwrap().item_ahead, None);
        assert_eq!(arena.get(b).unwrap().items_behind, Vec::<ModelId>::new());

        // Already at the front; nothing to do.
        assert!(!queue.move_item(&mut arena, c, None));
    }

    #[test]
    fn test_window_admission() {
        let mut arena = ItemArena::new();
        let bundles = HashMap::new();
        let mut queue = ChangeQueue::new("integrated", window_config(2, 1));
        let ids: Vec<_> = (1..=5)
            .map(|n| queue.enqueue_change(&mut arena, change(n), true))
            .collect();

        let actionable: Vec<bool> = ids
            .iter()
            .map(|&id| queue.is_actionable(&arena, &bundles, id))
            .collect();
        assert_eq!(actionable, vec![true, true, false, false, false]);
    }

    #[test]
    fn test_unbounded_window_is_always_actionable() {
        let mut arena = ItemArena::new();
        let bundles = HashMap::new();
        let mut queue = ChangeQueue::new("check", window_config(0, 1));
        let ids: Vec<_> = (1..=4)
            .map(|n| queue.enqueue_change(&mut arena, change(n), true))
            .collect();
        assert!(ids.iter().all(|&id| queue.is_actionable(&arena, &bundles, id)));
    }

    #[test]
    fn test_waiting_bundle_member_extends_window() {
        let mut arena = ItemArena::new();
        let mut bundles = HashMap::new();
        let mut queue = ChangeQueue::new("integrated", window_config(1, 1));
        let a = queue.enqueue_change(&mut arena, change(1), true);
        let b = queue.enqueue_change(&mut arena, change(2), true);
        let c = queue.enqueue_change(&mut arena, change(3), true);

        // a is done but belongs to a bundle whose partner (c) is not.
        let mut graph_a = JobGraph::new();
        graph_a.add_job(Job::new("unit")).unwrap();
        let mut graph_c = JobGraph::new();
        graph_c.add_job(Job::new("unit")).unwrap();
        arena.get_mut(a).unwrap().build_set.job_graph = Some(graph_a);
        arena.get_mut(c).unwrap().build_set.job_graph = Some(graph_c);
        arena
            .get_mut(a)
            .unwrap()
            .build_set
            .add_build(gatekeeper_core::build::Build::synthetic(
                "unit",
                gatekeeper_core::build::BuildResult::Success,
            ))
            .unwrap();

        let mut bundle = Bundle::new();
        bundle.add_item(a);
        bundle.add_item(c);
        let bundle_id = bundle.id;
        arena.get_mut(a).unwrap().bundle = Some(bundle_id);
        arena.get_mut(c).unwrap().bundle = Some(bundle_id);
        bundles.insert(bundle_id, bundle);

        // Window is 1, but the finished-and-blocked a does not consume a
        // slot, so b is actionable too.
        assert!(queue.is_actionable(&arena, &bundles, a));
        assert!(queue.is_actionable(&arena, &bundles, b));
        assert!(!queue.is_actionable(&arena, &bundles, c));
    }

    #[test]
    fn test_window_floor_invariant() {
        let mut queue = ChangeQueue::new("integrated", window_config(20, 3));
        for _ in 0..10 {
            queue.decrease_window_size();
            assert!(queue.window >= queue.window_floor);
        }
        assert_eq!(queue.window, 3);
        queue.increase_window_size();
        assert_eq!(queue.window, 4);

        // Interleaved growth and backoff stays above the floor.
        for i in 0..100 {
            if i % 3 == 0 {
                queue.increase_window_size();
            } else {
                queue.decrease_window_size();
            }
            assert!(queue.window >= queue.window_floor);
        }
    }

    #[test]
    fn test_unbounded_window_never_resizes() {
        let mut queue = ChangeQueue::new("check", window_config(0, 1));
        queue.increase_window_size();
        queue.decrease_window_size();
        assert_eq!(queue.window, 0);
    }
}
