//! Semaphore accounting: bounding concurrent execution of
//! semaphore-tagged jobs across one tenant.
//!
//! The handler is plain state injected into scheduling calls; there is
//! no global registry. Acquire and release are the only mutators.

use std::collections::HashMap;

use tracing::debug;

use gatekeeper_config::Layout;
use gatekeeper_core::job::Job;
use gatekeeper_core::ModelId;

/// One current holder of a semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreHolder {
    pub item: ModelId,
    pub job_name: String,
}

/// Per-tenant semaphore state: name → current holders.
#[derive(Debug, Default)]
pub struct SemaphoreHandler {
    holders: HashMap<String, Vec<SemaphoreHolder>>,
}

impl SemaphoreHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the job's semaphore for `(item, job)`.
    ///
    /// Jobs without a semaphore always succeed. A `resources_first`
    /// semaphore defers during the resources-request phase: the call
    /// succeeds without recording a holder, and the real acquisition
    /// happens in the run phase. Re-acquiring an already-held pair is a
    /// pass-through, which is what makes retries safe.
    pub fn acquire(
        &mut self,
        layout: &Layout,
        item: ModelId,
        job: &Job,
        request_resources: bool,
    ) -> bool {
        let Some(semaphore) = &job.semaphore else {
            return true;
        };
        if request_resources && semaphore.resources_first {
            return true;
        }
        let holders = self.holders.entry(semaphore.name.clone()).or_default();
        let holder = SemaphoreHolder {
            item,
            job_name: job.name.clone(),
        };
        if holders.contains(&holder) {
            return true;
        }
        let max = layout.semaphore_max(&semaphore.name) as usize;
        if holders.len() >= max {
            return false;
        }
        debug!(semaphore = %semaphore.name, job = %job.name, item = %item.short(), "acquired semaphore");
        holders.push(holder);
        true
    }

    /// Release the job's semaphore for `(item, job)`. Empty buckets are
    /// removed entirely.
    pub fn release(&mut self, item: ModelId, job: &Job) {
        let Some(semaphore) = &job.semaphore else {
            return;
        };
        self.release_named(item, &job.name, &semaphore.name);
    }

    fn release_named(&mut self, item: ModelId, job_name: &str, semaphore_name: &str) {
        let Some(holders) = self.holders.get_mut(semaphore_name) else {
            return;
        };
        let before = holders.len();
        holders.retain(|h| !(h.item == item && h.job_name == job_name));
        if holders.len() != before {
            debug!(semaphore = %semaphore_name, job = %job_name, item = %item.short(), "released semaphore");
        }
        if holders.is_empty() {
            self.holders.remove(semaphore_name);
        }
    }

    /// Release every semaphore held by an item, used when its build set
    /// is discarded.
    pub fn release_all_for_item(&mut self, item: ModelId) {
        self.holders
            .retain(|_, holders| {
                holders.retain(|h| h.item != item);
                !holders.is_empty()
            });
    }

    /// Current holder count for a semaphore name.
    pub fn held(&self, semaphore_name: &str) -> usize {
        self.holders
            .get(semaphore_name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
