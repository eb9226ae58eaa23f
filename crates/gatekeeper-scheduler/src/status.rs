//! Status JSON export for pipelines, queues, items and jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatekeeper_core::times::{TimeDatabase, TimeKey};
use gatekeeper_core::ModelId;

use crate::item::ItemArena;
use crate::pipeline::Pipeline;

/// One job of one item, as shown in the status page.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub dependencies: Vec<String>,
    pub uuid: Option<String>,
    pub result: Option<String>,
    pub voting: bool,
    /// Milliseconds since the build started, while running or total once
    /// finished.
    pub elapsed_time: Option<i64>,
    /// Estimated milliseconds to completion, from historical timing.
    pub remaining_time: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub paused: bool,
    pub canceled: bool,
    pub node_labels: Vec<String>,
    pub waiting_reason: Option<String>,
}

/// One queue item, as shown in the status page.
#[derive(Debug, Clone, Serialize)]
pub struct ItemStatus {
    pub id: String,
    pub change: String,
    pub url: Option<String>,
    pub item_ahead: Option<String>,
    pub live: bool,
    pub active: bool,
    pub enqueue_time: DateTime<Utc>,
    pub jobs: Vec<JobStatus>,
    /// Max over running jobs of estimated-minus-elapsed, milliseconds.
    pub remaining_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub window: u32,
    pub items: Vec<ItemStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub name: String,
    pub disabled: bool,
    pub queues: Vec<QueueStatus>,
}

/// Format one item for status export.
pub fn format_item_status(
    arena: &ItemArena,
    id: ModelId,
    tenant: &str,
    times: &TimeDatabase,
    now: DateTime<Utc>,
) -> Option<ItemStatus> {
    let item = arena.get(id)?;
    let mut jobs = Vec::new();
    let mut remaining: Option<i64> = None;
    if let Some(graph) = &item.build_set.job_graph {
        for job in graph.jobs() {
            let build = item.build_set.get_build(&job.name);
            let estimate_ms = times
                .estimated_duration(&TimeKey {
                    tenant: tenant.to_string(),
                    project: item.change.project().to_string(),
                    branch: item.change.branch().unwrap_or("").to_string(),
                    job: job.name.clone(),
                })
                .map(|secs| (secs * 1000.0) as i64);

            let elapsed_ms = build
                .and_then(|b| b.elapsed(now))
                .map(|d| d.num_milliseconds());
            let job_remaining = match (build, elapsed_ms, estimate_ms) {
                (Some(b), Some(elapsed), Some(estimate)) if !b.is_complete() => {
                    Some((estimate - elapsed).max(0))
                }
                (Some(b), _, _) if b.is_complete() => Some(0),
                _ => estimate_ms,
            };
            if let Some(build) = build {
                if !build.is_complete() && build.start_time.is_some() {
                    remaining = remaining.max(job_remaining);
                }
            }

            let waiting_reason = if build.is_none() {
                if item.build_set.get_node_request(&job.name).is_some() {
                    Some("waiting for nodes".to_string())
                } else if !job.nodeset.is_empty()
                    && item.build_set.get_nodeset(&job.name).is_none()
                {
                    Some("waiting to request nodes".to_string())
                } else {
                    Some("waiting for dependencies".to_string())
                }
            } else {
                None
            };

            jobs.push(JobStatus {
                name: job.name.clone(),
                dependencies: job.dependencies.iter().map(|d| d.name.clone()).collect(),
                uuid: build.map(|b| b.id.to_string()),
                result: build.and_then(|b| b.result).map(|r| r.to_string()),
                voting: job.voting,
                elapsed_time: elapsed_ms,
                remaining_time: job_remaining,
                start_time: build.and_then(|b| b.start_time),
                end_time: build.and_then(|b| b.end_time),
                paused: build.map(|b| b.paused).unwrap_or(false),
                canceled: build.map(|b| b.canceled).unwrap_or(false),
                node_labels: build
                    .and_then(|b| b.nodeset.as_ref())
                    .map(|ns| ns.labels())
                    .unwrap_or_default(),
                waiting_reason,
            });
        }
    }
    Some(ItemStatus {
        id: item.id.to_string(),
        change: item.change.display_id(),
        url: item.change.url().map(|u| u.to_string()),
        item_ahead: item.item_ahead.map(|a| a.to_string()),
        live: item.live,
        active: item.active,
        enqueue_time: item.enqueue_time,
        jobs,
        remaining_time: remaining,
    })
}

/// Format a whole pipeline for status export.
pub fn format_pipeline_status(
    pipeline: &Pipeline,
    times: &TimeDatabase,
    now: DateTime<Utc>,
) -> PipelineStatus {
    let queues = pipeline
        .queues
        .iter()
        .map(|queue| QueueStatus {
            name: queue.name.clone(),
            window: queue.window,
            items: queue
                .items()
                .iter()
                .filter_map(|&id| {
                    format_item_status(&pipeline.items, id, &pipeline.tenant, times, now)
                })
                .collect(),
        })
        .collect();
    PipelineStatus {
        name: pipeline.name.clone(),
        disabled: pipeline.is_disabled(),
        queues,
    }
}
