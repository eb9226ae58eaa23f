//! Error types for the scheduler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown queue item: {0}")]
    UnknownItem(gatekeeper_core::ModelId),

    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("merger error: {0}")]
    Merger(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("node provisioner error: {0}")]
    Nodes(String),

    #[error(transparent)]
    Config(#[from] gatekeeper_config::ConfigError),

    #[error(transparent)]
    Model(#[from] gatekeeper_core::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
