//! Named counting locks bounding concurrent job execution.

use serde::{Deserialize, Serialize};

/// A semaphore definition: at most `max` jobs tagged with it run at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semaphore {
    pub name: String,
    pub max: u32,
}

impl Semaphore {
    pub fn new(name: impl Into<String>, max: u32) -> Self {
        Self {
            name: name.into(),
            max: max.max(1),
        }
    }
}

/// A job's reference to a semaphore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSemaphore {
    pub name: String,
    /// Request nodes before acquiring the semaphore, so the semaphore is
    /// not held while the job waits for node allocation.
    pub resources_first: bool,
}
