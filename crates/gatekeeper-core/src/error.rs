//! Error types for the Gatekeeper model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate job in graph: {0}")]
    DuplicateJob(String),

    #[error("dependency cycle detected at job {0}")]
    DependencyCycle(String),

    #[error("job {job} depends on unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },

    #[error("unable to modify final job {job}: attribute {attribute}")]
    FinalJobOverride { job: String, attribute: String },

    #[error("unable to modify protected job {job} from project {project}")]
    ProtectedJobOverride { job: String, project: String },

    #[error("intermediate job {job} may only be inherited by an abstract job (found {child})")]
    IntermediateJobInheritance { job: String, child: String },

    #[error("job {0} is abstract and may not be run directly")]
    AbstractJobExecution(String),

    #[error("build already exists for job {0}")]
    DuplicateBuild(String),

    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error("duplicate node in nodeset: {0}")]
    DuplicateNode(String),

    #[error("duplicate group in nodeset: {0}")]
    DuplicateGroup(String),

    #[error("invalid pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("timing record decode failed: {0}")]
    TimeRecordDecode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
