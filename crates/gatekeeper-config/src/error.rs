//! Configuration errors and user-visible diagnostics.

use gatekeeper_core::build::ConfigurationError;
use gatekeeper_core::job::SourceContext;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("unknown {kind}: {name}")]
    UnknownReference { kind: &'static str, name: String },

    #[error("no matching variant for job {0}")]
    NoMatchingParent(String),

    #[error("inheritance cycle detected at job {0}")]
    InheritanceCycle(String),

    #[error("job {0} has no run playbook")]
    MissingRunPlaybook(String),

    #[error("project {project} is not allowed to run job {job}")]
    ProjectNotAllowed { job: String, project: String },

    #[error("post-review job {0} may not run in a pre-review pipeline")]
    PostReviewJob(String),

    #[error(transparent)]
    Model(#[from] gatekeeper_core::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Build a diagnostic value attributing an error to its source stanza.
pub fn configuration_error(
    context: &SourceContext,
    mark: impl Into<String>,
    text: impl std::fmt::Display,
) -> ConfigurationError {
    ConfigurationError {
        context: format!("{} ({}) {}", context.project, context.branch, context.path),
        mark: mark.into(),
        text: text.to_string(),
    }
}

/// Diagnostics accumulated while loading a tenant's configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadingErrors {
    errors: Vec<ConfigurationError>,
}

impl LoadingErrors {
    pub fn add(&mut self, error: ConfigurationError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[ConfigurationError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}
