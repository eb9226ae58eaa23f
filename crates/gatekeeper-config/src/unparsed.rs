//! The unparsed-config input shape and its interpretation.
//!
//! Config-file parsing is an external concern; what arrives here is an
//! ordered list of dict-like records per stanza kind, each tagged with
//! the source context it came from. Interpretation turns those records
//! into typed definitions, attributing malformed records to their source
//! instead of failing the load.

use std::collections::BTreeSet;

use serde_json::Value;

use gatekeeper_core::change::MergeMode;
use gatekeeper_core::job::{
    JobDef, JobDependency, NodeSetSpec, Playbook, SourceContext,
};
use gatekeeper_core::matcher::{BranchMatcher, BranchPattern, FileMatcher};
use gatekeeper_core::node::{Group, Node, NodeSet};
use gatekeeper_core::semaphore::{JobSemaphore, Semaphore};

use crate::error::{ConfigError, ConfigResult};

/// The stanza kinds a tenant's configuration is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Job,
    Project,
    ProjectTemplate,
    Pipeline,
    NodeSet,
    Secret,
    Semaphore,
    Queue,
    Pragma,
}

/// One raw record plus its origin.
#[derive(Debug, Clone)]
pub struct UnparsedStanza {
    pub kind: StanzaKind,
    pub context: SourceContext,
    pub data: Value,
}

/// A tenant's full unparsed configuration, in load order.
#[derive(Debug, Clone, Default)]
pub struct UnparsedConfig {
    pub stanzas: Vec<UnparsedStanza>,
}

impl UnparsedConfig {
    pub fn add(&mut self, kind: StanzaKind, context: SourceContext, data: Value) {
        self.stanzas.push(UnparsedStanza {
            kind,
            context,
            data,
        });
    }
}

/// Parser state toggled by pragma stanzas, scoped to one source path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pragma {
    pub implied_branch_matchers: Option<bool>,
}

pub fn parse_pragma(data: &Value) -> ConfigResult<Pragma> {
    Ok(Pragma {
        implied_branch_matchers: bool_field(data, "implied-branch-matchers")?,
    })
}

/// Interpret one job stanza (or inline project-pipeline variant) into a
/// job definition. In-repo (untrusted) definitions without an explicit
/// `branches` list get an implied matcher on the branch they live on,
/// unless a pragma disabled that.
pub fn parse_job(
    context: &SourceContext,
    data: &Value,
    pragma: Pragma,
) -> ConfigResult<JobDef> {
    let name = require_str(data, "name")?;
    parse_job_body(name, context, data, pragma)
}

/// Interpret a job-list entry: either a bare name or a one-key map of
/// name to variant attributes.
pub fn parse_job_list_entry(
    context: &SourceContext,
    entry: &Value,
    pragma: Pragma,
) -> ConfigResult<JobDef> {
    match entry {
        Value::String(name) => parse_job_body(name.clone(), context, &Value::Null, pragma),
        Value::Object(map) => {
            let mut entries = map.iter();
            match (entries.next(), entries.next()) {
                (Some((name, attrs)), None) => parse_job_body(name.clone(), context, attrs, pragma),
                _ => Err(ConfigError::InvalidValue {
                    field: "jobs".to_string(),
                    message: "expected a single-key map".to_string(),
                }),
            }
        }
        _ => Err(ConfigError::InvalidValue {
            field: "jobs".to_string(),
            message: "expected a job name or a single-key map".to_string(),
        }),
    }
}

fn parse_job_body(
    name: String,
    context: &SourceContext,
    data: &Value,
    pragma: Pragma,
) -> ConfigResult<JobDef> {
    let mut job = JobDef::new(name, context.clone());
    job.description = str_field(data, "description")?;
    job.voting = bool_field(data, "voting")?;
    job.tags = str_list_field(data, "tags")?.map(|v| v.into_iter().collect::<BTreeSet<_>>());
    job.provides = str_list_field(data, "provides")?;
    job.requires = str_list_field(data, "requires")?;
    job.dependencies = parse_dependencies(data)?;
    job.variables = data.get("vars").cloned();
    job.branch_matcher = match str_list_field(data, "branches")? {
        Some(patterns) => {
            let patterns = patterns
                .into_iter()
                .map(BranchPattern::explicit)
                .collect::<gatekeeper_core::Result<Vec<_>>>()?;
            Some(BranchMatcher::new(patterns))
        }
        None => {
            let implied = pragma.implied_branch_matchers.unwrap_or(!context.trusted);
            implied.then(|| {
                BranchMatcher::new(vec![BranchPattern::implied(context.branch.clone())])
            })
        }
    };
    job.file_matcher = str_list_field(data, "files")?
        .map(FileMatcher::new)
        .transpose()?;
    job.irrelevant_file_matcher = str_list_field(data, "irrelevant-files")?
        .map(FileMatcher::new)
        .transpose()?;
    job.match_on_config_updates = bool_field(data, "match-on-config-updates")?;
    job.parent = str_field(data, "parent")?;
    job.nodeset = parse_job_nodeset(context, data)?;
    job.run = playbook_list_field(context, data, "run")?;
    job.pre_run = playbook_list_field(context, data, "pre-run")?;
    job.post_run = playbook_list_field(context, data, "post-run")?;
    job.cleanup_run = playbook_list_field(context, data, "cleanup-run")?;
    job.timeout = u64_field(data, "timeout")?;
    job.attempts = u64_field(data, "attempts")?.map(|v| v as u32);
    job.semaphore = parse_job_semaphore(data)?;
    job.allowed_projects =
        str_list_field(data, "allowed-projects")?.map(|v| v.into_iter().collect());
    job.post_review = bool_field(data, "post-review")?;
    job.hold_following_changes = bool_field(data, "hold-following-changes")?;
    job.override_checkout = str_field(data, "override-checkout")?;
    job.is_final = bool_field(data, "final")?;
    job.is_abstract = bool_field(data, "abstract")?;
    job.intermediate = bool_field(data, "intermediate")?;
    job.protected = bool_field(data, "protected")?;
    Ok(job)
}

fn parse_dependencies(data: &Value) -> ConfigResult<Option<Vec<JobDependency>>> {
    let Some(raw) = data.get("dependencies") else {
        return Ok(None);
    };
    let entries = match raw {
        Value::String(name) => vec![JobDependency::hard(name.clone())],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(JobDependency::hard(name.clone())),
                Value::Object(_) => {
                    let name = require_str(item, "name")?;
                    Ok(JobDependency {
                        name,
                        soft: bool_field(item, "soft")?.unwrap_or(false),
                    })
                }
                _ => Err(ConfigError::InvalidValue {
                    field: "dependencies".to_string(),
                    message: "expected a job name or a map".to_string(),
                }),
            })
            .collect::<ConfigResult<Vec<_>>>()?,
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "dependencies".to_string(),
                message: "expected a name or list".to_string(),
            });
        }
    };
    Ok(Some(entries))
}

fn parse_job_nodeset(context: &SourceContext, data: &Value) -> ConfigResult<Option<NodeSetSpec>> {
    match data.get("nodeset") {
        None => Ok(None),
        Some(Value::String(name)) => Ok(Some(NodeSetSpec::Name(name.clone()))),
        Some(inline @ Value::Object(_)) => {
            Ok(Some(NodeSetSpec::Nodes(parse_nodeset_body(inline, "")?)))
        }
        Some(_) => Err(ConfigError::InvalidValue {
            field: "nodeset".to_string(),
            message: format!("invalid nodeset in job from {}", context.path),
        }),
    }
}

fn parse_job_semaphore(data: &Value) -> ConfigResult<Option<JobSemaphore>> {
    match data.get("semaphore") {
        None => Ok(None),
        Some(Value::String(name)) => Ok(Some(JobSemaphore {
            name: name.clone(),
            resources_first: false,
        })),
        Some(obj @ Value::Object(_)) => Ok(Some(JobSemaphore {
            name: require_str(obj, "name")?,
            resources_first: bool_field(obj, "resources-first")?.unwrap_or(false),
        })),
        Some(_) => Err(ConfigError::InvalidValue {
            field: "semaphore".to_string(),
            message: "expected a name or a map".to_string(),
        }),
    }
}

/// Interpret a nodeset stanza.
pub fn parse_nodeset(data: &Value) -> ConfigResult<NodeSet> {
    let name = require_str(data, "name")?;
    parse_nodeset_body(data, &name)
}

fn parse_nodeset_body(data: &Value, name: &str) -> ConfigResult<NodeSet> {
    let mut nodeset = NodeSet::new(name);
    if let Some(nodes) = data.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            nodeset.add_node(Node {
                name: require_str(node, "name")?,
                label: require_str(node, "label")?,
            })?;
        }
    }
    if let Some(groups) = data.get("groups").and_then(Value::as_array) {
        for group in groups {
            nodeset.add_group(Group {
                name: require_str(group, "name")?,
                nodes: str_list_field(group, "nodes")?.unwrap_or_default(),
            })?;
        }
    }
    Ok(nodeset)
}

/// Interpret a semaphore stanza; `max` defaults to 1.
pub fn parse_semaphore(data: &Value) -> ConfigResult<Semaphore> {
    let name = require_str(data, "name")?;
    let max = u64_field(data, "max")?.unwrap_or(1) as u32;
    Ok(Semaphore::new(name, max))
}

/// A secret definition. The data blob is opaque to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    pub name: String,
    pub source_context: SourceContext,
    pub data: Value,
}

pub fn parse_secret(context: &SourceContext, data: &Value) -> ConfigResult<Secret> {
    Ok(Secret {
        name: require_str(data, "name")?,
        source_context: context.clone(),
        data: data.get("data").cloned().unwrap_or(Value::Null),
    })
}

/// A named queue definition shared by projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDef {
    pub name: String,
    /// Split the queue per target branch rather than sharing one run.
    pub per_branch: bool,
    pub allow_circular_dependencies: bool,
}

pub fn parse_queue(data: &Value) -> ConfigResult<QueueDef> {
    Ok(QueueDef {
        name: require_str(data, "name")?,
        per_branch: bool_field(data, "per-branch")?.unwrap_or(false),
        allow_circular_dependencies: bool_field(data, "allow-circular-dependencies")?
            .unwrap_or(false),
    })
}

/// Pipeline manager flavor: independent pipelines test each item alone,
/// dependent pipelines serialize items that share a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Independent,
    Dependent,
}

/// Pipeline precedence; maps to node-request priority, lower number wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    Low,
    #[default]
    Normal,
    High,
}

impl Precedence {
    pub fn priority(self) -> u32 {
        match self {
            Precedence::High => 100,
            Precedence::Normal => 200,
            Precedence::Low => 300,
        }
    }
}

/// AIMD window adjustment flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Linear,
    Exponential,
}

/// Admission-window settings for a pipeline's queues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// 0 means unbounded.
    pub window: u32,
    pub floor: u32,
    pub increase_mode: WindowMode,
    pub increase_factor: u32,
    pub decrease_mode: WindowMode,
    pub decrease_factor: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: 20,
            floor: 3,
            increase_mode: WindowMode::Linear,
            increase_factor: 1,
            decrease_mode: WindowMode::Exponential,
            decrease_factor: 2,
        }
    }
}

/// A pipeline definition.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDef {
    pub name: String,
    pub manager: ManagerKind,
    pub precedence: Precedence,
    /// Whether the pipeline runs after review approval; post-review jobs
    /// are confined to such pipelines.
    pub post_review: bool,
    /// Consecutive reporting failures before the pipeline self-disables.
    pub disable_after_consecutive_failures: Option<u32>,
    pub window: WindowConfig,
}

pub fn parse_pipeline(data: &Value) -> ConfigResult<PipelineDef> {
    let name = require_str(data, "name")?;
    let manager = match require_str(data, "manager")?.as_str() {
        "independent" => ManagerKind::Independent,
        "dependent" => ManagerKind::Dependent,
        other => {
            return Err(ConfigError::InvalidValue {
                field: "manager".to_string(),
                message: format!("unknown manager: {other}"),
            });
        }
    };
    let precedence = match str_field(data, "precedence")?.as_deref() {
        None | Some("normal") => Precedence::Normal,
        Some("low") => Precedence::Low,
        Some("high") => Precedence::High,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "precedence".to_string(),
                message: format!("unknown precedence: {other}"),
            });
        }
    };
    let mut window = WindowConfig::default();
    if manager == ManagerKind::Independent {
        // Independent pipelines never hold items back.
        window.window = 0;
    }
    if let Some(v) = u64_field(data, "window")? {
        window.window = v as u32;
    }
    if let Some(v) = u64_field(data, "window-floor")? {
        window.floor = (v as u32).max(1);
    }
    if let Some(mode) = str_field(data, "window-increase-type")? {
        window.increase_mode = parse_window_mode("window-increase-type", &mode)?;
    }
    if let Some(v) = u64_field(data, "window-increase-factor")? {
        window.increase_factor = v as u32;
    }
    if let Some(mode) = str_field(data, "window-decrease-type")? {
        window.decrease_mode = parse_window_mode("window-decrease-type", &mode)?;
    }
    if let Some(v) = u64_field(data, "window-decrease-factor")? {
        window.decrease_factor = v as u32;
    }
    Ok(PipelineDef {
        name,
        manager,
        precedence,
        post_review: bool_field(data, "post-review")?.unwrap_or(false),
        disable_after_consecutive_failures: u64_field(data, "disable-after-consecutive-failures")?
            .map(|v| v as u32),
        window,
    })
}

fn parse_window_mode(field: &str, mode: &str) -> ConfigResult<WindowMode> {
    match mode {
        "linear" => Ok(WindowMode::Linear),
        "exponential" => Ok(WindowMode::Exponential),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("unknown window mode: {other}"),
        }),
    }
}

/// Jobs a project runs in one pipeline, plus queue assignment.
#[derive(Debug, Clone, Default)]
pub struct ProjectPipelineConfig {
    /// Ordered job list; each entry is the project-pipeline-local variant
    /// list for one job name.
    pub job_list: Vec<(String, Vec<JobDef>)>,
    pub queue_name: Option<String>,
    pub debug: bool,
}

impl ProjectPipelineConfig {
    /// Append a variant, merging repeated mentions of one job name.
    pub fn add_variant(&mut self, variant: JobDef) {
        if let Some((_, variants)) = self.job_list.iter_mut().find(|(n, _)| *n == variant.name) {
            variants.push(variant);
        } else {
            self.job_list.push((variant.name.clone(), vec![variant]));
        }
    }
}

/// A project's resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub name: String,
    pub merge_mode: MergeMode,
    pub variables: Value,
    pub default_branch: Option<String>,
    pub templates: Vec<String>,
    pub pipelines: std::collections::HashMap<String, ProjectPipelineConfig>,
}

/// Keys of a project stanza that are not pipeline sections.
const PROJECT_KEYS: &[&str] = &[
    "name",
    "description",
    "merge-mode",
    "vars",
    "default-branch",
    "templates",
    "queue",
];

/// Interpret a project (or project-template) stanza. Any key that is not
/// a known project attribute and holds a map is a pipeline section.
pub fn parse_project(
    context: &SourceContext,
    data: &Value,
    pragma: Pragma,
) -> ConfigResult<ProjectConfig> {
    // In-repo project stanzas may omit the name; it is the repo itself.
    let name = str_field(data, "name")?.unwrap_or_else(|| context.project.clone());
    let merge_mode = match str_field(data, "merge-mode")?.as_deref() {
        None | Some("merge") => MergeMode::Merge,
        Some("merge-resolve") => MergeMode::MergeResolve,
        Some("cherry-pick") => MergeMode::CherryPick,
        Some("squash-merge") => MergeMode::SquashMerge,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "merge-mode".to_string(),
                message: format!("unknown merge mode: {other}"),
            });
        }
    };
    let default_queue = str_field(data, "queue")?;
    let mut project = ProjectConfig {
        name,
        merge_mode,
        variables: data
            .get("vars")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        default_branch: str_field(data, "default-branch")?,
        templates: str_list_field(data, "templates")?.unwrap_or_default(),
        pipelines: Default::default(),
    };
    let Some(map) = data.as_object() else {
        return Err(ConfigError::InvalidValue {
            field: "project".to_string(),
            message: "expected a map".to_string(),
        });
    };
    for (key, value) in map {
        if PROJECT_KEYS.contains(&key.as_str()) || !value.is_object() {
            continue;
        }
        let mut ppc = ProjectPipelineConfig {
            queue_name: str_field(value, "queue")?.or_else(|| default_queue.clone()),
            debug: bool_field(value, "debug")?.unwrap_or(false),
            ..Default::default()
        };
        if let Some(jobs) = value.get("jobs").and_then(Value::as_array) {
            for entry in jobs {
                ppc.add_variant(parse_job_list_entry(context, entry, pragma)?);
            }
        }
        project.pipelines.insert(key.clone(), ppc);
    }
    Ok(project)
}

// Value extraction helpers.

fn require_str(data: &Value, key: &str) -> ConfigResult<String> {
    str_field(data, key)?.ok_or_else(|| ConfigError::MissingField(key.to_string()))
}

fn str_field(data: &Value, key: &str) -> ConfigResult<Option<String>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected a string".to_string(),
        }),
    }
}

fn bool_field(data: &Value, key: &str) -> ConfigResult<Option<bool>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected a boolean".to_string(),
        }),
    }
}

fn u64_field(data: &Value, key: &str) -> ConfigResult<Option<u64>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected a non-negative integer".to_string(),
        }),
        Some(_) => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected an integer".to_string(),
        }),
    }
}

/// A string field or list-of-strings field; scalars promote to a
/// one-element list.
fn str_list_field(data: &Value, key: &str) -> ConfigResult<Option<Vec<String>>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| ConfigError::InvalidValue {
                    field: key.to_string(),
                    message: "expected a list of strings".to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected a string or list of strings".to_string(),
        }),
    }
}

fn playbook_list_field(
    context: &SourceContext,
    data: &Value,
    key: &str,
) -> ConfigResult<Option<Vec<Playbook>>> {
    Ok(str_list_field(data, key)?.map(|paths| {
        paths
            .into_iter()
            .map(|path| Playbook {
                path,
                source_context: context.clone(),
            })
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> SourceContext {
        SourceContext {
            project: "demo".to_string(),
            branch: "main".to_string(),
            path: "ci/config.yaml".to_string(),
            trusted: false,
        }
    }

    #[test]
    fn test_parse_job_stanza() {
        let data = json!({
            "name": "unit",
            "parent": "base",
            "voting": true,
            "timeout": 1800,
            "run": ["playbooks/unit.yaml"],
            "dependencies": ["compile", {"name": "lint", "soft": true}],
            "semaphore": {"name": "ci-slots", "resources-first": true},
            "nodeset": "small",
        });
        let job = parse_job(&context(), &data, Pragma::default()).unwrap();
        assert_eq!(job.name, "unit");
        assert_eq!(job.parent.as_deref(), Some("base"));
        assert_eq!(job.timeout, Some(1800));
        let deps = job.dependencies.unwrap();
        assert_eq!(deps.len(), 2);
        assert!(!deps[0].soft);
        assert!(deps[1].soft);
        assert!(job.semaphore.unwrap().resources_first);
        assert_eq!(job.nodeset, Some(NodeSetSpec::Name("small".to_string())));
        // In-repo definitions get an implied branch matcher.
        let matcher = job.branch_matcher.unwrap();
        assert_eq!(matcher.patterns[0].pattern, "main");
        assert!(matcher.patterns[0].implied);
    }

    #[test]
    fn test_trusted_job_has_no_implied_matcher() {
        let trusted = SourceContext {
            trusted: true,
            ..context()
        };
        let job = parse_job(&trusted, &json!({"name": "base"}), Pragma::default()).unwrap();
        assert!(job.branch_matcher.is_none());
    }

    #[test]
    fn test_pragma_disables_implied_matcher() {
        let pragma = Pragma {
            implied_branch_matchers: Some(false),
        };
        let job = parse_job(&context(), &json!({"name": "unit"}), pragma).unwrap();
        assert!(job.branch_matcher.is_none());
    }

    #[test]
    fn test_parse_project_with_pipelines() {
        let data = json!({
            "name": "demo",
            "merge-mode": "cherry-pick",
            "queue": "integrated",
            "vars": {"region": "us-1"},
            "check": {
                "jobs": ["unit", {"integration": {"voting": false}}],
            },
            "gate": {
                "queue": "critical",
                "jobs": ["unit"],
            },
        });
        let project = parse_project(&context(), &data, Pragma::default()).unwrap();
        assert_eq!(project.merge_mode, MergeMode::CherryPick);
        let check = &project.pipelines["check"];
        assert_eq!(check.queue_name.as_deref(), Some("integrated"));
        assert_eq!(check.job_list.len(), 2);
        assert_eq!(check.job_list[1].1[0].voting, Some(false));
        assert_eq!(
            project.pipelines["gate"].queue_name.as_deref(),
            Some("critical")
        );
    }

    #[test]
    fn test_parse_pipeline_window_settings() {
        let data = json!({
            "name": "gate",
            "manager": "dependent",
            "precedence": "high",
            "post-review": true,
            "disable-after-consecutive-failures": 5,
            "window": 10,
            "window-floor": 2,
            "window-increase-type": "linear",
            "window-increase-factor": 2,
            "window-decrease-type": "exponential",
            "window-decrease-factor": 2,
        });
        let def = parse_pipeline(&data).unwrap();
        assert_eq!(def.manager, ManagerKind::Dependent);
        assert_eq!(def.precedence.priority(), 100);
        assert!(def.post_review);
        assert_eq!(def.disable_after_consecutive_failures, Some(5));
        assert_eq!(def.window.window, 10);
        assert_eq!(def.window.floor, 2);
    }

    #[test]
    fn test_independent_pipeline_defaults_to_unbounded_window() {
        let def = parse_pipeline(&json!({"name": "check", "manager": "independent"})).unwrap();
        assert_eq!(def.window.window, 0);
    }

    #[test]
    fn test_malformed_stanzas_are_errors() {
        assert!(parse_job(&context(), &json!({}), Pragma::default()).is_err());
        assert!(parse_pipeline(&json!({"name": "p", "manager": "serial"})).is_err());
        assert!(parse_semaphore(&json!({"max": 2})).is_err());
    }
}
