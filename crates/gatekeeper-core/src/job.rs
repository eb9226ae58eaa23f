//! Job definitions, variants, and frozen jobs.
//!
//! A [`JobDef`] is one configured definition of a job: every field is
//! optional, meaning "this variant does not touch that attribute". A
//! frozen [`Job`] is the fold of all variants that matched a change, in
//! collection order (ancestors first). [`Job::apply_variant`] is the only
//! way attributes flow from a definition into a frozen job, and it is
//! where the final/protected policy is enforced.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::matcher::{BranchMatcher, FileMatcher};
use crate::node::NodeSet;
use crate::semaphore::JobSemaphore;

/// Where a definition came from, for error attribution and trust-level
/// decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceContext {
    pub project: String,
    pub branch: String,
    pub path: String,
    /// Definitions from config projects may use trusted execution
    /// contexts; in-repo definitions may not.
    pub trusted: bool,
}

/// A dependency edge to another job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDependency {
    pub name: String,
    /// Soft dependencies wait for the named job only if it runs; a
    /// skipped soft dependency does not block or skip the dependent.
    pub soft: bool,
}

impl JobDependency {
    pub fn hard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soft: false,
        }
    }

    pub fn soft(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soft: true,
        }
    }
}

/// A playbook reference, kept with the context it was defined in so the
/// executor checks out the right repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playbook {
    pub path: String,
    pub source_context: SourceContext,
}

/// A job's nodeset as configured: inline, or a reference resolved against
/// the layout's nodeset table before freezing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NodeSetSpec {
    Name(String),
    Nodes(NodeSet),
}

/// Every job attribute, used as data by the override policy below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAttribute {
    Description,
    Voting,
    Tags,
    Provides,
    Requires,
    Dependencies,
    Variables,
    BranchMatcher,
    FileMatcher,
    IrrelevantFileMatcher,
    MatchOnConfigUpdates,
    Parent,
    Nodeset,
    Run,
    PreRun,
    PostRun,
    CleanupRun,
    Timeout,
    Attempts,
    Semaphore,
    AllowedProjects,
    PostReview,
    HoldFollowingChanges,
    OverrideCheckout,
    Final,
    Abstract,
    Intermediate,
    Protected,
}

/// The three attribute groups of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Overridable even on final jobs.
    Context,
    /// Locked once a job is final.
    Execution,
    /// Internal bookkeeping, set by the layout rather than variants.
    Other,
}

impl JobAttribute {
    pub fn kind(self) -> AttributeKind {
        use JobAttribute::*;
        match self {
            Description | Voting | Tags | Provides | Requires | Dependencies | Variables
            | BranchMatcher | FileMatcher | IrrelevantFileMatcher | MatchOnConfigUpdates => {
                AttributeKind::Context
            }
            Parent | Nodeset | Run | PreRun | PostRun | CleanupRun | Timeout | Attempts
            | Semaphore | AllowedProjects | PostReview | HoldFollowingChanges
            | OverrideCheckout | Final | Abstract | Intermediate | Protected => {
                AttributeKind::Execution
            }
        }
    }

    /// Whether a variant may set this attribute on a job marked final.
    /// The four flags are exempt so a final job can still be re-declared.
    pub fn overridable_on_final(self) -> bool {
        use JobAttribute::*;
        match self.kind() {
            AttributeKind::Context | AttributeKind::Other => true,
            AttributeKind::Execution => {
                matches!(self, Final | Abstract | Intermediate | Protected)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        use JobAttribute::*;
        match self {
            Description => "description",
            Voting => "voting",
            Tags => "tags",
            Provides => "provides",
            Requires => "requires",
            Dependencies => "dependencies",
            Variables => "variables",
            BranchMatcher => "branches",
            FileMatcher => "files",
            IrrelevantFileMatcher => "irrelevant-files",
            MatchOnConfigUpdates => "match-on-config-updates",
            Parent => "parent",
            Nodeset => "nodeset",
            Run => "run",
            PreRun => "pre-run",
            PostRun => "post-run",
            CleanupRun => "cleanup-run",
            Timeout => "timeout",
            Attempts => "attempts",
            Semaphore => "semaphore",
            AllowedProjects => "allowed-projects",
            PostReview => "post-review",
            HoldFollowingChanges => "hold-following-changes",
            OverrideCheckout => "override-checkout",
            Final => "final",
            Abstract => "abstract",
            Intermediate => "intermediate",
            Protected => "protected",
        }
    }
}

/// One configured definition (variant) of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobDef {
    pub name: String,
    pub source_context: SourceContext,
    pub description: Option<String>,
    pub voting: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    pub provides: Option<Vec<String>>,
    pub requires: Option<Vec<String>>,
    pub dependencies: Option<Vec<JobDependency>>,
    pub variables: Option<Value>,
    pub branch_matcher: Option<BranchMatcher>,
    pub file_matcher: Option<FileMatcher>,
    pub irrelevant_file_matcher: Option<FileMatcher>,
    pub match_on_config_updates: Option<bool>,
    pub parent: Option<String>,
    pub nodeset: Option<NodeSetSpec>,
    pub run: Option<Vec<Playbook>>,
    pub pre_run: Option<Vec<Playbook>>,
    pub post_run: Option<Vec<Playbook>>,
    pub cleanup_run: Option<Vec<Playbook>>,
    pub timeout: Option<u64>,
    pub attempts: Option<u32>,
    pub semaphore: Option<JobSemaphore>,
    pub allowed_projects: Option<BTreeSet<String>>,
    pub post_review: Option<bool>,
    pub hold_following_changes: Option<bool>,
    pub override_checkout: Option<String>,
    pub is_final: Option<bool>,
    pub is_abstract: Option<bool>,
    pub intermediate: Option<bool>,
    pub protected: Option<bool>,
}

impl JobDef {
    pub fn new(name: impl Into<String>, source_context: SourceContext) -> Self {
        Self {
            name: name.into(),
            source_context,
            ..Default::default()
        }
    }

    /// Execution attributes this variant would set, in declaration order.
    /// Consulted before applying a variant to a final job.
    pub fn execution_attributes_set(&self) -> Vec<JobAttribute> {
        let mut set = Vec::new();
        let mut check = |present: bool, attr: JobAttribute| {
            if present {
                set.push(attr);
            }
        };
        check(self.parent.is_some(), JobAttribute::Parent);
        check(self.nodeset.is_some(), JobAttribute::Nodeset);
        check(self.run.is_some(), JobAttribute::Run);
        check(self.pre_run.is_some(), JobAttribute::PreRun);
        check(self.post_run.is_some(), JobAttribute::PostRun);
        check(self.cleanup_run.is_some(), JobAttribute::CleanupRun);
        check(self.timeout.is_some(), JobAttribute::Timeout);
        check(self.attempts.is_some(), JobAttribute::Attempts);
        check(self.semaphore.is_some(), JobAttribute::Semaphore);
        check(self.allowed_projects.is_some(), JobAttribute::AllowedProjects);
        check(self.post_review.is_some(), JobAttribute::PostReview);
        check(
            self.hold_following_changes.is_some(),
            JobAttribute::HoldFollowingChanges,
        );
        check(self.override_checkout.is_some(), JobAttribute::OverrideCheckout);
        set
    }

    /// Whether this variant's branch matcher accepts the change.
    /// Variants without a branch matcher match everything.
    pub fn matches_branch(
        &self,
        change: &crate::change::Change,
        override_checkout: Option<&str>,
    ) -> bool {
        match &self.branch_matcher {
            Some(m) => m.matches(change, override_checkout),
            None => true,
        }
    }
}

/// A frozen job: concrete attribute values for one change, immutable once
/// the fold is complete and the job is added to a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub name: String,
    /// Context of the base definition.
    pub source_context: SourceContext,
    pub description: Option<String>,
    pub voting: bool,
    pub tags: BTreeSet<String>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
    pub dependencies: Vec<JobDependency>,
    /// Deep-merged job variables (a JSON object).
    pub variables: Value,
    pub branch_matcher: Option<BranchMatcher>,
    pub file_matcher: Option<FileMatcher>,
    pub irrelevant_file_matcher: Option<FileMatcher>,
    pub match_on_config_updates: bool,
    pub parent: Option<String>,
    pub nodeset: NodeSet,
    pub run: Vec<Playbook>,
    pub pre_run: Vec<Playbook>,
    pub post_run: Vec<Playbook>,
    pub cleanup_run: Vec<Playbook>,
    pub timeout: Option<u64>,
    pub attempts: u32,
    pub semaphore: Option<JobSemaphore>,
    pub allowed_projects: Option<BTreeSet<String>>,
    pub post_review: bool,
    pub hold_following_changes: bool,
    pub override_checkout: Option<String>,
    pub is_final: bool,
    pub is_abstract: bool,
    pub intermediate: bool,
    /// Project that declared the job protected, when set.
    pub protected_origin: Option<String>,
}

impl Job {
    /// An empty frozen job; callers fold variants onto it with
    /// [`Job::apply_variant`], base definition first.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_context: SourceContext::default(),
            description: None,
            voting: true,
            tags: BTreeSet::new(),
            provides: Vec::new(),
            requires: Vec::new(),
            dependencies: Vec::new(),
            variables: Value::Object(Default::default()),
            branch_matcher: None,
            file_matcher: None,
            irrelevant_file_matcher: None,
            match_on_config_updates: true,
            parent: None,
            nodeset: NodeSet::default(),
            run: Vec::new(),
            pre_run: Vec::new(),
            post_run: Vec::new(),
            cleanup_run: Vec::new(),
            timeout: None,
            attempts: 3,
            semaphore: None,
            allowed_projects: None,
            post_review: false,
            hold_following_changes: false,
            override_checkout: None,
            is_final: false,
            is_abstract: false,
            intermediate: false,
            protected_origin: None,
        }
    }

    /// Merge one variant onto this job. The policy checks run before any
    /// mutation, so a rejected variant leaves the job unchanged.
    pub fn apply_variant(&mut self, variant: &JobDef) -> Result<()> {
        if self.is_final {
            if let Some(attr) = variant
                .execution_attributes_set()
                .into_iter()
                .find(|a| !a.overridable_on_final())
            {
                return Err(Error::FinalJobOverride {
                    job: self.name.clone(),
                    attribute: attr.as_str().to_string(),
                });
            }
        }
        if let Some(origin) = &self.protected_origin {
            if variant.source_context.project != *origin {
                return Err(Error::ProtectedJobOverride {
                    job: self.name.clone(),
                    project: variant.source_context.project.clone(),
                });
            }
        }

        if self.source_context == SourceContext::default() {
            self.source_context = variant.source_context.clone();
        }
        if let Some(v) = &variant.description {
            self.description = Some(v.clone());
        }
        if let Some(v) = variant.voting {
            self.voting = v;
        }
        if let Some(v) = &variant.tags {
            // Tags accumulate across the inheritance path.
            self.tags.extend(v.iter().cloned());
        }
        if let Some(v) = &variant.provides {
            self.provides.extend(v.iter().cloned());
        }
        if let Some(v) = &variant.requires {
            self.requires.extend(v.iter().cloned());
        }
        if let Some(v) = &variant.dependencies {
            self.dependencies = v.clone();
        }
        if let Some(v) = &variant.variables {
            merge_variables(&mut self.variables, v);
        }
        if let Some(v) = &variant.branch_matcher {
            self.branch_matcher = Some(v.clone());
        }
        if let Some(v) = &variant.file_matcher {
            self.file_matcher = Some(v.clone());
        }
        if let Some(v) = &variant.irrelevant_file_matcher {
            self.irrelevant_file_matcher = Some(v.clone());
        }
        if let Some(v) = variant.match_on_config_updates {
            self.match_on_config_updates = v;
        }
        if let Some(v) = &variant.parent {
            self.parent = Some(v.clone());
        }
        if let Some(v) = &variant.nodeset {
            match v {
                NodeSetSpec::Nodes(ns) => self.nodeset = ns.clone(),
                NodeSetSpec::Name(name) => {
                    return Err(Error::InvalidPattern {
                        pattern: name.clone(),
                        message: "unresolved nodeset reference".to_string(),
                    });
                }
            }
        }
        if let Some(v) = &variant.run {
            self.run = v.clone();
        }
        if let Some(v) = &variant.pre_run {
            // Ancestor pre-runs execute first.
            self.pre_run.extend(v.iter().cloned());
        }
        if let Some(v) = &variant.post_run {
            // Descendant post-runs execute first.
            let mut combined = v.clone();
            combined.extend(self.post_run.iter().cloned());
            self.post_run = combined;
        }
        if let Some(v) = &variant.cleanup_run {
            let mut combined = v.clone();
            combined.extend(self.cleanup_run.iter().cloned());
            self.cleanup_run = combined;
        }
        if let Some(v) = variant.timeout {
            self.timeout = Some(v);
        }
        if let Some(v) = variant.attempts {
            self.attempts = v;
        }
        if let Some(v) = &variant.semaphore {
            self.semaphore = Some(v.clone());
        }
        if let Some(v) = &variant.allowed_projects {
            self.allowed_projects = Some(v.clone());
        }
        if let Some(v) = variant.post_review {
            self.post_review = v;
        }
        if let Some(v) = variant.hold_following_changes {
            self.hold_following_changes = v;
        }
        if let Some(v) = &variant.override_checkout {
            self.override_checkout = Some(v.clone());
        }
        if let Some(v) = variant.is_final {
            self.is_final = v;
        }
        if let Some(v) = variant.is_abstract {
            self.is_abstract = v;
        }
        if let Some(v) = variant.intermediate {
            self.intermediate = v;
        }
        if variant.protected == Some(true) && self.protected_origin.is_none() {
            self.protected_origin = Some(variant.source_context.project.clone());
        }
        Ok(())
    }

    /// Whether the job should run for the given changed-file set.
    pub fn matches_files(&self, files: &[String]) -> bool {
        if let Some(m) = &self.irrelevant_file_matcher {
            if m.matches_all_files(files) {
                return false;
            }
        }
        if let Some(m) = &self.file_matcher {
            return m.matches_files(files);
        }
        true
    }

    /// The serialized job minus matcher and description fields. Two
    /// changes produce the same digest exactly when neither redefines the
    /// job's behavior, which drives the match-on-config-updates bypass.
    pub fn config_digest(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("description");
            map.remove("branch_matcher");
            map.remove("file_matcher");
            map.remove("irrelevant_file_matcher");
        }
        value
    }
}

/// Deep-merge `overlay` into `base`: objects merge recursively, all other
/// values replace.
pub fn merge_variables(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_variables(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(project: &str) -> SourceContext {
        SourceContext {
            project: project.to_string(),
            branch: "main".to_string(),
            path: "ci/jobs.conf".to_string(),
            trusted: false,
        }
    }

    fn playbook(path: &str) -> Playbook {
        Playbook {
            path: path.to_string(),
            source_context: context("demo"),
        }
    }

    #[test]
    fn test_variant_fold_playbook_order() {
        let mut base = JobDef::new("unit", context("base-jobs"));
        base.pre_run = Some(vec![playbook("pre-base")]);
        base.post_run = Some(vec![playbook("post-base")]);
        base.run = Some(vec![playbook("run-base")]);

        let mut child = JobDef::new("unit", context("demo"));
        child.pre_run = Some(vec![playbook("pre-child")]);
        child.post_run = Some(vec![playbook("post-child")]);
        child.run = Some(vec![playbook("run-child")]);

        let mut job = Job::new("unit");
        job.apply_variant(&base).unwrap();
        job.apply_variant(&child).unwrap();

        let paths = |pbs: &[Playbook]| pbs.iter().map(|p| p.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&job.pre_run), vec!["pre-base", "pre-child"]);
        assert_eq!(paths(&job.post_run), vec!["post-child", "post-base"]);
        // Run playbooks replace rather than accumulate.
        assert_eq!(paths(&job.run), vec!["run-child"]);
    }

    #[test]
    fn test_final_lock_rejects_execution_attributes() {
        let mut base = JobDef::new("deploy", context("base-jobs"));
        base.is_final = Some(true);
        base.timeout = Some(1800);

        let mut job = Job::new("deploy");
        job.apply_variant(&base).unwrap();

        let mut variant = JobDef::new("deploy", context("demo"));
        variant.timeout = Some(90);
        let err = job.apply_variant(&variant).unwrap_err();
        assert!(matches!(err, Error::FinalJobOverride { .. }));
        // Failed application leaves the job unchanged.
        assert_eq!(job.timeout, Some(1800));

        // Context attributes stay overridable on final jobs.
        let mut voting = JobDef::new("deploy", context("demo"));
        voting.voting = Some(false);
        job.apply_variant(&voting).unwrap();
        assert!(!job.voting);
    }

    #[test]
    fn test_protected_restricts_origin() {
        let mut base = JobDef::new("publish", context("base-jobs"));
        base.protected = Some(true);

        let mut job = Job::new("publish");
        job.apply_variant(&base).unwrap();
        assert_eq!(job.protected_origin.as_deref(), Some("base-jobs"));

        let mut foreign = JobDef::new("publish", context("other"));
        foreign.voting = Some(false);
        assert!(matches!(
            job.apply_variant(&foreign),
            Err(Error::ProtectedJobOverride { .. })
        ));

        let mut own = JobDef::new("publish", context("base-jobs"));
        own.voting = Some(false);
        job.apply_variant(&own).unwrap();
        assert!(!job.voting);
    }

    #[test]
    fn test_variables_deep_merge() {
        let mut base = JobDef::new("unit", context("base-jobs"));
        base.variables = Some(json!({"a": {"x": 1, "y": 2}, "b": 1}));
        let mut child = JobDef::new("unit", context("demo"));
        child.variables = Some(json!({"a": {"y": 3}, "c": 4}));

        let mut job = Job::new("unit");
        job.apply_variant(&base).unwrap();
        job.apply_variant(&child).unwrap();
        assert_eq!(job.variables, json!({"a": {"x": 1, "y": 3}, "b": 1, "c": 4}));
    }

    #[test]
    fn test_config_digest_ignores_matchers() {
        let mut a = Job::new("unit");
        let mut b = Job::new("unit");
        b.branch_matcher = Some(BranchMatcher::new(vec![
            crate::matcher::BranchPattern::implied("main"),
        ]));
        b.description = Some("described".to_string());
        assert_eq!(a.config_digest(), b.config_digest());

        a.timeout = Some(60);
        assert_ne!(a.config_digest(), b.config_digest());
    }
}
