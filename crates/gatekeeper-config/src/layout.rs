//! The per-tenant layout: a fully resolved, immutable configuration
//! snapshot, and the job-graph freezing algorithm that turns it into the
//! concrete set of jobs one change must run.

use std::collections::HashMap;

use tracing::debug;

use gatekeeper_core::change::Change;
use gatekeeper_core::graph::JobGraph;
use gatekeeper_core::job::{Job, JobDef, NodeSetSpec};
use gatekeeper_core::job::merge_variables;
use gatekeeper_core::node::NodeSet;
use gatekeeper_core::semaphore::Semaphore;
use gatekeeper_core::ModelId;

use crate::error::{configuration_error, ConfigError, ConfigResult, LoadingErrors};
use crate::unparsed::{
    parse_job, parse_nodeset, parse_pipeline, parse_pragma, parse_project, parse_queue,
    parse_secret, parse_semaphore, PipelineDef, Pragma, ProjectConfig, QueueDef, Secret,
    StanzaKind, UnparsedConfig,
};

/// Pipeline-side inputs to job-graph freezing.
#[derive(Debug, Clone, Copy)]
pub struct FreezeContext<'a> {
    pub pipeline: &'a str,
    /// Whether the enclosing pipeline runs after review approval.
    pub post_review: bool,
    /// Bypass file matchers entirely (used when re-freezing under the
    /// item-ahead's layout for config-update detection).
    pub skip_file_matcher: bool,
}

/// Answers "does this change redefine the frozen job's configuration,
/// relative to the item ahead of it". Implemented by the queue item; the
/// layout only consults it to decide the file-matcher bypass.
pub trait JobConfigUpdateProbe {
    fn updates_job_config(&self, job: &Job) -> bool;
}

/// A probe that never reports an update; used where no item-ahead
/// comparison is possible or wanted.
pub struct NoConfigUpdates;

impl JobConfigUpdateProbe for NoConfigUpdates {
    fn updates_job_config(&self, _job: &Job) -> bool {
        false
    }
}

/// The resolved, immutable configuration of one tenant. Built wholesale
/// by [`LayoutBuilder`]; reconfiguration produces a new layout with a new
/// uuid rather than mutating this one.
#[derive(Debug)]
pub struct Layout {
    pub uuid: ModelId,
    pub tenant: String,
    jobs: HashMap<String, Vec<JobDef>>,
    nodesets: HashMap<String, NodeSet>,
    secrets: HashMap<String, Secret>,
    semaphores: HashMap<String, Semaphore>,
    queues: HashMap<String, QueueDef>,
    pipelines: HashMap<String, PipelineDef>,
    projects: HashMap<String, ProjectConfig>,
    templates: HashMap<String, ProjectConfig>,
    pub loading_errors: LoadingErrors,
}

impl Layout {
    pub fn builder(tenant: impl Into<String>) -> LayoutBuilder {
        LayoutBuilder::new(tenant)
    }

    /// All variants of a job, base definition first.
    pub fn job_variants(&self, name: &str) -> Option<&[JobDef]> {
        self.jobs.get(name).map(Vec::as_slice)
    }

    pub fn nodeset(&self, name: &str) -> Option<&NodeSet> {
        self.nodesets.get(name)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.get(name)
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDef> {
        self.pipelines.get(name)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineDef> {
        self.pipelines.values()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDef> {
        self.queues.get(name)
    }

    /// Maximum concurrent holders for a semaphore name; undeclared
    /// semaphores default to 1.
    pub fn semaphore_max(&self, name: &str) -> u32 {
        self.semaphores.get(name).map(|s| s.max).unwrap_or(1)
    }

    /// Freeze the job graph for one change in one project's pipeline.
    /// Pure over the layout: nothing here mutates configuration state.
    /// Violations surface as errors for the caller to attach to its
    /// build set; a change with no matching configuration yields an
    /// empty graph.
    pub fn create_job_graph(
        &self,
        change: &Change,
        project_name: &str,
        ctx: FreezeContext<'_>,
        probe: &dyn JobConfigUpdateProbe,
    ) -> ConfigResult<JobGraph> {
        let mut graph = JobGraph::new();
        let Some(project) = self.projects.get(project_name) else {
            return Ok(graph);
        };

        // Template job lists come first, then the project's own stanza.
        let mut entries: Vec<&(String, Vec<JobDef>)> = Vec::new();
        for template_name in &project.templates {
            let Some(template) = self.templates.get(template_name) else {
                return Err(ConfigError::UnknownReference {
                    kind: "project-template",
                    name: template_name.clone(),
                });
            };
            if let Some(ppc) = template.pipelines.get(ctx.pipeline) {
                entries.extend(ppc.job_list.iter());
            }
        }
        if let Some(ppc) = project.pipelines.get(ctx.pipeline) {
            entries.extend(ppc.job_list.iter());
        }

        for (job_name, local_variants) in entries {
            if graph.get_job(job_name).is_some() {
                // A template already contributed this job; the project's
                // own mention was folded into the same entry list.
                continue;
            }
            let mut collected = Vec::new();
            let mut stack = Vec::new();
            match self.collect_job_variants(job_name, change, None, &mut stack, &mut collected) {
                Ok(_) => {}
                Err(ConfigError::NoMatchingParent(name)) => {
                    debug!(job = %job_name, unmatched = %name, "no matching variant, dropping job");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let mut frozen = Job::new(job_name.clone());
            for variant in &collected {
                frozen.apply_variant(variant)?;
            }

            // Project variables are defaults under the job's own.
            let mut variables = project.variables.clone();
            merge_variables(&mut variables, &frozen.variables);
            frozen.variables = variables;

            // The project-pipeline stanza gets the last word.
            let mut matched_local = false;
            for variant in local_variants {
                if variant.matches_branch(change, None) {
                    frozen.apply_variant(variant)?;
                    matched_local = true;
                }
            }
            if !matched_local {
                debug!(job = %job_name, "no matching project-pipeline variant, dropping job");
                continue;
            }

            if frozen.is_abstract {
                return Err(gatekeeper_core::Error::AbstractJobExecution(
                    frozen.name.clone(),
                )
                .into());
            }
            if let Some(allowed) = &frozen.allowed_projects {
                if !allowed.contains(change.project()) {
                    return Err(ConfigError::ProjectNotAllowed {
                        job: frozen.name.clone(),
                        project: change.project().to_string(),
                    });
                }
            }
            if frozen.post_review && !ctx.post_review {
                return Err(ConfigError::PostReviewJob(frozen.name.clone()));
            }
            if frozen.run.is_empty() {
                return Err(ConfigError::MissingRunPlaybook(frozen.name.clone()));
            }

            if !ctx.skip_file_matcher && !frozen.matches_files(change.files()) {
                // A change that alters the job's own configuration must
                // still test it, whatever files it touches.
                if frozen.match_on_config_updates && probe.updates_job_config(&frozen) {
                    debug!(job = %frozen.name, "including job: change updates its config");
                } else {
                    debug!(job = %frozen.name, "files do not match, dropping job");
                    continue;
                }
            }

            graph.add_job(frozen)?;
        }

        graph.freeze_dependencies()?;
        Ok(graph)
    }

    /// Collect the variants that match a change along a job's inheritance
    /// path, ancestors first. Returns the folded `intermediate` flag of
    /// the collected variants so callers can enforce that intermediate
    /// jobs are only inherited by abstract ones.
    fn collect_job_variants<'a>(
        &'a self,
        name: &str,
        change: &Change,
        override_checkout: Option<&str>,
        stack: &mut Vec<String>,
        collected: &mut Vec<&'a JobDef>,
    ) -> ConfigResult<bool> {
        if stack.iter().any(|n| n == name) {
            return Err(ConfigError::InheritanceCycle(name.to_string()));
        }
        let variants = self
            .jobs
            .get(name)
            .ok_or(ConfigError::UnknownReference {
                kind: "job",
                name: name.to_string(),
            })?;
        stack.push(name.to_string());
        let mut matched = false;
        let mut intermediate = false;
        for variant in variants {
            if !variant.matches_branch(change, override_checkout) {
                continue;
            }
            matched = true;
            if let Some(flag) = variant.intermediate {
                intermediate = flag;
            }
            if let Some(parent) = &variant.parent {
                let parent_override = variant
                    .override_checkout
                    .as_deref()
                    .or(override_checkout);
                let parent_intermediate =
                    self.collect_job_variants(parent, change, parent_override, stack, collected)?;
                if parent_intermediate && variant.is_abstract != Some(true) {
                    stack.pop();
                    return Err(gatekeeper_core::Error::IntermediateJobInheritance {
                        job: parent.clone(),
                        child: name.to_string(),
                    }
                    .into());
                }
            }
            if !collected
                .iter()
                .any(|existing| std::ptr::eq(*existing, variant))
            {
                collected.push(variant);
            }
        }
        stack.pop();
        if !matched {
            return Err(ConfigError::NoMatchingParent(name.to_string()));
        }
        Ok(intermediate)
    }
}

/// Accumulates definitions, then produces an immutable [`Layout`].
#[derive(Debug)]
pub struct LayoutBuilder {
    tenant: String,
    jobs: HashMap<String, Vec<JobDef>>,
    nodesets: HashMap<String, NodeSet>,
    secrets: HashMap<String, Secret>,
    semaphores: HashMap<String, Semaphore>,
    queues: HashMap<String, QueueDef>,
    pipelines: HashMap<String, PipelineDef>,
    projects: HashMap<String, ProjectConfig>,
    templates: HashMap<String, ProjectConfig>,
    errors: LoadingErrors,
}

impl LayoutBuilder {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            jobs: HashMap::new(),
            nodesets: HashMap::new(),
            secrets: HashMap::new(),
            semaphores: HashMap::new(),
            queues: HashMap::new(),
            pipelines: HashMap::new(),
            projects: HashMap::new(),
            templates: HashMap::new(),
            errors: LoadingErrors::default(),
        }
    }

    /// Interpret a tenant's unparsed configuration, in order. Malformed
    /// stanzas become loading errors attributed to their source; they
    /// never abort the load.
    pub fn load(&mut self, config: &UnparsedConfig) -> &mut Self {
        let mut pragmas: HashMap<(String, String), Pragma> = HashMap::new();
        for stanza in &config.stanzas {
            let pragma_key = (stanza.context.project.clone(), stanza.context.path.clone());
            let pragma = pragmas.get(&pragma_key).copied().unwrap_or_default();
            let result = match stanza.kind {
                StanzaKind::Pragma => match parse_pragma(&stanza.data) {
                    Ok(p) => {
                        pragmas.insert(pragma_key, p);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                StanzaKind::Job => parse_job(&stanza.context, &stanza.data, pragma)
                    .map(|job| self.add_job(job)),
                StanzaKind::Project => parse_project(&stanza.context, &stanza.data, pragma)
                    .map(|project| self.add_project(project)),
                StanzaKind::ProjectTemplate => {
                    parse_project(&stanza.context, &stanza.data, pragma)
                        .map(|template| self.add_template(template))
                }
                StanzaKind::Pipeline => parse_pipeline(&stanza.data)
                    .map(|def| self.add_named(def.name.clone(), def, "pipeline")),
                StanzaKind::NodeSet => parse_nodeset(&stanza.data)
                    .map(|ns| self.add_named(ns.name.clone(), ns, "nodeset")),
                StanzaKind::Secret => parse_secret(&stanza.context, &stanza.data)
                    .map(|s| self.add_named(s.name.clone(), s, "secret")),
                StanzaKind::Semaphore => parse_semaphore(&stanza.data)
                    .map(|s| self.add_named(s.name.clone(), s, "semaphore")),
                StanzaKind::Queue => parse_queue(&stanza.data)
                    .map(|q| self.add_named(q.name.clone(), q, "queue")),
            };
            if let Err(e) = result {
                self.errors
                    .add(configuration_error(&stanza.context, "stanza", e));
            }
        }
        self
    }

    pub fn add_job(&mut self, job: JobDef) {
        self.jobs.entry(job.name.clone()).or_default().push(job);
    }

    pub fn add_project(&mut self, project: ProjectConfig) {
        // Repeated project stanzas (e.g. one per branch) merge: later
        // pipeline sections append their job lists.
        match self.projects.get_mut(&project.name) {
            Some(existing) => merge_project(existing, project),
            None => {
                self.projects.insert(project.name.clone(), project);
            }
        }
    }

    pub fn add_template(&mut self, template: ProjectConfig) {
        match self.templates.get_mut(&template.name) {
            Some(existing) => merge_project(existing, template),
            None => {
                self.templates.insert(template.name.clone(), template);
            }
        }
    }

    pub fn add_nodeset(&mut self, nodeset: NodeSet) {
        self.add_named(nodeset.name.clone(), nodeset, "nodeset");
    }

    pub fn add_semaphore(&mut self, semaphore: Semaphore) {
        self.add_named(semaphore.name.clone(), semaphore, "semaphore");
    }

    pub fn add_pipeline(&mut self, def: PipelineDef) {
        self.add_named(def.name.clone(), def, "pipeline");
    }

    pub fn add_queue(&mut self, def: QueueDef) {
        self.add_named(def.name.clone(), def, "queue");
    }

    fn add_named<T>(&mut self, name: String, value: T, kind: &'static str)
    where
        Self: NamedTable<T>,
    {
        if self.table().contains_key(&name) {
            self.errors.add(gatekeeper_core::build::ConfigurationError {
                context: kind.to_string(),
                mark: name.clone(),
                text: format!("duplicate {kind} definition: {name}"),
            });
            return;
        }
        self.table().insert(name, value);
    }

    /// Resolve named nodeset references and produce the immutable layout.
    pub fn build(self) -> Layout {
        let LayoutBuilder {
            tenant,
            mut jobs,
            nodesets,
            secrets,
            semaphores,
            queues,
            pipelines,
            projects,
            templates,
            mut errors,
        } = self;
        for variants in jobs.values_mut() {
            variants.retain_mut(|variant| {
                let Some(NodeSetSpec::Name(name)) = &variant.nodeset else {
                    return true;
                };
                match nodesets.get(name) {
                    Some(ns) => {
                        variant.nodeset = Some(NodeSetSpec::Nodes(ns.clone()));
                        true
                    }
                    None => {
                        errors.add(configuration_error(
                            &variant.source_context,
                            &variant.name,
                            format!("unknown nodeset: {name}"),
                        ));
                        false
                    }
                }
            });
        }
        Layout {
            uuid: ModelId::new(),
            tenant,
            jobs,
            nodesets,
            secrets,
            semaphores,
            queues,
            pipelines,
            projects,
            templates,
            loading_errors: errors,
        }
    }
}

fn merge_project(existing: &mut ProjectConfig, incoming: ProjectConfig) {
    for (pipeline, ppc) in incoming.pipelines {
        let entry = existing.pipelines.entry(pipeline).or_default();
        for (_, variants) in ppc.job_list {
            for variant in variants {
                entry.add_variant(variant);
            }
        }
        if entry.queue_name.is_none() {
            entry.queue_name = ppc.queue_name;
        }
    }
    existing.templates.extend(incoming.templates);
    merge_variables(&mut existing.variables, &incoming.variables);
}

/// Maps a value type to its table in the builder, so duplicate handling
/// lives in one place.
trait NamedTable<T> {
    fn table(&mut self) -> &mut HashMap<String, T>;
}

impl NamedTable<NodeSet> for LayoutBuilder {
    fn table(&mut self) -> &mut HashMap<String, NodeSet> {
        &mut self.nodesets
    }
}

impl NamedTable<Secret> for LayoutBuilder {
    fn table(&mut self) -> &mut HashMap<String, Secret> {
        &mut self.secrets
    }
}

impl NamedTable<Semaphore> for LayoutBuilder {
    fn table(&mut self) -> &mut HashMap<String, Semaphore> {
        &mut self.semaphores
    }
}

impl NamedTable<QueueDef> for LayoutBuilder {
    fn table(&mut self) -> &mut HashMap<String, QueueDef> {
        &mut self.queues
    }
}

impl NamedTable<PipelineDef> for LayoutBuilder {
    fn table(&mut self) -> &mut HashMap<String, PipelineDef> {
        &mut self.pipelines
    }
}
