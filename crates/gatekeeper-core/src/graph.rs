//! The frozen, dependency-annotated set of jobs one change must run.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::job::Job;

/// A DAG of frozen jobs keyed by name, with an explicit dependency index
/// (parent name → dependent name → soft edge flag).
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobGraph {
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
    /// parent → {dependent → soft}
    dependents: HashMap<String, HashMap<String, bool>>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frozen job. Rejects duplicate names, and walks the declared
    /// dependencies through the existing graph before mutating anything:
    /// a chain that re-includes the new job's name is a cycle. Soft edges
    /// to jobs not yet inserted are allowed; hard edges are checked again
    /// by [`JobGraph::freeze_dependencies`] once insertion is complete.
    pub fn add_job(&mut self, job: Job) -> Result<()> {
        if self.index.contains_key(&job.name) {
            return Err(Error::DuplicateJob(job.name));
        }
        for dep in &job.dependencies {
            self.check_no_path_to(&dep.name, &job.name)?;
        }
        for dep in &job.dependencies {
            self.dependents
                .entry(dep.name.clone())
                .or_default()
                .insert(job.name.clone(), dep.soft);
        }
        self.index.insert(job.name.clone(), self.jobs.len());
        self.jobs.push(job);
        Ok(())
    }

    /// Verify every hard dependency resolves to a job in the graph.
    /// Called after the last insertion; a dangling hard edge at that
    /// point is a configuration error.
    pub fn freeze_dependencies(&self) -> Result<()> {
        for job in &self.jobs {
            for dep in &job.dependencies {
                if !dep.soft && !self.index.contains_key(&dep.name) {
                    return Err(Error::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_no_path_to(&self, start: &str, target: &str) -> Result<()> {
        if start == target {
            return Err(Error::DependencyCycle(target.to_string()));
        }
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(idx) = self.index.get(&name) {
                for dep in &self.jobs[*idx].dependencies {
                    if dep.name == target {
                        return Err(Error::DependencyCycle(target.to_string()));
                    }
                    stack.push(dep.name.clone());
                }
            }
        }
        Ok(())
    }

    /// Jobs in insertion (declaration) order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get_job(&self, name: &str) -> Option<&Job> {
        self.index.get(name).map(|i| &self.jobs[*i])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs the named job depends on, directly.
    pub fn direct_parent_jobs(&self, name: &str) -> Vec<&Job> {
        let Some(job) = self.get_job(name) else {
            return Vec::new();
        };
        job.dependencies
            .iter()
            .filter_map(|d| self.get_job(&d.name))
            .collect()
    }

    /// Jobs that directly depend on the named job, in insertion order.
    pub fn direct_dependent_jobs(&self, name: &str) -> Vec<&Job> {
        let Some(deps) = self.dependents.get(name) else {
            return Vec::new();
        };
        self.jobs
            .iter()
            .filter(|j| deps.contains_key(&j.name))
            .collect()
    }

    /// The transitive dependency closure of the named job. With
    /// `skip_soft`, traversal follows hard edges only.
    pub fn parent_jobs_recursive(&self, name: &str, skip_soft: bool) -> Vec<&Job> {
        self.closure(name, skip_soft, |job_name| {
            let Some(job) = self.get_job(job_name) else {
                return Vec::new();
            };
            job.dependencies
                .iter()
                .map(|d| (d.name.clone(), d.soft))
                .collect()
        })
    }

    /// The transitive dependent closure of the named job. With
    /// `skip_soft`, traversal follows hard edges only, for cascades that
    /// must stop at edges a skipped parent satisfies.
    pub fn dependent_jobs_recursive(&self, name: &str, skip_soft: bool) -> Vec<&Job> {
        self.closure(name, skip_soft, |job_name| {
            self.dependents
                .get(job_name)
                .map(|deps| deps.iter().map(|(n, soft)| (n.clone(), *soft)).collect())
                .unwrap_or_default()
        })
    }

    fn closure<'a>(
        &'a self,
        start: &str,
        skip_soft: bool,
        neighbors: impl Fn(&str) -> Vec<(String, bool)>,
    ) -> Vec<&'a Job> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.to_string());
        seen.insert(start.to_string());
        while let Some(name) = queue.pop_front() {
            for (next, soft) in neighbors(&name) {
                if skip_soft && soft {
                    continue;
                }
                if seen.insert(next.clone()) {
                    if let Some(job) = self.get_job(&next) {
                        result.push(job);
                    }
                    queue.push_back(next);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobDependency;

    fn job(name: &str, deps: Vec<JobDependency>) -> Job {
        let mut j = Job::new(name);
        j.dependencies = deps;
        j
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut graph = JobGraph::new();
        graph.add_job(job("unit", vec![])).unwrap();
        assert!(matches!(
            graph.add_job(job("unit", vec![])),
            Err(Error::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = JobGraph::new();
        graph.add_job(job("a", vec![])).unwrap();
        graph
            .add_job(job("b", vec![JobDependency::hard("a")]))
            .unwrap();
        graph
            .add_job(job("c", vec![JobDependency::hard("b")]))
            .unwrap();

        // a -> b -> c already chains; a job that c' depends on while being
        // depended on by a would close the loop.
        let mut cyclic = Job::new("a2");
        cyclic.dependencies = vec![JobDependency::hard("c")];
        graph.add_job(cyclic).unwrap();

        let mut closing = Job::new("d");
        closing.dependencies = vec![JobDependency::hard("d")];
        assert!(matches!(
            graph.add_job(closing),
            Err(Error::DependencyCycle(_))
        ));
        assert_eq!(graph.len(), 4);
        assert!(graph.get_job("d").is_none());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = JobGraph::new();
        let err = graph.add_job(job("solo", vec![JobDependency::hard("solo")]));
        assert!(matches!(err, Err(Error::DependencyCycle(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_recursive_closures() {
        let mut graph = JobGraph::new();
        graph.add_job(job("a", vec![])).unwrap();
        graph
            .add_job(job("b", vec![JobDependency::hard("a")]))
            .unwrap();
        graph
            .add_job(job("c", vec![JobDependency::hard("b")]))
            .unwrap();
        graph
            .add_job(job("d", vec![JobDependency::soft("b")]))
            .unwrap();

        let names = |jobs: Vec<&Job>| {
            let mut v: Vec<_> = jobs.iter().map(|j| j.name.clone()).collect();
            v.sort();
            v
        };

        assert_eq!(names(graph.dependent_jobs_recursive("a", false)), ["b", "c", "d"]);
        assert_eq!(names(graph.dependent_jobs_recursive("a", true)), ["b", "c"]);
        assert_eq!(names(graph.parent_jobs_recursive("c", false)), ["a", "b"]);
        assert_eq!(names(graph.parent_jobs_recursive("d", true)), Vec::<String>::new());
        assert_eq!(names(graph.parent_jobs_recursive("d", false)), ["a", "b"]);
    }

    #[test]
    fn test_freeze_dependencies_catches_dangling_hard_edges() {
        let mut graph = JobGraph::new();
        graph
            .add_job(job("b", vec![JobDependency::hard("missing")]))
            .unwrap();
        assert!(matches!(
            graph.freeze_dependencies(),
            Err(Error::UnknownDependency { .. })
        ));

        let mut soft_graph = JobGraph::new();
        soft_graph
            .add_job(job("b", vec![JobDependency::soft("missing")]))
            .unwrap();
        soft_graph.freeze_dependencies().unwrap();
    }
}
