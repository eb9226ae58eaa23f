//! Compute-node resources: what a job needs and the pending ask for them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ModelId;

/// One compute node: a name unique within its set and a provider label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub label: String,
}

/// A named subset of a nodeset's nodes (e.g. "controllers").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub nodes: Vec<String>,
}

/// A named, ordered collection of nodes and groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    pub name: String,
    nodes: Vec<Node>,
    groups: Vec<Group>,
}

impl NodeSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.iter().any(|n| n.name == node.name) {
            return Err(Error::DuplicateNode(node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_group(&mut self, group: Group) -> Result<()> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(Error::DuplicateGroup(group.name));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// An independent equal-by-value copy. Mutating the copy never affects
    /// the original.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Labels in node order, for request submission and status display.
    pub fn labels(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.label.clone()).collect()
    }
}

/// State of a pending node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRequestState {
    Requested,
    Fulfilled,
    Failed,
}

/// A pending ask for the nodes of a [`NodeSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub id: ModelId,
    /// Job the request is for.
    pub job_name: String,
    pub nodeset: NodeSet,
    /// Absolute priority; lower numbers are served first.
    pub priority: u32,
    /// Position of the requesting item within its queue, for fair
    /// ordering among requests of equal priority.
    pub relative_priority: u32,
    pub state: NodeRequestState,
}

impl NodeRequest {
    /// A request that would let a paused parent build resume is served
    /// ahead of its precedence class.
    pub fn new(
        job_name: impl Into<String>,
        nodeset: NodeSet,
        base_priority: u32,
        relative_priority: u32,
        unblocks_paused_parent: bool,
    ) -> Self {
        let priority = if unblocks_paused_parent {
            base_priority / 2
        } else {
            base_priority
        };
        Self {
            id: ModelId::new(),
            job_name: job_name.into(),
            nodeset,
            priority,
            relative_priority,
            state: NodeRequestState::Requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nodeset() -> NodeSet {
        let mut ns = NodeSet::new("two-node");
        ns.add_node(Node {
            name: "controller".to_string(),
            label: "ubuntu-noble".to_string(),
        })
        .unwrap();
        ns.add_node(Node {
            name: "worker".to_string(),
            label: "ubuntu-noble".to_string(),
        })
        .unwrap();
        ns.add_group(Group {
            name: "switches".to_string(),
            nodes: vec!["controller".to_string()],
        })
        .unwrap();
        ns
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut ns = sample_nodeset();
        let err = ns.add_node(Node {
            name: "worker".to_string(),
            label: "debian".to_string(),
        });
        assert!(matches!(err, Err(Error::DuplicateNode(_))));
    }

    #[test]
    fn test_copy_is_independent() {
        let original = sample_nodeset();
        let mut copied = original.copy();
        assert_eq!(original, copied);
        copied
            .add_node(Node {
                name: "extra".to_string(),
                label: "debian".to_string(),
            })
            .unwrap();
        copied.groups[0].nodes.push("worker".to_string());
        assert_eq!(original.nodes().len(), 2);
        assert_eq!(original.groups()[0].nodes.len(), 1);
        assert_ne!(original, copied);
    }

    #[test]
    fn test_paused_parent_boost() {
        let normal = NodeRequest::new("job", sample_nodeset(), 200, 0, false);
        let boosted = NodeRequest::new("job", sample_nodeset(), 200, 0, true);
        assert_eq!(normal.priority, 200);
        assert_eq!(boosted.priority, 100);
    }
}
