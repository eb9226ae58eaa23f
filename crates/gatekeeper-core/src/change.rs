//! Change types: immutable descriptions of proposed or existing repository
//! states.
//!
//! A [`Change`] is what a pipeline tests. It is never mutated after
//! creation; a new patchset or ref update produces a new `Change` value.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ModelId;

/// How a project's proposed changes are combined with their target branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    #[default]
    Merge,
    MergeResolve,
    CherryPick,
    SquashMerge,
}

/// Data common to every kind of change: which repository state it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefInfo {
    /// Project (repository) the change belongs to.
    pub project: String,
    /// Source connection the change arrived on.
    pub connection: String,
    /// Full ref name (e.g. "refs/heads/main", "refs/tags/v1.2").
    pub ref_name: String,
    /// Revision before the update, if known.
    pub old_rev: Option<String>,
    /// Revision after the update, if known.
    pub new_rev: Option<String>,
    /// Files touched by the change, when the source can enumerate them.
    pub files: Vec<String>,
    /// First line of the commit message, for status display.
    pub message: String,
}

/// A proposed change (patchset under review).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedInfo {
    /// Review-system change number.
    pub number: u64,
    /// Patchset number within the change.
    pub patchset: u64,
    /// Review URL for reporting.
    pub url: Option<Url>,
    /// Target branch of the proposal.
    pub branch: String,
    /// Changes this one declares a dependency on.
    pub needs_changes: Vec<ModelId>,
    /// Changes that declared a dependency on this one.
    pub needed_by: Vec<ModelId>,
    /// Whether the source reports the change as already merged.
    pub is_merged: bool,
}

/// An immutable description of a proposed or existing repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Change {
    /// An arbitrary ref update (not a branch or tag).
    Ref { info: RefInfo },
    /// A branch tip.
    Branch { info: RefInfo, branch: String },
    /// A tag.
    Tag { info: RefInfo, tag: String },
    /// A proposed change under review.
    Proposed {
        info: RefInfo,
        proposed: ProposedInfo,
    },
}

impl Change {
    /// Common ref data for any change kind.
    pub fn info(&self) -> &RefInfo {
        match self {
            Change::Ref { info }
            | Change::Branch { info, .. }
            | Change::Tag { info, .. }
            | Change::Proposed { info, .. } => info,
        }
    }

    pub fn project(&self) -> &str {
        &self.info().project
    }

    /// Effective branch for matching, if the change has one. Tag and
    /// arbitrary ref updates match by full ref name instead.
    pub fn branch(&self) -> Option<&str> {
        match self {
            Change::Branch { branch, .. } => Some(branch),
            Change::Proposed { proposed, .. } => Some(&proposed.branch),
            Change::Ref { .. } | Change::Tag { .. } => None,
        }
    }

    /// Files touched by the change. Empty for changes whose source cannot
    /// enumerate files (tags, arbitrary refs); file matchers treat an
    /// empty set as matching.
    pub fn files(&self) -> &[String] {
        &self.info().files
    }

    /// Whether the change is a proposal still subject to review.
    pub fn is_proposed(&self) -> bool {
        matches!(self, Change::Proposed { .. })
    }

    /// Review URL for status export, when the source provides one.
    pub fn url(&self) -> Option<&Url> {
        match self {
            Change::Proposed { proposed, .. } => proposed.url.as_ref(),
            _ => None,
        }
    }

    /// Identifier used in status export: "number,patchset" for proposals,
    /// the ref name otherwise.
    pub fn display_id(&self) -> String {
        match self {
            Change::Proposed { proposed, .. } => {
                format!("{},{}", proposed.number, proposed.patchset)
            }
            _ => self.info().ref_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_info(project: &str, ref_name: &str) -> RefInfo {
        RefInfo {
            project: project.to_string(),
            connection: "gerrit".to_string(),
            ref_name: ref_name.to_string(),
            old_rev: None,
            new_rev: Some("abc123".to_string()),
            files: vec!["src/main.rs".to_string()],
            message: "a change".to_string(),
        }
    }

    #[test]
    fn test_branch_resolution() {
        let change = Change::Proposed {
            info: ref_info("demo", "refs/changes/1/1"),
            proposed: ProposedInfo {
                number: 1000,
                patchset: 2,
                url: None,
                branch: "main".to_string(),
                needs_changes: vec![],
                needed_by: vec![],
                is_merged: false,
            },
        };
        assert_eq!(change.branch(), Some("main"));
        assert_eq!(change.display_id(), "1000,2");

        let tag = Change::Tag {
            info: ref_info("demo", "refs/tags/v1.0"),
            tag: "v1.0".to_string(),
        };
        assert_eq!(tag.branch(), None);
        assert_eq!(tag.display_id(), "refs/tags/v1.0");
    }
}
