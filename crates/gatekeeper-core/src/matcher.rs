//! Branch and file matchers for job variant selection.
//!
//! Matchers keep their raw patterns for equality and serialization; the
//! compiled regexes are built once at construction and never exposed.

use regex::Regex;
use serde::Serialize;

use crate::change::Change;
use crate::error::{Error, Result};

/// One branch pattern: either an exact branch name (implied matcher, as
/// produced for in-repo job definitions) or an anchored regex.
#[derive(Debug, Clone, Serialize)]
pub struct BranchPattern {
    pub pattern: String,
    /// Exact-match (implied) patterns come from the branch a definition
    /// lives on; explicit `branches:` stanza entries are regexes.
    pub implied: bool,
    #[serde(skip)]
    regex: Option<Regex>,
}

impl PartialEq for BranchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.implied == other.implied
    }
}
impl Eq for BranchPattern {}

impl BranchPattern {
    pub fn implied(branch: impl Into<String>) -> Self {
        Self {
            pattern: branch.into(),
            implied: true,
            regex: None,
        }
    }

    pub fn explicit(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&anchor(&pattern)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            implied: false,
            regex: Some(regex),
        })
    }

    fn matches(&self, candidate: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(candidate),
            None => self.pattern == candidate,
        }
    }
}

/// Matches a change against a set of branch patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchMatcher {
    pub patterns: Vec<BranchPattern>,
}

impl BranchMatcher {
    pub fn new(patterns: Vec<BranchPattern>) -> Self {
        Self { patterns }
    }

    /// Whether the matcher accepts the change. `override_checkout` is the
    /// branch inherited from already-matched ancestor variants, and takes
    /// precedence over the change's own branch when present. Changes
    /// without a branch (tags, arbitrary refs) are tested by full ref
    /// name, so implied patterns never accept them.
    pub fn matches(&self, change: &Change, override_checkout: Option<&str>) -> bool {
        let candidate = override_checkout
            .or_else(|| change.branch())
            .unwrap_or(&change.info().ref_name);
        self.patterns.iter().any(|p| p.matches(candidate))
    }
}

/// Matches the changed-file set of a change.
#[derive(Debug, Clone, Serialize)]
pub struct FileMatcher {
    pub patterns: Vec<String>,
    #[serde(skip)]
    regexes: Vec<Regex>,
}

impl PartialEq for FileMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns
    }
}
impl Eq for FileMatcher {}

impl FileMatcher {
    pub fn new(patterns: Vec<String>) -> Result<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(&anchor(p)).map_err(|e| Error::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns, regexes })
    }

    /// True when any changed file matches. A change whose source cannot
    /// enumerate files yields an empty set, which always matches.
    pub fn matches_files(&self, files: &[String]) -> bool {
        if files.is_empty() {
            return true;
        }
        files
            .iter()
            .any(|f| self.regexes.iter().any(|re| re.is_match(f)))
    }

    /// True when every changed file matches; used for irrelevant-files
    /// matchers, where a fully-irrelevant change set means "skip".
    pub fn matches_all_files(&self, files: &[String]) -> bool {
        if files.is_empty() {
            return false;
        }
        files
            .iter()
            .all(|f| self.regexes.iter().any(|re| re.is_match(f)))
    }
}

fn anchor(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ProposedInfo, RefInfo};

    fn change_on(branch: &str, files: &[&str]) -> Change {
        Change::Proposed {
            info: RefInfo {
                project: "demo".to_string(),
                connection: "gerrit".to_string(),
                ref_name: "refs/changes/1/1".to_string(),
                old_rev: None,
                new_rev: None,
                files: files.iter().map(|s| s.to_string()).collect(),
                message: String::new(),
            },
            proposed: ProposedInfo {
                number: 1,
                patchset: 1,
                url: None,
                branch: branch.to_string(),
                needs_changes: vec![],
                needed_by: vec![],
                is_merged: false,
            },
        }
    }

    #[test]
    fn test_implied_branch_match() {
        let m = BranchMatcher::new(vec![BranchPattern::implied("main")]);
        assert!(m.matches(&change_on("main", &[]), None));
        assert!(!m.matches(&change_on("stable/2.0", &[]), None));
    }

    #[test]
    fn test_explicit_branch_regex() {
        let m = BranchMatcher::new(vec![BranchPattern::explicit("stable/.*").unwrap()]);
        assert!(m.matches(&change_on("stable/2.0", &[]), None));
        assert!(!m.matches(&change_on("main", &[]), None));
    }

    #[test]
    fn test_override_checkout_takes_precedence() {
        let m = BranchMatcher::new(vec![BranchPattern::implied("devel")]);
        assert!(!m.matches(&change_on("main", &[]), None));
        assert!(m.matches(&change_on("main", &[]), Some("devel")));
    }

    #[test]
    fn test_file_matcher() {
        let m = FileMatcher::new(vec!["docs/.*".to_string(), ".*\\.rst".to_string()]).unwrap();
        assert!(m.matches_files(&["docs/index.html".to_string()]));
        assert!(!m.matches_files(&["src/main.rs".to_string()]));
        // Empty file sets always match a files matcher.
        assert!(m.matches_files(&[]));
        assert!(m.matches_all_files(&["docs/a".to_string(), "readme.rst".to_string()]));
        assert!(!m.matches_all_files(&["docs/a".to_string(), "src/main.rs".to_string()]));
        assert!(!m.matches_all_files(&[]));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(FileMatcher::new(vec!["(".to_string()]).is_err());
        assert!(BranchPattern::explicit("[").is_err());
    }
}
