//! Enrichment types
//!
//! Commits and changed files between the previous successful deploy of a
//! repository and the one being run.

use serde::{Deserialize, Serialize};

use crate::domain::job::Actor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub url: String,
    pub message: String,
    pub author: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub change: FileChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// Result of comparing two revisions of a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub commits: Vec<Commit>,
    pub files: Vec<ChangedFile>,
}
