//! Diff repository
//!
//! Looks up what changed between two revisions of a repository.

use async_trait::async_trait;
use deployer_core::domain::commit::Diff;
use thiserror::Error;

/// Failure of a diff lookup; never fatal for a deploy
#[derive(Debug, Error)]
#[error("Diff lookup failed: {0}")]
pub struct DiffError(pub String);

/// Source-control comparison between two commits
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// Commits and changed files from `base_sha` (exclusive) to `head_sha`
    async fn compare(
        &self,
        owner: &str,
        name: &str,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<Diff, DiffError>;
}
