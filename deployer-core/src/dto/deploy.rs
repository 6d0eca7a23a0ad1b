//! Deploy request DTO

use serde::{Deserialize, Serialize};

use crate::domain::job::Actor;

/// A "deploy requested" event, already extracted from its source payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// External deployment id; must be unique among running deploys
    pub job_id: i64,
    pub owner: String,
    pub name: String,
    pub ssh_url: String,
    pub http_url: String,
    pub task: String,
    pub environment: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub author: Actor,
}
