//! Deployer Engine
//!
//! Turns deploy requests into isolated, tracked executions of a deploy script.
//!
//! Architecture:
//! - Sandbox: provider interface for isolated containers, plus a podman implementation
//! - Repositories: job persistence and commit diff lookup interfaces
//! - Services: execution, lifecycle notification and log streaming
//! - Scheduler: the coordinator that runs one task per deploy request
//!
//! Every collaborator is injected as a trait object so each part can be
//! exercised against fakes.

pub mod error;
pub mod podman;
pub mod repository;
pub mod sandbox;
pub mod scheduler;
pub mod service;

pub use error::JobError;
pub use scheduler::Coordinator;
