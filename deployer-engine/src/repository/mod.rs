//! Repository layer
//!
//! Interfaces to the engine's data collaborators: the job record store and
//! the source-control diff lookup used for enrichment. Both are trait-based
//! so the server can plug in real backends and tests can plug in fakes.

mod diff;
mod jobs;

// Re-export traits
pub use diff::{DiffError, DiffSource};
pub use jobs::{JobStore, StoreError};

// Re-export implementations
pub use jobs::MemoryJobStore;
