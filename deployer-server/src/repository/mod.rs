//! Repository Module
//!
//! Database-backed implementations of the engine's repository traits.

pub mod job;

pub use job::PgJobStore;
