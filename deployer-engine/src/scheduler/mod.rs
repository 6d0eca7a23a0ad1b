//! Scheduler layer for the engine
//!
//! Turns deploy requests into background job tasks and owns the job
//! lifecycle from the first persist to the final one.

pub mod coordinator;

pub use coordinator::Coordinator;
