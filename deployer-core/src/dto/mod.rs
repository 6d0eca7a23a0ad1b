//! Data transfer objects
//!
//! Payloads that cross the engine boundary: incoming deploy requests,
//! outgoing live log events and list paging.

pub mod deploy;
pub mod job;
pub mod log;
