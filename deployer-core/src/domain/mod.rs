//! Core domain types
//!
//! These types describe a deploy attempt and are shared between the engine
//! (which drives the lifecycle) and the server (which persists and serves it).

pub mod commit;
pub mod job;
pub mod phase;
