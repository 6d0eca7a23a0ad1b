//! Deployer Core
//!
//! Core types shared by the deployment engine and the server.
//!
//! This crate contains:
//! - Domain types: the job record, its status machine and notification phases
//! - DTOs: deploy requests, live log events and paging parameters

pub mod domain;
pub mod dto;
