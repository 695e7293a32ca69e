//! Nbexec Core
//!
//! Core types and abstractions for the nbexec notebook execution system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, LogLine, etc.)
//! - DTOs: Data transfer objects returned by the job manager facade

pub mod domain;
pub mod dto;
