//! Core domain types
//!
//! This module contains the core domain structures of the job manager.
//! These types represent one tracked execution attempt and its captured
//! output, shared between the runner (which mutates them) and the query
//! surface (which only reads snapshots).

pub mod job;
pub mod log;
