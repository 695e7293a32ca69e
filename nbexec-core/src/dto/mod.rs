//! Data transfer objects
//!
//! Structured results returned by the job manager facade. Every outcome
//! carries an explicit `success` flag instead of surfacing errors to the
//! caller as faults.

pub mod job;
pub mod log;
