//! Nbexec Runner
//!
//! The asynchronous job manager for notebook executions. Turns a request
//! to run a document into a tracked, concurrency-bounded, timeout-aware
//! background task, and exposes a query/control surface over it.
//!
//! Architecture:
//! - Configuration: engine command, concurrency ceiling, grace period
//! - Estimator: heuristic timeout classification from document signals
//! - Launcher: spawns the external engine process and wires its output
//!   streams into the job's log buffer
//! - Registry: the single shared map of job id -> job record
//! - Services: the per-job monitor task and the `JobService` facade
//!   (submit/status/logs/cancel/list/cleanup/progress)
//!
//! Each accepted job runs its full lifecycle inside one tokio task; query
//! operations read registry snapshots and never block on a monitor.

pub mod config;
pub mod estimator;
pub mod launcher;
pub mod registry;
pub mod service;

pub use config::Config;
pub use service::JobService;
