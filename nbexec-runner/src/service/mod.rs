//! Runner services
//!
//! Business logic of the job manager: the per-job log buffer, the
//! per-job monitor task, and the `JobService` facade exposing the
//! submission and query/control surface.

pub mod job;
pub mod log_buffer;
pub mod monitor;

pub use job::JobService;
pub use log_buffer::LogBuffer;
pub use monitor::JobMonitor;
