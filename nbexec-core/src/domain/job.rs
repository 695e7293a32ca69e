//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Notebook execution record
///
/// One tracked attempt to run a document through the external engine.
/// Mutated only by the job's own monitor; every other path reads clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub parameters: HashMap<String, serde_json::Value>,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Enforcement ceiling computed once at submission, immutable after.
    pub timeout_seconds: u64,
    /// Engine exit code; only set when the process actually exited.
    pub return_code: Option<i32>,
    pub error_message: Option<String>,
}

impl Job {
    /// Wall-clock duration from start to end, or to now for a running job
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.ended_at.unwrap_or_else(chrono::Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// Job execution status
///
/// Transitions are linear and monotonic: Pending -> Running -> one
/// terminal status. Launch failure moves Pending straight to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// True once no further transition can occur
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    /// True while the job still counts against the concurrency ceiling
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
