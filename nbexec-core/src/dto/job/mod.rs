//! Job DTOs for the submission and query/control surface

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus};

/// Request to submit a new notebook execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub input_path: PathBuf,
    /// Derived from the input stem plus a submission timestamp when absent
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Hybrid mode: block up to this many seconds for a terminal result
    pub wait_seconds: Option<u64>,
}

/// Result of a submission attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    pub job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

impl SubmitOutcome {
    pub fn accepted(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            success: true,
            job_id: Some(job_id),
            status: Some(status),
            error: None,
        }
    }

    pub fn rejected(error: String) -> Self {
        Self {
            success: false,
            job_id: None,
            status: None,
            error: Some(error),
        }
    }
}

/// Full status view for one job
///
/// An unknown job id yields `success: false` with only `job_id` and
/// `error` populated, never a fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub success: bool,
    pub job_id: Uuid,
    pub status: Option<JobStatus>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<f64>,
    pub return_code: Option<i32>,
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn not_found(job_id: Uuid) -> Self {
        Self {
            success: false,
            job_id,
            status: None,
            input_path: None,
            output_path: None,
            created_at: None,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            return_code: None,
            error: Some(format!("Job not found: {}", job_id)),
        }
    }
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            success: true,
            job_id: job.id,
            status: Some(job.status),
            input_path: Some(job.input_path.clone()),
            output_path: Some(job.output_path.clone()),
            created_at: Some(job.created_at),
            started_at: job.started_at,
            ended_at: job.ended_at,
            duration_seconds: job.duration_seconds(),
            return_code: job.return_code,
            error: job.error_message.clone(),
        }
    }
}

/// Compact per-job view used by list()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<f64>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            input_path: job.input_path.clone(),
            created_at: job.created_at,
            ended_at: job.ended_at,
            duration_seconds: job.duration_seconds(),
        }
    }
}

/// Result of list()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOutcome {
    pub success: bool,
    pub jobs: Vec<JobSummary>,
}

/// Result of cancel()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub canceled: bool,
    pub error: Option<String>,
}

/// Result of cleanup()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub success: bool,
    pub cleaned_jobs: usize,
}

/// Coarse progress estimate for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    pub success: bool,
    pub job_id: Uuid,
    pub status: Option<JobStatus>,
    /// 0 pending, 50 running, 100 terminal; refined by a percent marker
    /// in the most recent log line when one is present
    pub percent: u8,
    /// Last raw log line, as a human hint when no marker is found
    pub hint: Option<String>,
}
