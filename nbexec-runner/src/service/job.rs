//! Job service facade
//!
//! Admission control, submission, and the whole query/control surface
//! (status, logs, cancel, list, cleanup, progress). Submission either
//! rejects immediately at the concurrency ceiling or registers a Pending
//! job and hands it to a monitor task; every query reads registry
//! snapshots and never blocks on a monitor.

use chrono::{DateTime, Utc};
use nbexec_core::domain::job::{Job, JobStatus};
use nbexec_core::dto::job::{
    CancelOutcome, CleanupOutcome, JobStatusView, JobSummary, ListOutcome, ProgressView,
    SubmitJob, SubmitOutcome,
};
use nbexec_core::dto::log::LogPage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::estimator;
use crate::launcher::{EngineLauncher, ProcessLauncher};
use crate::registry::JobRegistry;
use crate::service::monitor::JobMonitor;

/// The asynchronous job manager facade
pub struct JobService {
    config: Config,
    registry: JobRegistry,
    launcher: Arc<dyn EngineLauncher>,
}

impl JobService {
    /// Creates a service launching the engine configured in `config`
    pub fn new(config: Config) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(config.clone()));
        Self::with_launcher(config, launcher)
    }

    /// Creates a service with a custom launcher
    pub fn with_launcher(config: Config, launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            config,
            registry: JobRegistry::new(),
            launcher,
        }
    }

    /// Submits a document for execution
    ///
    /// Rejects immediately when the concurrency ceiling is reached (pure
    /// backpressure, no queueing). On acceptance the job starts as
    /// Pending under its own monitor task; with `wait_seconds` set the
    /// call additionally blocks up to that long for a terminal status and
    /// returns it directly, falling back to the job id for later polling.
    pub async fn submit(&self, request: SubmitJob) -> SubmitOutcome {
        let created_at = Utc::now();
        let input_path = resolve_path(&request.input_path);
        let output_path = request
            .output_path
            .as_deref()
            .map(resolve_path)
            .unwrap_or_else(|| derive_output_path(&input_path, &created_at));

        let mut timeout_seconds = estimator::estimate_timeout(&input_path);
        if let Some(cap) = self.config.timeout_cap {
            timeout_seconds = timeout_seconds.min(cap.as_secs());
        }

        let job = Job {
            id: Uuid::new_v4(),
            input_path,
            output_path,
            parameters: request.parameters,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            ended_at: None,
            timeout_seconds,
            return_code: None,
            error_message: None,
        };
        let job_id = job.id;

        let handles = match self.registry.admit(
            job.clone(),
            self.config.log_capacity,
            self.config.max_concurrent_jobs,
        ) {
            Ok(handles) => handles,
            Err(active) => {
                warn!(
                    "Submission rejected: {} active jobs at ceiling {}",
                    active, self.config.max_concurrent_jobs
                );
                return SubmitOutcome::rejected(format!(
                    "Too many concurrent jobs ({} active, limit {}); retry once one finishes",
                    active, self.config.max_concurrent_jobs
                ));
            }
        };

        info!(
            "Job {} submitted: {} -> {} (timeout {}s)",
            job_id,
            job.input_path.display(),
            job.output_path.display(),
            timeout_seconds
        );

        JobMonitor::new(
            self.registry.clone(),
            Arc::clone(&self.launcher),
            self.config.grace_period,
        )
        .spawn(job);

        let mut status_rx = handles.status_rx;
        if let Some(wait) = request.wait_seconds.filter(|w| *w > 0) {
            let waited = tokio::time::timeout(
                Duration::from_secs(wait),
                status_rx.wait_for(|status| status.is_terminal()),
            )
            .await;
            if waited.is_err() {
                info!("Job {} still running after {}s wait window", job_id, wait);
            }
        }

        self.final_outcome(job_id, &status_rx)
    }

    /// Outcome reported back to the submitter after any wait window
    ///
    /// Normally a fresh registry snapshot; if a racing cleanup removed
    /// the job in the meantime it was necessarily terminal already, so
    /// the last status observed on the watch is reported instead.
    fn final_outcome(
        &self,
        job_id: Uuid,
        status_rx: &watch::Receiver<JobStatus>,
    ) -> SubmitOutcome {
        match self.registry.get(job_id) {
            Some(job) => SubmitOutcome {
                success: true,
                job_id: Some(job_id),
                status: Some(job.status),
                error: job.error_message,
            },
            None => SubmitOutcome {
                success: true,
                job_id: Some(job_id),
                status: Some(*status_rx.borrow()),
                error: None,
            },
        }
    }

    /// Status, timestamps, and outcome of one job
    pub fn status(&self, job_id: Uuid) -> JobStatusView {
        match self.registry.get(job_id) {
            Some(job) => JobStatusView::from(&job),
            None => JobStatusView::not_found(job_id),
        }
    }

    /// Ordered tail of captured output from `since_line` onward
    ///
    /// Feed `next_since_line` back in for cheap incremental polling.
    pub fn logs(&self, job_id: Uuid, since_line: u64) -> LogPage {
        match self.registry.logs(job_id) {
            Some(logs) => {
                let (lines, next_since_line) = logs.tail(since_line);
                LogPage {
                    success: true,
                    job_id,
                    stdout_chunk: lines.into_iter().map(|line| line.message).collect(),
                    next_since_line,
                }
            }
            None => LogPage {
                success: false,
                job_id,
                stdout_chunk: Vec::new(),
                next_since_line: since_line,
            },
        }
    }

    /// Requests cancellation of a job
    ///
    /// Best-effort and idempotent: signalling an active job reports
    /// `canceled: true` immediately regardless of how fast the engine
    /// dies, and a repeat call on an already-cancelled job is a no-op
    /// that reports the same.
    pub fn cancel(&self, job_id: Uuid) -> CancelOutcome {
        let Some(job) = self.registry.get(job_id) else {
            return CancelOutcome {
                success: false,
                canceled: false,
                error: Some(format!("Job not found: {}", job_id)),
            };
        };

        if job.status.is_terminal() {
            return CancelOutcome {
                success: true,
                canceled: job.status == JobStatus::Cancelled,
                error: None,
            };
        }

        if let Some(cancel) = self.registry.cancel_handle(job_id) {
            info!("Cancel requested for job {}", job_id);
            cancel.notify_one();
        }

        CancelOutcome {
            success: true,
            canceled: true,
            error: None,
        }
    }

    /// Summaries of all known jobs, regardless of status
    pub fn list(&self) -> ListOutcome {
        let mut jobs: Vec<JobSummary> = self
            .registry
            .list()
            .iter()
            .map(JobSummary::from)
            .collect();
        jobs.sort_by_key(|summary| summary.created_at);
        ListOutcome {
            success: true,
            jobs,
        }
    }

    /// Removes terminal jobs that ended more than `max_age_hours` ago
    ///
    /// Pending/Running jobs are never removed regardless of age.
    pub fn cleanup(&self, max_age_hours: u64) -> CleanupOutcome {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours as i64);
        let cleaned_jobs = self.registry.remove_terminal_older_than(cutoff);
        if cleaned_jobs > 0 {
            info!(
                "Cleaned up {} job(s) older than {}h",
                cleaned_jobs, max_age_hours
            );
        }
        CleanupOutcome {
            success: true,
            cleaned_jobs,
        }
    }

    /// Coarse progress estimate
    ///
    /// Without engine cooperation there is no fine-grained tracking:
    /// Pending is 0, Running is 50, terminal is 100. A Running estimate
    /// is refined by an explicit percent marker in the most recent log
    /// line, and the raw line is returned as a hint either way.
    pub fn progress(&self, job_id: Uuid) -> ProgressView {
        let Some(job) = self.registry.get(job_id) else {
            return ProgressView {
                success: false,
                job_id,
                status: None,
                percent: 0,
                hint: None,
            };
        };

        let hint = self
            .registry
            .logs(job_id)
            .and_then(|logs| logs.last_message());

        let percent = match job.status {
            JobStatus::Pending => 0,
            JobStatus::Running => hint
                .as_deref()
                .and_then(parse_percent_marker)
                .unwrap_or(50),
            _ => 100,
        };

        ProgressView {
            success: true,
            job_id,
            status: Some(job.status),
            percent,
            hint,
        }
    }
}

/// Absolutizes a path against the current working directory
fn resolve_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Derives the output location from the input stem and the submission
/// timestamp
///
/// The timestamp comes from the job's `created_at`, computed once at
/// submission, so the derived path never changes on re-inspection.
fn derive_output_path(input: &Path, created_at: &DateTime<Utc>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ipynb".to_string());
    let name = format!("{}_{}.{}", stem, created_at.format("%Y%m%d_%H%M%S"), ext);
    input.with_file_name(name)
}

/// Extracts the last `NN%` marker from a log line, clamped to 100
fn parse_percent_marker(line: &str) -> Option<u8> {
    let mut result = None;
    for (i, ch) in line.char_indices() {
        if ch != '%' {
            continue;
        }
        // ASCII digits are single bytes, so this count is a valid slice
        // offset even when the preceding character is multibyte
        let digits_len = line[..i]
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits_len > 0 {
            if let Ok(value) = line[i - digits_len..i].parse::<u64>() {
                result = Some(value.min(100) as u8);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Writes an executable stub engine invoked as `engine input output ...`
    fn stub_engine(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn write_notebook(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn service_for(dir: &TempDir, engine_body: &str) -> JobService {
        let engine = stub_engine(dir, engine_body);
        let config = Config::new(engine.to_string_lossy().into_owned())
            .with_max_concurrent_jobs(4)
            .with_timeout_cap(Duration::from_secs(10));
        JobService::new(config)
    }

    fn submit_request(input: &Path) -> SubmitJob {
        SubmitJob {
            input_path: input.to_path_buf(),
            output_path: None,
            parameters: Default::default(),
            wait_seconds: None,
        }
    }

    async fn wait_until_terminal(service: &JobService, job_id: Uuid) -> Job {
        for _ in 0..400 {
            let job = service.registry.get(job_id).expect("job disappeared");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }

    #[tokio::test]
    async fn test_trivial_document_succeeds_synchronously() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "echo executing\ncat \"$1\" > \"$2\"");
        let input = write_notebook(&dir, "trivial.ipynb", "{\"cells\": []}");

        let mut request = submit_request(&input);
        request.wait_seconds = Some(5);
        let outcome = service.submit(request).await;

        assert!(outcome.success);
        assert_eq!(outcome.status, Some(JobStatus::Succeeded));

        let job = service.registry.get(outcome.job_id.unwrap()).unwrap();
        assert_eq!(job.return_code, Some(0));
        assert!(job.ended_at.is_some());
        assert!(job.output_path.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "echo broken >&2\nexit 3");
        let input = write_notebook(&dir, "broken.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job = wait_until_terminal(&service, outcome.job_id.unwrap()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.return_code, Some(3));
        assert!(job.error_message.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact_fails() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "exit 0");
        let input = write_notebook(&dir, "silent.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job = wait_until_terminal(&service, outcome.job_id.unwrap()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.return_code, Some(0));
        assert!(job.error_message.unwrap().contains("no output artifact"));
    }

    #[tokio::test]
    async fn test_launch_failure_marks_job_failed() {
        let dir = TempDir::new().unwrap();
        let config = Config::new("/nonexistent/engine".to_string());
        let service = JobService::new(config);
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        assert!(outcome.success);
        let job = wait_until_terminal(&service, outcome.job_id.unwrap()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_none());
        assert!(job.return_code.is_none());
        assert!(job.error_message.unwrap().contains("Failed to launch"));
    }

    #[tokio::test]
    async fn test_timeout_terminates_engine() {
        let dir = TempDir::new().unwrap();
        let engine = stub_engine(&dir, "echo $$\nsleep 30");
        let config = Config::new(engine.to_string_lossy().into_owned())
            .with_timeout_cap(Duration::from_secs(1));
        let service = JobService::new(config);
        let input = write_notebook(&dir, "slow.ipynb", "{}");

        let started = std::time::Instant::now();
        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();
        let job = wait_until_terminal(&service, job_id).await;

        assert_eq!(job.status, JobStatus::TimedOut);
        assert!(job.return_code.is_none());
        assert!(job.error_message.unwrap().contains("did not complete"));
        // SIGTERM kills the stub well before its 30s sleep would end
        assert!(started.elapsed() < Duration::from_secs(10));

        // The stub printed its own pid; it must be gone after the
        // terminal transition, no residual process
        let page = service.logs(job_id, 0);
        let pid: i32 = page.stdout_chunk[0].trim().parse().unwrap();
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
        assert!(!alive, "engine process {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_final_outcome_survives_cleanup_race() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "cat \"$1\" > \"$2\"");
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();
        let status_rx = service.registry.watch_status(job_id).unwrap();
        wait_until_terminal(&service, job_id).await;

        // Cleanup removes the record before the submitter reads it back
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.cleanup(0).cleaned_jobs, 1);

        let late = service.final_outcome(job_id, &status_rx);
        assert!(late.success);
        assert_eq!(late.job_id, Some(job_id));
        assert_eq!(late.status, Some(JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "sleep 30");
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();

        let first = service.cancel(job_id);
        assert!(first.success);
        assert!(first.canceled);

        let job = wait_until_terminal(&service, job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.ended_at.is_some());

        let second = service.cancel(job_id);
        assert!(second.success);
        assert!(second.canceled);
        assert_eq!(
            service.registry.get(job_id).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_admission_ceiling_rejects_third_submission() {
        let dir = TempDir::new().unwrap();
        let engine = stub_engine(&dir, "sleep 30");
        let config = Config::new(engine.to_string_lossy().into_owned())
            .with_max_concurrent_jobs(2);
        let service = JobService::new(config);
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let first = service.submit(submit_request(&input)).await;
        let second = service.submit(submit_request(&input)).await;
        let third = service.submit(submit_request(&input)).await;

        assert!(first.success);
        assert!(second.success);
        assert!(!third.success);
        assert!(third.job_id.is_none());
        assert!(third.error.unwrap().contains("Too many concurrent jobs"));
        assert_eq!(service.registry.len(), 2);

        service.cancel(first.job_id.unwrap());
        service.cancel(second.job_id.unwrap());
    }

    #[tokio::test]
    async fn test_logs_paginate_without_gaps() {
        let dir = TempDir::new().unwrap();
        let service = service_for(
            &dir,
            "echo alpha\necho beta\necho gamma\ncat \"$1\" > \"$2\"",
        );
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();
        wait_until_terminal(&service, job_id).await;

        let page = service.logs(job_id, 0);
        assert!(page.success);
        assert_eq!(page.stdout_chunk, vec!["alpha", "beta", "gamma"]);
        assert_eq!(page.next_since_line, 3);

        // Reusing the returned cursor yields nothing new
        let next = service.logs(job_id, page.next_since_line);
        assert!(next.stdout_chunk.is_empty());
        assert_eq!(next.next_since_line, 3);

        // A mid-stream cursor returns exactly the later lines
        let tail = service.logs(job_id, 1);
        assert_eq!(tail.stdout_chunk, vec!["beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_unknown_job_queries_are_structured_failures() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "exit 0");
        let missing = Uuid::new_v4();

        let status = service.status(missing);
        assert!(!status.success);
        assert!(status.error.unwrap().contains("not found"));

        let logs = service.logs(missing, 0);
        assert!(!logs.success);
        assert!(logs.stdout_chunk.is_empty());

        let cancel = service.cancel(missing);
        assert!(!cancel.success);
        assert!(!cancel.canceled);

        let progress = service.progress(missing);
        assert!(!progress.success);
        assert_eq!(progress.percent, 0);
    }

    #[tokio::test]
    async fn test_list_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "cat \"$1\" > \"$2\"");
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();
        wait_until_terminal(&service, job_id).await;

        let listed = service.list();
        assert!(listed.success);
        assert_eq!(listed.jobs.len(), 1);
        assert_eq!(listed.jobs[0].job_id, job_id);
        assert_eq!(listed.jobs[0].status, JobStatus::Succeeded);

        // A freshly-ended job survives a 24h cleanup
        assert_eq!(service.cleanup(24).cleaned_jobs, 0);

        // But not a zero-age one
        tokio::time::sleep(Duration::from_millis(10)).await;
        let cleaned = service.cleanup(0);
        assert!(cleaned.success);
        assert_eq!(cleaned.cleaned_jobs, 1);
        assert!(service.registry.is_empty());
    }

    #[tokio::test]
    async fn test_progress_reflects_lifecycle_and_markers() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "echo 'progress: 30%'\nsleep 30");
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let outcome = service.submit(submit_request(&input)).await;
        let job_id = outcome.job_id.unwrap();

        // Wait for the marker line to arrive
        for _ in 0..200 {
            if service.logs(job_id, 0).next_since_line > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let running = service.progress(job_id);
        assert_eq!(running.status, Some(JobStatus::Running));
        assert_eq!(running.percent, 30);
        assert_eq!(running.hint.as_deref(), Some("progress: 30%"));

        service.cancel(job_id);
        wait_until_terminal(&service, job_id).await;

        let done = service.progress(job_id);
        assert_eq!(done.percent, 100);
    }

    #[tokio::test]
    async fn test_wait_window_elapses_for_slow_jobs() {
        let dir = TempDir::new().unwrap();
        let service = service_for(&dir, "sleep 30");
        let input = write_notebook(&dir, "doc.ipynb", "{}");

        let mut request = submit_request(&input);
        request.wait_seconds = Some(1);
        let outcome = service.submit(request).await;

        assert!(outcome.success);
        let status = outcome.status.unwrap();
        assert!(status.is_active(), "expected non-terminal, got {}", status);

        service.cancel(outcome.job_id.unwrap());
    }

    #[test]
    fn test_derive_output_path_uses_submission_timestamp() {
        let created_at = DateTime::parse_from_rfc3339("2026-08-30T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let derived = derive_output_path(Path::new("/data/report.ipynb"), &created_at);
        assert_eq!(
            derived,
            PathBuf::from("/data/report_20260830_123456.ipynb")
        );

        // Same submission timestamp, same path, however often derived
        let again = derive_output_path(Path::new("/data/report.ipynb"), &created_at);
        assert_eq!(derived, again);
    }

    #[test]
    fn test_parse_percent_marker() {
        assert_eq!(parse_percent_marker("progress: 42%"), Some(42));
        assert_eq!(parse_percent_marker("10% then 80% done"), Some(80));
        assert_eq!(parse_percent_marker("no marker here"), None);
        assert_eq!(parse_percent_marker("stray % sign"), None);
        assert_eq!(parse_percent_marker("overflow 250%"), Some(100));
    }

    #[test]
    fn test_parse_percent_marker_multibyte_neighbors() {
        // Non-ASCII characters directly before the digits must not panic
        assert_eq!(parse_percent_marker("é42%"), Some(42));
        assert_eq!(parse_percent_marker("进度 42%"), Some(42));
        assert_eq!(parse_percent_marker("进度42%"), Some(42));
        assert_eq!(parse_percent_marker("日本語%"), None);
    }
}
