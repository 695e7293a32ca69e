//! Per-job monitor
//!
//! One monitor task drives one job from launch to its terminal status.
//! It owns the engine child handle exclusively: timeout expiry and the
//! cancel signal both run the cooperative terminate -> grace -> kill
//! escalation before the terminal transition is written to the registry,
//! so no process is ever left orphaned.

use anyhow::{Context, Result};
use nbexec_core::domain::job::{Job, JobStatus};
use nbexec_core::domain::log::LogStream;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::launcher::{EngineHandle, EngineLauncher, LaunchSpec};
use crate::registry::JobRegistry;

/// How the wait phase ended
enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Drives one job's lifecycle inside its own tokio task
pub struct JobMonitor {
    registry: JobRegistry,
    launcher: Arc<dyn EngineLauncher>,
    grace_period: Duration,
}

impl JobMonitor {
    pub fn new(
        registry: JobRegistry,
        launcher: Arc<dyn EngineLauncher>,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            launcher,
            grace_period,
        }
    }

    /// Spawns the monitor task for `job`
    ///
    /// Any fault the monitor itself hits still forces the job into
    /// Failed with the fault text captured, so the registry never holds
    /// a job stuck between states.
    pub fn spawn(self, job: Job) -> JoinHandle<()> {
        let job_id = job.id;
        let registry = self.registry.clone();

        tokio::spawn(async move {
            if let Err(e) = self.run(job).await {
                error!("Monitor fault for job {}: {:#}", job_id, e);
                registry.complete(
                    job_id,
                    JobStatus::Failed,
                    None,
                    Some(format!("Internal monitor fault: {:#}", e)),
                );
            }
        })
    }

    async fn run(self, job: Job) -> Result<()> {
        let job_id = job.id;

        let logs = self
            .registry
            .logs(job_id)
            .context("Job missing from registry before launch")?;
        let cancel = self
            .registry
            .cancel_handle(job_id)
            .context("Job cancel handle missing from registry")?;

        let spec = LaunchSpec {
            job_id,
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            parameters: job.parameters.clone(),
            kernel_name: None,
        };

        let mut handle = match self.launcher.launch(&spec, Arc::clone(&logs)).await {
            Ok(handle) => handle,
            Err(e) => {
                let message = format!("Failed to launch engine: {:#}", e);
                error!("Job {}: {}", job_id, message);
                logs.push(LogStream::Stderr, message.clone());
                self.registry
                    .complete(job_id, JobStatus::Failed, None, Some(message));
                return Ok(());
            }
        };

        if !self.registry.mark_running(job_id) {
            // Should not happen: only this monitor transitions the job
            warn!("Job {} was not Pending at launch; terminating engine", job_id);
            graceful_terminate(&mut handle.child, self.grace_period).await;
            return Ok(());
        }

        info!(
            "Job {} running (timeout {}s): {}",
            job_id,
            job.timeout_seconds,
            job.input_path.display()
        );

        let timeout = Duration::from_secs(job.timeout_seconds);
        let outcome = tokio::select! {
            status = handle.child.wait() => {
                WaitOutcome::Exited(status.context("Failed to wait on engine process")?)
            }
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = cancel.notified() => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::Exited(status) => {
                drain_readers(&mut handle).await;
                self.finalize_exit(&job, status).await;
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "Job {} exceeded its {}s timeout, terminating engine",
                    job_id, job.timeout_seconds
                );
                graceful_terminate(&mut handle.child, self.grace_period).await;
                drain_readers(&mut handle).await;
                self.registry.complete(
                    job_id,
                    JobStatus::TimedOut,
                    None,
                    Some(format!(
                        "Execution did not complete within {}s; engine terminated",
                        job.timeout_seconds
                    )),
                );
            }
            WaitOutcome::Cancelled => {
                info!("Job {} canceled, terminating engine", job_id);
                graceful_terminate(&mut handle.child, self.grace_period).await;
                drain_readers(&mut handle).await;
                self.registry.complete(
                    job_id,
                    JobStatus::Cancelled,
                    None,
                    Some("Canceled by user request".to_string()),
                );
            }
        }

        Ok(())
    }

    /// Terminal transition for a process that exited on its own
    ///
    /// Success requires both a zero exit code and a non-empty output
    /// artifact; the engine can exit 0 while silently producing nothing.
    async fn finalize_exit(&self, job: &Job, status: ExitStatus) {
        let return_code = status.code();

        let (terminal, error) = match return_code {
            Some(0) => {
                if artifact_present(&job.output_path).await {
                    (JobStatus::Succeeded, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(format!(
                            "Engine exited successfully but produced no output artifact at {}",
                            job.output_path.display()
                        )),
                    )
                }
            }
            Some(code) => (
                JobStatus::Failed,
                Some(format!("Engine exited with code {}", code)),
            ),
            None => (
                JobStatus::Failed,
                Some("Engine was terminated by a signal".to_string()),
            ),
        };

        info!("Job {} finished: {}", job.id, terminal);
        self.registry.complete(job.id, terminal, return_code, error);
    }
}

/// True when the output artifact exists and is non-empty
async fn artifact_present(path: &std::path::Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Waits for the stream readers so the log buffer is complete before the
/// terminal transition is published
async fn drain_readers(handle: &mut EngineHandle) {
    for reader in handle.readers.drain(..) {
        if let Err(e) = reader.await {
            debug!("Log reader task ended abnormally: {}", e);
        }
    }
}

/// Cooperative termination: SIGTERM to the process group, a grace
/// interval, then SIGKILL, then reap
#[cfg(unix)]
async fn graceful_terminate(child: &mut Child, grace: Duration) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return;
    };
    let pgid = Pid::from_raw(pid as i32);

    let _ = killpg(pgid, Signal::SIGTERM);

    tokio::select! {
        _ = tokio::time::sleep(grace) => {
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.wait().await;
        }
        _ = child.wait() => {}
    }
}

#[cfg(not(unix))]
async fn graceful_terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}
