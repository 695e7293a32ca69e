//! Job registry
//!
//! The only structure shared between submission, monitors, and queries:
//! a mutex-guarded map of job id -> entry. Every mutation of a job's
//! status/timestamps goes through the guarded transitions here, which
//! keep the state machine monotonic and set `ended_at` exactly once.

use chrono::{DateTime, Utc};
use nbexec_core::domain::job::{Job, JobStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::log_buffer::LogBuffer;

/// Per-job handles shared with the monitor and the hybrid wait path
pub struct JobHandles {
    pub logs: Arc<LogBuffer>,
    pub cancel: Arc<Notify>,
    pub status_rx: watch::Receiver<JobStatus>,
}

struct JobEntry {
    job: Job,
    logs: Arc<LogBuffer>,
    /// Signalled by cancel(); consumed by the job's monitor
    cancel: Arc<Notify>,
    /// Broadcasts every status transition to waiters and pollers
    status_tx: watch::Sender<JobStatus>,
}

/// Concurrent map of all known jobs
///
/// Cloneable handle; all clones share the same map.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admission-checked insert
    ///
    /// Counts Pending/Running jobs and inserts the new record in one lock
    /// scope, so concurrent submissions cannot overshoot the ceiling.
    /// Returns the active count on rejection.
    pub fn admit(
        &self,
        job: Job,
        log_capacity: usize,
        max_active: usize,
    ) -> Result<JobHandles, usize> {
        let mut map = self.inner.lock().unwrap();

        let active = map
            .values()
            .filter(|entry| entry.job.status.is_active())
            .count();
        if active >= max_active {
            return Err(active);
        }

        let logs = Arc::new(LogBuffer::new(log_capacity));
        let cancel = Arc::new(Notify::new());
        let (status_tx, status_rx) = watch::channel(job.status);

        let handles = JobHandles {
            logs: Arc::clone(&logs),
            cancel: Arc::clone(&cancel),
            status_rx,
        };

        map.insert(
            job.id,
            JobEntry {
                job,
                logs,
                cancel,
                status_tx,
            },
        );

        Ok(handles)
    }

    /// Snapshot of one job
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let map = self.inner.lock().unwrap();
        map.get(&id).map(|entry| entry.job.clone())
    }

    /// The job's log buffer
    pub fn logs(&self, id: Uuid) -> Option<Arc<LogBuffer>> {
        let map = self.inner.lock().unwrap();
        map.get(&id).map(|entry| Arc::clone(&entry.logs))
    }

    /// The job's cancel signal
    pub fn cancel_handle(&self, id: Uuid) -> Option<Arc<Notify>> {
        let map = self.inner.lock().unwrap();
        map.get(&id).map(|entry| Arc::clone(&entry.cancel))
    }

    /// A receiver observing the job's status transitions
    pub fn watch_status(&self, id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        let map = self.inner.lock().unwrap();
        map.get(&id).map(|entry| entry.status_tx.subscribe())
    }

    /// Pending -> Running transition, performed by the monitor at launch
    ///
    /// Returns false if the job is unknown or no longer Pending (a cancel
    /// can win the race), in which case the caller must not launch.
    pub fn mark_running(&self, id: Uuid) -> bool {
        let mut map = self.inner.lock().unwrap();
        let Some(entry) = map.get_mut(&id) else {
            return false;
        };
        if entry.job.status != JobStatus::Pending {
            debug!(
                "Job {} not started: status is already {}",
                id, entry.job.status
            );
            return false;
        }
        entry.job.status = JobStatus::Running;
        entry.job.started_at = Some(Utc::now());
        let _ = entry.status_tx.send(JobStatus::Running);
        true
    }

    /// The unique terminal transition
    ///
    /// Sets status, `ended_at`, return code, and error message in one
    /// step. A second completion attempt is ignored so the state machine
    /// never regresses.
    pub fn complete(
        &self,
        id: Uuid,
        status: JobStatus,
        return_code: Option<i32>,
        error_message: Option<String>,
    ) -> bool {
        debug_assert!(status.is_terminal());

        let mut map = self.inner.lock().unwrap();
        let Some(entry) = map.get_mut(&id) else {
            warn!("Completion for unknown job {}", id);
            return false;
        };
        if entry.job.status.is_terminal() {
            debug!(
                "Ignoring completion of job {}: already {}",
                id, entry.job.status
            );
            return false;
        }
        entry.job.status = status;
        entry.job.ended_at = Some(Utc::now());
        entry.job.return_code = return_code;
        entry.job.error_message = error_message;
        let _ = entry.status_tx.send(status);
        true
    }

    /// Jobs currently counting against the concurrency ceiling
    pub fn active_count(&self) -> usize {
        let map = self.inner.lock().unwrap();
        map.values()
            .filter(|entry| entry.job.status.is_active())
            .count()
    }

    /// Snapshots of all known jobs
    pub fn list(&self) -> Vec<Job> {
        let map = self.inner.lock().unwrap();
        map.values().map(|entry| entry.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Removes terminal jobs that ended before `cutoff`
    ///
    /// Active jobs are never removed regardless of age. Returns the
    /// number of jobs removed.
    pub fn remove_terminal_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut map = self.inner.lock().unwrap();
        let before = map.len();
        map.retain(|_, entry| {
            let expired = entry.job.status.is_terminal()
                && entry.job.ended_at.is_some_and(|ended| ended < cutoff);
            !expired
        });
        before - map.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
