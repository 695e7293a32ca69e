//! Runner configuration
//!
//! Defines all configurable parameters for the job manager including the
//! engine command, concurrency ceiling, termination grace period, and log
//! buffer capacity.

use std::time::Duration;

/// Job manager configuration
///
/// All limits and intervals are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, small vs large hosts).
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine executable invoked for each job (e.g., "papermill")
    pub engine_program: String,

    /// Kernel passed to the engine with `-k`, when set
    pub kernel_name: Option<String>,

    /// Max jobs allowed in Pending/Running at once; submissions beyond
    /// this are rejected outright rather than queued
    pub max_concurrent_jobs: usize,

    /// How long to wait between graceful terminate and force kill
    pub grace_period: Duration,

    /// Maximum log lines retained per job before the oldest are dropped
    pub log_capacity: usize,

    /// Upper bound clamped onto estimated timeouts, when set
    pub timeout_cap: Option<Duration>,
}

impl Config {
    /// Creates a new configuration with defaults for the given engine
    pub fn new(engine_program: String) -> Self {
        Self {
            engine_program,
            kernel_name: None,
            max_concurrent_jobs: 3,
            grace_period: Duration::from_secs(5),
            log_capacity: 10_000,
            timeout_cap: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - NBEXEC_ENGINE (required)
    /// - NBEXEC_KERNEL (optional)
    /// - NBEXEC_MAX_CONCURRENT_JOBS (optional, default: 3)
    /// - NBEXEC_GRACE_PERIOD_SECS (optional, default: 5)
    /// - NBEXEC_LOG_CAPACITY (optional, default: 10000)
    /// - NBEXEC_TIMEOUT_CAP_SECS (optional, default: unset)
    pub fn from_env() -> anyhow::Result<Self> {
        let engine_program = std::env::var("NBEXEC_ENGINE")
            .map_err(|_| anyhow::anyhow!("NBEXEC_ENGINE environment variable not set"))?;

        let kernel_name = std::env::var("NBEXEC_KERNEL").ok();

        let max_concurrent_jobs = std::env::var("NBEXEC_MAX_CONCURRENT_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(3);

        let grace_period = std::env::var("NBEXEC_GRACE_PERIOD_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        let log_capacity = std::env::var("NBEXEC_LOG_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(10_000);

        let timeout_cap = std::env::var("NBEXEC_TIMEOUT_CAP_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        Ok(Self {
            engine_program,
            kernel_name,
            max_concurrent_jobs,
            grace_period,
            log_capacity,
            timeout_cap,
        })
    }

    /// Sets the kernel selector passed to the engine
    pub fn with_kernel(mut self, kernel: String) -> Self {
        self.kernel_name = Some(kernel);
        self
    }

    /// Sets the concurrency ceiling
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Clamps estimated timeouts to at most `cap`
    pub fn with_timeout_cap(mut self, cap: Duration) -> Self {
        self.timeout_cap = Some(cap);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine_program.is_empty() {
            anyhow::bail!("engine_program cannot be empty");
        }

        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.log_capacity == 0 {
            anyhow::bail!("log_capacity must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("papermill".to_string())
    }
}
