//! Engine process launcher
//!
//! Starts the external execution engine for one job and wires its output
//! streams into the job's log buffer. The engine is a black box invoked
//! as `program <input> <output> [-k kernel] [-p key value]...`; it writes
//! progress to its standard streams and produces the output artifact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nbexec_core::domain::log::LogStream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::service::log_buffer::LogBuffer;

/// Everything the engine needs for one invocation
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub job_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub parameters: HashMap<String, serde_json::Value>,
    pub kernel_name: Option<String>,
}

/// A launched engine process
///
/// The child handle is owned exclusively by the job's monitor. The reader
/// tasks drain stdout/stderr into the log buffer as lines arrive and
/// finish on their own once the pipes close.
pub struct EngineHandle {
    pub child: Child,
    pub readers: Vec<JoinHandle<()>>,
}

/// Seam for starting the engine; swapped out in tests
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Starts the engine process for `spec`, streaming output into `logs`
    async fn launch(&self, spec: &LaunchSpec, logs: Arc<LogBuffer>) -> Result<EngineHandle>;
}

/// Launches the engine configured in [`Config`] as a child process
pub struct ProcessLauncher {
    config: Config,
}

impl ProcessLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Builds the engine argument list for a launch spec
    ///
    /// Parameters are passed as repeated `-p key value`, sorted by key so
    /// the invocation is deterministic. String values are passed raw;
    /// anything else is rendered as JSON text.
    fn build_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            spec.input_path.to_string_lossy().into_owned(),
            spec.output_path.to_string_lossy().into_owned(),
        ];

        if let Some(kernel) = spec
            .kernel_name
            .as_deref()
            .or(self.config.kernel_name.as_deref())
        {
            args.push("-k".to_string());
            args.push(kernel.to_string());
        }

        let mut params: Vec<_> = spec.parameters.iter().collect();
        params.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in params {
            args.push("-p".to_string());
            args.push(key.clone());
            args.push(render_parameter(value));
        }

        args
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec, logs: Arc<LogBuffer>) -> Result<EngineHandle> {
        let args = self.build_args(spec);

        debug!(
            "Launching engine for job {}: {} {:?}",
            spec.job_id, self.config.engine_program, args
        );

        let mut command = Command::new(&self.config.engine_program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so terminate/kill reaches engine descendants
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().with_context(|| {
            format!(
                "Failed to start engine '{}' for job {}",
                self.config.engine_program, spec.job_id
            )
        })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(
                stdout,
                LogStream::Stdout,
                Arc::clone(&logs),
                spec.job_id,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(
                stderr,
                LogStream::Stderr,
                Arc::clone(&logs),
                spec.job_id,
            ));
        }

        Ok(EngineHandle { child, readers })
    }
}

/// Drains one output stream into the log buffer, line by line
///
/// Read errors degrade the log view but never fail the job: the reader
/// logs the error and stops.
fn spawn_line_reader<R>(
    reader: R,
    stream: LogStream,
    logs: Arc<LogBuffer>,
    job_id: Uuid,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => logs.push(stream, line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Log stream read error for job {}: {}", job_id, e);
                    break;
                }
            }
        }
    })
}

fn render_parameter(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_params(params: &[(&str, serde_json::Value)]) -> LaunchSpec {
        LaunchSpec {
            job_id: Uuid::new_v4(),
            input_path: PathBuf::from("/tmp/in.ipynb"),
            output_path: PathBuf::from("/tmp/out.ipynb"),
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            kernel_name: None,
        }
    }

    #[test]
    fn test_build_args_paths_first() {
        let launcher = ProcessLauncher::new(Config::default());
        let args = launcher.build_args(&spec_with_params(&[]));
        assert_eq!(args, vec!["/tmp/in.ipynb", "/tmp/out.ipynb"]);
    }

    #[test]
    fn test_build_args_kernel_and_sorted_parameters() {
        let launcher = ProcessLauncher::new(Config::default().with_kernel("python3".to_string()));
        let args = launcher.build_args(&spec_with_params(&[
            ("beta", serde_json::json!(2)),
            ("alpha", serde_json::json!("one")),
        ]));
        assert_eq!(
            args,
            vec![
                "/tmp/in.ipynb",
                "/tmp/out.ipynb",
                "-k",
                "python3",
                "-p",
                "alpha",
                "one",
                "-p",
                "beta",
                "2",
            ]
        );
    }

    #[test]
    fn test_spec_kernel_overrides_config_kernel() {
        let launcher = ProcessLauncher::new(Config::default().with_kernel("python3".to_string()));
        let mut spec = spec_with_params(&[]);
        spec.kernel_name = Some("ir".to_string());
        let args = launcher.build_args(&spec);
        assert_eq!(args[2..4], ["-k".to_string(), "ir".to_string()]);
    }

    #[test]
    fn test_render_parameter_values() {
        assert_eq!(render_parameter(&serde_json::json!("plain")), "plain");
        assert_eq!(render_parameter(&serde_json::json!(3.5)), "3.5");
        assert_eq!(render_parameter(&serde_json::json!(true)), "true");
        assert_eq!(
            render_parameter(&serde_json::json!({"a": 1})),
            "{\"a\":1}"
        );
    }

    #[tokio::test]
    async fn test_launch_streams_output_to_buffer() {
        let config = Config::new("/bin/echo".to_string());
        let launcher = ProcessLauncher::new(config);
        let logs = Arc::new(LogBuffer::new(100));

        let mut handle = launcher
            .launch(&spec_with_params(&[]), Arc::clone(&logs))
            .await
            .unwrap();

        handle.child.wait().await.unwrap();
        for reader in handle.readers {
            reader.await.unwrap();
        }

        let (lines, _) = logs.tail(0);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].message.contains("/tmp/in.ipynb"));
    }

    #[tokio::test]
    async fn test_launch_failure_for_missing_engine() {
        let config = Config::new("/nonexistent/engine".to_string());
        let launcher = ProcessLauncher::new(config);
        let logs = Arc::new(LogBuffer::new(100));

        let result = launcher.launch(&spec_with_params(&[]), logs).await;
        assert!(result.is_err());
    }
}
