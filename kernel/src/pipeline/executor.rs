//! External infrastructure executor.
//!
//! The executor is opaque to the pipeline: it receives a working directory
//! holding the rendered configuration and reports a plan artifact plus a
//! change summary, or the resources present after an apply. Output lines
//! are streamed through a [`LogSink`] while the tool runs.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::report;
use crate::domain::{AppliedResource, ChangeSummary};

/// Receives executor output, one line per message.
pub type LogSink = mpsc::Sender<String>;

/// File name of the saved plan inside a working directory.
pub const PLAN_FILE: &str = "plan.tfplan";

/// Errors raised by an [`Executor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The tool could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Source error.
        #[source]
        source: io::Error,
    },
    /// The tool exited unsuccessfully.
    #[error("'{step}' exited with status {status}")]
    Failed {
        /// Sub-command that failed.
        step: String,
        /// Exit code, or -1 when killed by a signal.
        status: i32,
    },
    /// The tool's output could not be interpreted.
    #[error("unexpected executor output: {0}")]
    Output(String),
    /// Working-directory I/O failed.
    #[error("executor I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Result of a successful plan.
#[derive(Debug, Clone)]
pub struct PlanOutput {
    /// Saved plan, replayed verbatim by the apply.
    pub artifact: Bytes,
    /// Change counts.
    pub summary: ChangeSummary,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutput {
    /// Resources present after the apply.
    pub resources: Vec<AppliedResource>,
}

/// Drives the infrastructure tool.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Plans the configuration in `workdir`.
    async fn plan(&self, workdir: &Path, log: LogSink) -> Result<PlanOutput, ExecutorError>;

    /// Applies `artifact`, previously produced by [`plan`](Self::plan) for
    /// the same configuration.
    async fn apply(
        &self,
        workdir: &Path,
        artifact: Bytes,
        log: LogSink,
    ) -> Result<ApplyOutput, ExecutorError>;
}

const INIT: &[&str] = &["init", "-input=false", "-no-color"];
const PLAN: &[&str] = &["plan", "-input=false", "-no-color", "-out=plan.tfplan"];
const SHOW_PLAN: &[&str] = &["show", "-json", "-no-color", PLAN_FILE];
const APPLY: &[&str] = &["apply", "-input=false", "-no-color", PLAN_FILE];
const SHOW_STATE: &[&str] = &["show", "-json", "-no-color"];

/// [`Executor`] backed by the OpenTofu or Terraform CLI.
#[derive(Debug, Clone)]
pub struct TofuExecutor {
    binary: PathBuf,
}

impl TofuExecutor {
    /// Creates an executor invoking `binary` (e.g. `tofu` or `terraform`).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, workdir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(workdir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    /// Runs one sub-command, streaming stdout and stderr to `log`.
    /// Returns the captured lines.
    #[instrument(skip(self, workdir, log))]
    async fn stream(
        &self,
        workdir: &Path,
        args: &[&str],
        log: &LogSink,
    ) -> Result<Vec<String>, ExecutorError> {
        let mut child = self
            .command(workdir, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.program(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out_lines, err_lines) =
            tokio::join!(forward(stdout, log.clone()), forward(stderr, log.clone()));

        let status = child.wait().await?;
        debug!(%status, "Executor step finished");
        if !status.success() {
            return Err(ExecutorError::Failed {
                step: args.join(" "),
                status: status.code().unwrap_or(-1),
            });
        }
        let mut lines = out_lines?;
        lines.extend(err_lines?);
        Ok(lines)
    }

    /// Runs a `show -json` style sub-command and parses stdout.
    async fn capture_json(&self, workdir: &Path, args: &[&str]) -> Result<Value, ExecutorError> {
        let output = self
            .command(workdir, args)
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                program: self.program(),
                source,
            })?;
        if !output.status.success() {
            return Err(ExecutorError::Failed {
                step: args.join(" "),
                status: output.status.code().unwrap_or(-1),
            });
        }
        serde_json::from_slice(&output.stdout).map_err(|e| ExecutorError::Output(e.to_string()))
    }
}

async fn forward<R>(reader: Option<R>, log: LogSink) -> Result<Vec<String>, ExecutorError>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(reader) = reader else {
        return Ok(captured);
    };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        // A closed sink only means nobody is listening.
        let _ = log.send(line.clone()).await;
        captured.push(line);
    }
    Ok(captured)
}

#[async_trait]
impl Executor for TofuExecutor {
    async fn plan(&self, workdir: &Path, log: LogSink) -> Result<PlanOutput, ExecutorError> {
        self.stream(workdir, INIT, &log).await?;
        let lines = self.stream(workdir, PLAN, &log).await?;

        let summary = match self.capture_json(workdir, SHOW_PLAN).await {
            Ok(doc) => report::summarize_plan(&doc),
            Err(err) => {
                debug!(error = %err, "Falling back to plan output for summary");
                None
            }
        }
        .or_else(|| report::summary_from_log(lines.iter().map(String::as_str)))
        .ok_or_else(|| ExecutorError::Output("plan reported no change summary".into()))?;

        let artifact = tokio::fs::read(workdir.join(PLAN_FILE)).await?;
        Ok(PlanOutput {
            artifact: Bytes::from(artifact),
            summary,
        })
    }

    async fn apply(
        &self,
        workdir: &Path,
        artifact: Bytes,
        log: LogSink,
    ) -> Result<ApplyOutput, ExecutorError> {
        tokio::fs::write(workdir.join(PLAN_FILE), &artifact).await?;
        self.stream(workdir, INIT, &log).await?;
        self.stream(workdir, APPLY, &log).await?;

        let state = self.capture_json(workdir, SHOW_STATE).await?;
        Ok(ApplyOutput {
            resources: report::state_resources(&state),
        })
    }
}
