//! Stage handlers
//!
//! The executor does not know what a step does. It hands a
//! [`StageRequest`] to a [`StageHandler`] and gets back a
//! [`StageOutcome`] with a quality score for the gate.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::state::StageOutcome;
use crate::{Error, Result};

/// Everything a handler needs to run one step
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Workflow instance id
    pub workflow_id: String,
    /// Profile name
    pub profile_name: String,
    /// Task description
    pub description: String,
    /// Step name
    pub step_name: String,
    /// Step index in the profile
    pub step_index: usize,
    /// 1 on the first run of this step, +1 per loopback through it
    pub attempt: u32,
    /// Stage command, if the step configures one
    pub command: Option<String>,
    /// Artifacts from earlier steps, oldest first
    pub context: Vec<String>,
}

/// Runs the content of a pipeline step
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Execute the step and score what it produced
    async fn run(&self, request: &StageRequest) -> Result<StageOutcome>;
}

/// Runs a step's `command` through `sh -c`.
///
/// The last `score: <f>` line on stdout is the score and the last
/// `artifact: <ref>` line the artifact. Without a score line, exit 0 scores
/// 1.0 and anything else 0.0. Steps with no command pass straight through.
#[derive(Debug, Clone, Default)]
pub struct CommandStageHandler {
    working_dir: Option<PathBuf>,
}

impl CommandStageHandler {
    /// Create a handler running in the current directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands in a specific directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait]
impl StageHandler for CommandStageHandler {
    async fn run(&self, request: &StageRequest) -> Result<StageOutcome> {
        let default_ref = format!("{}#{}", request.step_name, request.attempt);

        let Some(command) = request.command.as_deref() else {
            debug!("Step {} has no command, passing through", request.step_name);
            return Ok(StageOutcome::new(default_ref, 1.0));
        };

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command])
            .env("STAGEFLOW_WORKFLOW_ID", &request.workflow_id)
            .env("STAGEFLOW_WORKFLOW_TYPE", &request.profile_name)
            .env("STAGEFLOW_STEP", &request.step_name)
            .env("STAGEFLOW_ATTEMPT", request.attempt.to_string())
            .env("STAGEFLOW_PROMPT", &request.description)
            .env("STAGEFLOW_CONTEXT", request.context.join("\n"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| {
            Error::Command(format!("Failed to run step {}: {}", request.step_name, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let score = parse_field(&stdout, "score")
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(if output.status.success() { 1.0 } else { 0.0 });
        let artifact = parse_field(&stdout, "artifact")
            .map(str::to_string)
            .unwrap_or(default_ref);

        debug!(
            step = %request.step_name,
            exit = ?output.status.code(),
            score,
            "stage command finished"
        );

        Ok(StageOutcome::new(artifact, score))
    }
}

/// Value of the last `<key>: <value>` line
fn parse_field<'a>(stdout: &'a str, key: &str) -> Option<&'a str> {
    stdout
        .lines()
        .rev()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}
