//! Hook dispatch
//!
//! Runs the hooks registered for an event, one after another, each as a
//! `sh -c` subprocess with a documented environment, captured output and a
//! hard timeout. A failing hook either becomes a warning or, when it is
//! `fail_on_error`, stops the dispatch and fails the triggering operation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::config::{HookDefinition, HookEvent, HooksConfig};
use crate::{Error, Result};

/// Environment variable names exported to every hook
pub mod env {
    pub const FILE_PATH: &str = "STAGEFLOW_FILE_PATH";
    pub const FILE_PATHS: &str = "STAGEFLOW_FILE_PATHS";
    pub const TOOL_NAME: &str = "STAGEFLOW_TOOL_NAME";
    pub const PROMPT: &str = "STAGEFLOW_PROMPT";
    pub const WORKFLOW_TYPE: &str = "STAGEFLOW_WORKFLOW_TYPE";
    pub const WORKFLOW_ID: &str = "STAGEFLOW_WORKFLOW_ID";
    pub const WORKFLOW_STATUS: &str = "STAGEFLOW_WORKFLOW_STATUS";
    pub const SESSION_ID: &str = "STAGEFLOW_SESSION_ID";
    pub const PROJECT_ROOT: &str = "STAGEFLOW_PROJECT_ROOT";
    pub const TRACKER_REF: &str = "STAGEFLOW_TRACKER_REF";
    pub const HOOK_OUTPUT: &str = "STAGEFLOW_HOOK_OUTPUT";
}

/// What a hook gets to see about the operation that triggered it
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Affected files (first one is exported as the primary file path)
    pub files: Vec<String>,
    /// Tool name, for tool events
    pub tool_name: Option<String>,
    /// Submitted prompt text
    pub prompt: Option<String>,
    /// Workflow profile name
    pub workflow_type: Option<String>,
    /// Workflow instance id
    pub workflow_id: Option<String>,
    /// Final workflow status (completion events)
    pub workflow_status: Option<String>,
    /// Session id
    pub session_id: Option<String>,
    /// Project root (defaults to the current directory)
    pub project_root: Option<PathBuf>,
    /// External tracker reference
    pub tracker_ref: Option<String>,
}

impl HookContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an affected file
    pub fn with_file(mut self, path: &str) -> Self {
        self.files.push(path.to_string());
        self
    }

    /// Set the tool name
    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool_name = Some(tool.to_string());
        self
    }

    /// Set the submitted prompt
    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    /// Set workflow type and id
    pub fn with_workflow(mut self, workflow_type: &str, workflow_id: &str) -> Self {
        self.workflow_type = Some(workflow_type.to_string());
        self.workflow_id = Some(workflow_id.to_string());
        self
    }

    /// Set the workflow status
    pub fn with_status(mut self, status: &str) -> Self {
        self.workflow_status = Some(status.to_string());
        self
    }

    /// Set the session id
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Set the project root
    pub fn with_project_root(mut self, root: PathBuf) -> Self {
        self.project_root = Some(root);
        self
    }

    /// Set the tracker reference
    pub fn with_tracker_ref(mut self, tracker_ref: &str) -> Self {
        self.tracker_ref = Some(tracker_ref.to_string());
        self
    }

    fn project_root(&self) -> PathBuf {
        self.project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Environment exported to hook processes
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![(
            env::PROJECT_ROOT,
            self.project_root().to_string_lossy().to_string(),
        )];

        if let Some(first) = self.files.first() {
            vars.push((env::FILE_PATH, first.clone()));
            vars.push((env::FILE_PATHS, self.files.join("\n")));
        }

        let optional = [
            (env::TOOL_NAME, &self.tool_name),
            (env::PROMPT, &self.prompt),
            (env::WORKFLOW_TYPE, &self.workflow_type),
            (env::WORKFLOW_ID, &self.workflow_id),
            (env::WORKFLOW_STATUS, &self.workflow_status),
            (env::SESSION_ID, &self.session_id),
            (env::TRACKER_REF, &self.tracker_ref),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                vars.push((name, value.clone()));
            }
        }

        vars
    }

    /// Substitute `{{placeholder}}`s in a command template, shell-quoted.
    ///
    /// Single pass: substituted values are never scanned for placeholders
    /// again. Unknown placeholders are left as written.
    pub fn render(&self, template: &str) -> String {
        let quote = |v: Option<&str>| shell_words::quote(v.unwrap_or("")).into_owned();

        PLACEHOLDER
            .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
                "files" => self
                    .files
                    .iter()
                    .map(|f| shell_words::quote(f).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
                "file" => quote(self.files.first().map(|s| s.as_str())),
                "tool" => quote(self.tool_name.as_deref()),
                "prompt" => quote(self.prompt.as_deref()),
                "workflow_type" => quote(self.workflow_type.as_deref()),
                "workflow_id" => quote(self.workflow_id.as_deref()),
                "workflow_status" => quote(self.workflow_status.as_deref()),
                "session_id" => quote(self.session_id.as_deref()),
                "project_root" => quote(Some(&self.project_root().to_string_lossy())),
                "tracker_ref" => quote(self.tracker_ref.as_deref()),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern"));

/// How a single hook run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum HookStatus {
    /// Exit code 0
    Succeeded,
    /// Non-zero exit, or the process could not be started
    Failed { exit_code: Option<i32> },
    /// Killed after exceeding its timeout
    TimedOut,
}

/// Result of running one hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOutcome {
    /// Hook name
    pub hook: String,
    /// Event that triggered it
    pub event: HookEvent,
    /// How it ended
    pub status: HookStatus,
    /// Captured stdout, handed back only for prompt-submission events
    pub output: Option<String>,
    /// Captured stderr
    pub stderr: String,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl HookOutcome {
    /// Whether the hook exited cleanly
    pub fn succeeded(&self) -> bool {
        self.status == HookStatus::Succeeded
    }

    /// Warning line for a failed, non-fatal hook
    pub fn warning(&self) -> Option<String> {
        match &self.status {
            HookStatus::Succeeded => None,
            HookStatus::Failed { exit_code } => Some(format!(
                "{} hook '{}' failed (exit {}): {}",
                self.event,
                self.hook,
                exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
                self.stderr.trim()
            )),
            HookStatus::TimedOut => Some(format!(
                "{} hook '{}' timed out",
                self.event, self.hook
            )),
        }
    }
}

/// Merge prompt-submission outputs into one context block
pub fn merged_output(outcomes: &[HookOutcome]) -> Option<String> {
    let parts: Vec<&str> = outcomes
        .iter()
        .filter_map(|o| o.output.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// A hook with its matcher and file patterns compiled
struct CompiledHook {
    definition: HookDefinition,
    matcher: Option<Regex>,
    patterns: Vec<glob::Pattern>,
}

impl CompiledHook {
    fn compile(definition: HookDefinition) -> Result<Self> {
        let matcher = match definition.matcher.as_deref().map(str::trim) {
            None | Some("") | Some("*") => None,
            Some(pattern) => Some(Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                Error::Config(format!(
                    "Invalid matcher for hook '{}': {}",
                    definition.name, e
                ))
            })?),
        };

        let patterns = definition
            .file_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    Error::Config(format!(
                        "Invalid file pattern '{}' for hook '{}': {}",
                        p, definition.name, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            definition,
            matcher,
            patterns,
        })
    }

    fn matches(&self, context: &HookContext) -> bool {
        // Matchers only apply when there is a tool to match against
        if let (Some(matcher), Some(tool)) = (&self.matcher, &context.tool_name) {
            if !matcher.is_match(tool) {
                return false;
            }
        }

        if self.patterns.is_empty() {
            return true;
        }

        context
            .files
            .iter()
            .any(|f| self.patterns.iter().any(|p| p.matches(f)))
    }
}

/// Runs configured hooks for lifecycle events
pub struct HookDispatcher {
    hooks: BTreeMap<HookEvent, Vec<CompiledHook>>,
}

impl HookDispatcher {
    /// Build a dispatcher from configuration, keeping only allowed hooks
    pub fn new(config: &HooksConfig) -> Result<Self> {
        let mut hooks: BTreeMap<HookEvent, Vec<CompiledHook>> = BTreeMap::new();

        for (event, definitions) in &config.events {
            for definition in definitions {
                if !config.is_allowed(definition) {
                    debug!("Hook {} for {} is not enabled, ignoring", definition.name, event);
                    continue;
                }
                hooks
                    .entry(*event)
                    .or_default()
                    .push(CompiledHook::compile(definition.clone())?);
            }
        }

        Ok(Self { hooks })
    }

    /// A dispatcher with no hooks
    pub fn empty() -> Self {
        Self {
            hooks: BTreeMap::new(),
        }
    }

    /// Active hooks for an event, in execution order
    pub fn active(&self, event: HookEvent) -> Vec<&HookDefinition> {
        self.hooks
            .get(&event)
            .map(|hooks| hooks.iter().map(|h| &h.definition).collect())
            .unwrap_or_default()
    }

    /// Run every matching hook for `event` in order.
    ///
    /// Returns the outcomes of all hooks that ran. A failing hook marked
    /// `fail_on_error` stops the dispatch and is returned as an error.
    pub async fn dispatch(
        &self,
        event: HookEvent,
        context: &HookContext,
    ) -> Result<Vec<HookOutcome>> {
        let Some(hooks) = self.hooks.get(&event) else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        let mut previous_output: Option<String> = None;

        for hook in hooks.iter().filter(|h| h.matches(context)) {
            let name = &hook.definition.name;
            debug!("Running {} hook: {}", event, name);

            let (outcome, stdout) = self
                .run_hook(event, hook, context, previous_output.as_deref())
                .await;

            if outcome.succeeded() {
                if !stdout.trim().is_empty() && !event.returns_output() {
                    info!(hook = %name, "{}", stdout.trim());
                }
                previous_output = Some(stdout);
            } else if hook.definition.fail_on_error {
                error!("{} hook '{}' failed, aborting dispatch", event, name);
                return Err(match outcome.status {
                    HookStatus::TimedOut => Error::HookTimeout {
                        hook: name.clone(),
                        seconds: hook.definition.effective_timeout().as_secs(),
                    },
                    _ => Error::HookFailed {
                        hook: name.clone(),
                        reason: outcome
                            .warning()
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    },
                });
            } else if let Some(warning) = outcome.warning() {
                warn!("{}", warning);
            }

            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Spawn one hook and wait for it under its timeout
    async fn run_hook(
        &self,
        event: HookEvent,
        hook: &CompiledHook,
        context: &HookContext,
        previous_output: Option<&str>,
    ) -> (HookOutcome, String) {
        let definition = &hook.definition;
        let command = context.render(&definition.command);
        let timeout = definition.effective_timeout();
        let started = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.args(["-c", &command])
            .envs(context.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(output) = previous_output {
            cmd.env(env::HOOK_OUTPUT, output);
        }
        if let Some(root) = context.project_root.as_ref().filter(|r| r.is_dir()) {
            cmd.current_dir(root);
        }

        let finish = |status: HookStatus, stdout: String, stderr: String| {
            let outcome = HookOutcome {
                hook: definition.name.clone(),
                event,
                status,
                output: event.returns_output().then(|| stdout.clone()),
                stderr,
                duration_ms: elapsed_ms(started.elapsed()),
            };
            (outcome, stdout)
        };

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return finish(
                    HookStatus::Failed { exit_code: None },
                    String::new(),
                    format!("failed to spawn: {}", e),
                );
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let status = if output.status.success() {
                    HookStatus::Succeeded
                } else {
                    HookStatus::Failed {
                        exit_code: output.status.code(),
                    }
                };
                finish(status, stdout, stderr)
            }
            Ok(Err(e)) => finish(
                HookStatus::Failed { exit_code: None },
                String::new(),
                e.to_string(),
            ),
            Err(_) => finish(HookStatus::TimedOut, String::new(), String::new()),
        }
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(event: HookEvent, hooks: Vec<HookDefinition>) -> HookDispatcher {
        let mut config = HooksConfig::default();
        for hook in hooks {
            config.add(event, hook);
        }
        HookDispatcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_non_fatal_failure_continues() {
        let d = dispatcher(
            HookEvent::StepStart,
            vec![
                HookDefinition::new("broken", "exit 3"),
                HookDefinition::new("after", "echo ran"),
            ],
        );

        let outcomes = d
            .dispatch(HookEvent::StepStart, &HookContext::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[0].status,
            HookStatus::Failed { exit_code: Some(3) }
        );
        assert!(outcomes[0].warning().is_some());
        assert!(outcomes[1].succeeded());
        // stdout is only logged for non-prompt events
        assert!(outcomes[1].output.is_none());
    }

    #[tokio::test]
    async fn test_fail_on_error_aborts_dispatch() {
        let marker = tempfile::tempdir().unwrap();
        let marker_file = marker.path().join("ran");
        let d = dispatcher(
            HookEvent::WorkflowStart,
            vec![
                HookDefinition::new("gate", "exit 1").failing_on_error(),
                HookDefinition::new("after", &format!("touch {}", marker_file.display())),
            ],
        );

        let result = d
            .dispatch(HookEvent::WorkflowStart, &HookContext::new())
            .await;

        assert!(matches!(result, Err(Error::HookFailed { ref hook, .. }) if hook == "gate"));
        assert!(!marker_file.exists(), "later hooks must be skipped");
    }

    #[tokio::test]
    async fn test_timeout_kills_hook() {
        let d = dispatcher(
            HookEvent::PostToolUse,
            vec![HookDefinition::new("slow", "sleep 5").with_timeout(Duration::from_millis(200))],
        );

        let started = Instant::now();
        let outcomes = d
            .dispatch(HookEvent::PostToolUse, &HookContext::new())
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, HookStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_with_fail_on_error() {
        let d = dispatcher(
            HookEvent::PostToolUse,
            vec![HookDefinition::new("slow", "sleep 5")
                .with_timeout(Duration::from_millis(200))
                .failing_on_error()],
        );

        let result = d
            .dispatch(HookEvent::PostToolUse, &HookContext::new())
            .await;
        assert!(matches!(result, Err(Error::HookTimeout { .. })));
    }

    #[tokio::test]
    async fn test_prompt_output_returned_and_chained() {
        let d = dispatcher(
            HookEvent::UserPromptSubmit,
            vec![
                HookDefinition::new("first", "echo \"prompt was: $STAGEFLOW_PROMPT\""),
                HookDefinition::new("second", "echo \"saw: $STAGEFLOW_HOOK_OUTPUT\""),
            ],
        );

        let ctx = HookContext::new().with_prompt("fix the parser");
        let outcomes = d.dispatch(HookEvent::UserPromptSubmit, &ctx).await.unwrap();

        assert_eq!(
            outcomes[0].output.as_deref().map(str::trim),
            Some("prompt was: fix the parser")
        );
        assert_eq!(
            outcomes[1].output.as_deref().map(str::trim),
            Some("saw: prompt was: fix the parser")
        );

        let merged = merged_output(&outcomes).unwrap();
        assert!(merged.starts_with("prompt was: fix the parser"));
    }

    #[tokio::test]
    async fn test_matcher_and_file_patterns() {
        let d = dispatcher(
            HookEvent::PostToolUse,
            vec![HookDefinition::new("rust-only", "true")
                .with_matcher("Edit|Write")
                .with_file_pattern("*.rs")],
        );

        let hit = HookContext::new().with_tool("Edit").with_file("src/main.rs");
        let wrong_tool = HookContext::new().with_tool("NotebookEdit").with_file("src/main.rs");
        let wrong_file = HookContext::new().with_tool("Write").with_file("README.md");

        assert_eq!(d.dispatch(HookEvent::PostToolUse, &hit).await.unwrap().len(), 1);
        assert!(d.dispatch(HookEvent::PostToolUse, &wrong_tool).await.unwrap().is_empty());
        assert!(d.dispatch(HookEvent::PostToolUse, &wrong_file).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_and_denied_hooks_never_run() {
        let mut config = HooksConfig::default();
        let mut disabled = HookDefinition::new("off", "exit 1").failing_on_error();
        disabled.enabled = false;
        config.add(HookEvent::SessionStart, disabled);
        config.add(
            HookEvent::SessionStart,
            HookDefinition::new("denied", "exit 1").failing_on_error(),
        );
        config.deny.push("denied".to_string());

        let d = HookDispatcher::new(&config).unwrap();
        assert!(d.active(HookEvent::SessionStart).is_empty());

        let outcomes = d
            .dispatch(HookEvent::SessionStart, &HookContext::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_environment_exported() {
        let d = dispatcher(
            HookEvent::UserPromptSubmit,
            vec![HookDefinition::new(
                "env",
                "echo \"$STAGEFLOW_WORKFLOW_TYPE/$STAGEFLOW_WORKFLOW_ID/$STAGEFLOW_SESSION_ID/$STAGEFLOW_FILE_PATH\"",
            )],
        );

        let ctx = HookContext::new()
            .with_workflow("bug-fix", "wf-1")
            .with_session("s-1")
            .with_file("a.rs")
            .with_file("b.rs");
        let outcomes = d.dispatch(HookEvent::UserPromptSubmit, &ctx).await.unwrap();

        assert_eq!(
            outcomes[0].output.as_deref().map(str::trim),
            Some("bug-fix/wf-1/s-1/a.rs")
        );
    }

    #[test]
    fn test_render_quotes_placeholders() {
        let ctx = HookContext::new()
            .with_file("my file.rs")
            .with_file("b.rs")
            .with_prompt("it's; rm -rf /");

        assert_eq!(ctx.render("fmt {{files}}"), "fmt 'my file.rs' b.rs");
        let rendered = ctx.render("echo {{prompt}}");
        assert_eq!(
            shell_words::split(&rendered).unwrap(),
            vec!["echo", "it's; rm -rf /"]
        );
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let ctx = HookContext::new()
            .with_file("my {{prompt}}")
            .with_tool("{{files}}")
            .with_prompt("x; touch pwned;");

        let rendered = ctx.render("echo {{files}} {{tool}} {{unknown}}");
        assert_eq!(
            shell_words::split(&rendered).unwrap(),
            vec!["echo", "my {{prompt}}", "{{files}}", "{{unknown}}"]
        );
    }

    #[tokio::test]
    async fn test_placeholder_in_file_name_stays_data() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pwned");
        let d = dispatcher(
            HookEvent::PostToolUse,
            vec![HookDefinition::new("echo", "echo {{files}}")],
        );
        let ctx = HookContext::new()
            .with_file("my {{prompt}}")
            .with_prompt(&format!("x; touch {};", marker.display()));

        let outcomes = d.dispatch(HookEvent::PostToolUse, &ctx).await.unwrap();

        assert!(outcomes[0].succeeded());
        assert!(!marker.exists());
    }

    #[test]
    fn test_invalid_matcher_rejected() {
        let mut config = HooksConfig::default();
        config.add(
            HookEvent::PreToolUse,
            HookDefinition::new("bad", "true").with_matcher("(unclosed"),
        );
        assert!(matches!(HookDispatcher::new(&config), Err(Error::Config(_))));
    }
}
