//! Hook configuration parsing and structures
//!
//! Hooks are declared per event, in the order they should run:
//!
//! ```toml
//! deny = ["legacy-lint"]
//!
//! [[PostToolUse]]
//! name = "fmt"
//! command = "cargo fmt -- {{files}}"
//! matcher = "Edit|Write"
//! file_patterns = ["*.rs"]
//! enabled = true
//! timeout = "10s"
//!
//! [[UserPromptSubmit]]
//! name = "context"
//! command = "scripts/prompt-context.sh"
//! enabled = true
//! fail_on_error = true
//! ```
//!
//! Nothing runs unless `enabled = true` is set on the hook itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Timeout applied when a hook does not set its own
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle points where hooks can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// A session was opened
    SessionStart,
    /// A session is closing
    SessionEnd,
    /// The user submitted a prompt; hook stdout flows back as context
    UserPromptSubmit,
    /// Before a tool runs
    PreToolUse,
    /// After a tool ran
    PostToolUse,
    /// A workflow is about to enter its first step
    WorkflowStart,
    /// A workflow reached Completed or Aborted
    WorkflowComplete,
    /// A pipeline step is about to run
    StepStart,
    /// A pipeline step passed its quality gate
    StepComplete,
}

impl HookEvent {
    /// All events, in lifecycle order
    pub const ALL: [HookEvent; 9] = [
        HookEvent::SessionStart,
        HookEvent::UserPromptSubmit,
        HookEvent::WorkflowStart,
        HookEvent::StepStart,
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::StepComplete,
        HookEvent::WorkflowComplete,
        HookEvent::SessionEnd,
    ];

    /// Get the name of this event
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::WorkflowStart => "WorkflowStart",
            HookEvent::WorkflowComplete => "WorkflowComplete",
            HookEvent::StepStart => "StepStart",
            HookEvent::StepComplete => "StepComplete",
        }
    }

    /// Whether captured stdout is handed back to the caller
    pub fn returns_output(&self) -> bool {
        matches!(self, HookEvent::UserPromptSubmit)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HookEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        HookEvent::ALL
            .iter()
            .find(|e| e.name().to_lowercase() == normalized)
            .copied()
            .ok_or_else(|| Error::Config(format!("Unknown hook event: {}", s)))
    }
}

/// One configured hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDefinition {
    /// Hook name (used in logs and the deny list)
    pub name: String,
    /// Shell command template; `{{placeholder}}` values are substituted quoted
    #[serde(alias = "command_template")]
    pub command: String,
    /// Regex the tool name must fully match ("*" or empty = any)
    #[serde(default)]
    pub matcher: Option<String>,
    /// Globs at least one affected file must match (empty = any)
    #[serde(default)]
    pub file_patterns: Vec<String>,
    /// Hooks are opt-in
    #[serde(default)]
    pub enabled: bool,
    /// Per-hook timeout (defaults to 30s)
    #[serde(default, with = "crate::config::humantime_serde")]
    pub timeout: Option<Duration>,
    /// Abort the triggering operation when this hook fails
    #[serde(default)]
    pub fail_on_error: bool,
}

impl HookDefinition {
    /// Create an enabled hook with default settings
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            matcher: None,
            file_patterns: Vec::new(),
            enabled: true,
            timeout: None,
            fail_on_error: false,
        }
    }

    /// Set the tool matcher
    pub fn with_matcher(mut self, matcher: &str) -> Self {
        self.matcher = Some(matcher.to_string());
        self
    }

    /// Add a file pattern
    pub fn with_file_pattern(mut self, pattern: &str) -> Self {
        self.file_patterns.push(pattern.to_string());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Make failures abort the triggering operation
    pub fn failing_on_error(mut self) -> Self {
        self.fail_on_error = true;
        self
    }

    /// Effective timeout
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT)
    }
}

/// Ordered hook lists keyed by event, plus a deny policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Hook names that never run, even when enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
    /// Hooks per event, in execution order
    #[serde(flatten)]
    pub events: BTreeMap<HookEvent, Vec<HookDefinition>>,
}

impl HooksConfig {
    /// Load hook configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read hooks config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse hook configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse hooks config: {}", e)))
    }

    /// Register a hook at the end of an event's list
    pub fn add(&mut self, event: HookEvent, hook: HookDefinition) {
        self.events.entry(event).or_default().push(hook);
    }

    /// Append another config's hooks after ours
    pub fn merge(&mut self, other: HooksConfig) {
        for name in other.deny {
            if !self.deny.contains(&name) {
                self.deny.push(name);
            }
        }
        for (event, hooks) in other.events {
            self.events.entry(event).or_default().extend(hooks);
        }
    }

    /// Hooks configured for an event
    pub fn hooks_for(&self, event: HookEvent) -> &[HookDefinition] {
        self.events.get(&event).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether a hook may run under the enable/deny policy
    pub fn is_allowed(&self, hook: &HookDefinition) -> bool {
        hook.enabled && !self.deny.iter().any(|d| d == &hook.name)
    }

    /// Total configured hooks
    pub fn total(&self) -> usize {
        self.events.values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hooks_config() {
        let content = r#"
deny = ["noisy"]

[[PostToolUse]]
name = "fmt"
command = "cargo fmt"
matcher = "Edit|Write"
file_patterns = ["*.rs"]
enabled = true
timeout = "10s"

[[PostToolUse]]
name = "noisy"
command = "echo hi"
enabled = true

[[SessionStart]]
name = "greet"
command_template = "echo start"
"#;
        let config = HooksConfig::parse(content).unwrap();
        assert_eq!(config.total(), 3);

        let post = config.hooks_for(HookEvent::PostToolUse);
        assert_eq!(post[0].name, "fmt");
        assert_eq!(post[1].name, "noisy");
        assert_eq!(post[0].effective_timeout(), Duration::from_secs(10));
        assert!(config.is_allowed(&post[0]));
        assert!(!config.is_allowed(&post[1]));

        let start = &config.hooks_for(HookEvent::SessionStart)[0];
        assert_eq!(start.command, "echo start");
        assert!(!start.enabled);
        assert_eq!(start.effective_timeout(), DEFAULT_HOOK_TIMEOUT);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let content = r#"
[[OnCoffeeBreak]]
name = "x"
command = "true"
"#;
        assert!(HooksConfig::parse(content).is_err());
    }

    #[test]
    fn test_event_from_str() {
        assert_eq!(
            "user_prompt_submit".parse::<HookEvent>().unwrap(),
            HookEvent::UserPromptSubmit
        );
        assert_eq!(
            "session-start".parse::<HookEvent>().unwrap(),
            HookEvent::SessionStart
        );
        assert!("bogus".parse::<HookEvent>().is_err());
    }

    #[test]
    fn test_merge_appends_in_order() {
        let mut base = HooksConfig::default();
        base.add(HookEvent::StepStart, HookDefinition::new("a", "true"));

        let mut other = HooksConfig::default();
        other.add(HookEvent::StepStart, HookDefinition::new("b", "true"));
        other.deny.push("c".to_string());

        base.merge(other);
        let names: Vec<_> = base
            .hooks_for(HookEvent::StepStart)
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(base.deny, vec!["c"]);
    }
}
