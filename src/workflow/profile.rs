//! Workflow profiles
//!
//! A profile is a named pipeline: ordered steps with quality thresholds,
//! the task intents it is meant for, and the scope/complexity range where
//! it makes sense.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::intent::Intent;
use crate::{Error, Result};

fn default_threshold() -> f64 {
    0.7
}

/// One step of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name
    pub name: String,
    /// Minimum score to pass the quality gate
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Step to return to when the gate fails (defaults to this step)
    #[serde(default)]
    pub loopback: Option<String>,
    /// Shell command run by the command stage handler
    #[serde(default)]
    pub command: Option<String>,
}

impl StepSpec {
    /// Create a step with the given gate threshold
    pub fn new(name: &str, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            threshold,
            loopback: None,
            command: None,
        }
    }

    /// Loop back to another step on failure
    pub fn looping_to(mut self, step: &str) -> Self {
        self.loopback = Some(step.to_string());
        self
    }

    /// Attach a stage command
    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }
}

/// A named pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProfile {
    /// Profile name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Ordered steps
    pub steps: Vec<StepSpec>,
    /// Lowest complexity this profile is meant for
    #[serde(default = "one")]
    pub min_complexity: u32,
    /// Highest complexity this profile is meant for
    #[serde(default = "unbounded")]
    pub max_complexity: u32,
    /// Fewest files this profile is meant for
    #[serde(default = "one")]
    pub min_scope: u32,
    /// Most files this profile is meant for
    #[serde(default = "unbounded")]
    pub max_scope: u32,
    /// Intents this profile is designed for
    #[serde(default)]
    pub required_intents: BTreeSet<Intent>,
    /// Per-profile override of the loopback budget
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

fn one() -> u32 {
    1
}

fn unbounded() -> u32 {
    u32::MAX
}

impl WorkflowProfile {
    /// Number of steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Step at an index
    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    /// Whether this profile is designed for an intent
    pub fn requires(&self, intent: Intent) -> bool {
        self.required_intents.contains(&intent)
    }

    /// Whether estimated scope and complexity fall inside the bounds
    pub fn admits(&self, scope: u32, complexity: u32) -> bool {
        (self.min_scope..=self.max_scope).contains(&scope)
            && (self.min_complexity..=self.max_complexity).contains(&complexity)
    }

    /// Index to return to when step `index` fails its gate
    pub fn loopback_index(&self, index: usize) -> usize {
        self.step(index)
            .and_then(|s| s.loopback.as_deref())
            .and_then(|target| self.steps.iter().position(|s| s.name == target))
            .filter(|&j| j <= index)
            .unwrap_or(index)
    }

    /// Check the profile is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Config(format!("Profile {} has no steps", self.name)));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if !(0.0..=1.0).contains(&step.threshold) {
                return Err(Error::Config(format!(
                    "Step {} of {} has threshold {} outside [0, 1]",
                    step.name, self.name, step.threshold
                )));
            }
            if let Some(target) = &step.loopback {
                match self.steps.iter().position(|s| &s.name == target) {
                    Some(j) if j <= i => {}
                    Some(_) => {
                        return Err(Error::Config(format!(
                            "Step {} of {} loops forward to {}",
                            step.name, self.name, target
                        )))
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "Step {} of {} loops back to unknown step {}",
                            step.name, self.name, target
                        )))
                    }
                }
            }
        }

        if self.min_scope > self.max_scope || self.min_complexity > self.max_complexity {
            return Err(Error::Config(format!(
                "Profile {} has inverted bounds",
                self.name
            )));
        }

        Ok(())
    }
}

/// Read-only set of profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    profiles: Vec<WorkflowProfile>,
}

impl ProfileCatalog {
    /// Create a catalog from profiles (order breaks step-count ties)
    pub fn new(profiles: Vec<WorkflowProfile>) -> Self {
        Self { profiles }
    }

    /// Built-in profiles
    pub fn builtin() -> Self {
        Self::new(builtin_profiles())
    }

    /// Look up a profile
    pub fn get(&self, name: &str) -> Option<&WorkflowProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Look up a profile, failing with `ProfileUnknown`
    pub fn require(&self, name: &str) -> Result<&WorkflowProfile> {
        self.get(name)
            .ok_or_else(|| Error::ProfileUnknown(name.to_string()))
    }

    /// All profiles in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowProfile> {
        self.profiles.iter()
    }

    /// Smallest profile designed for `intent` whose bounds admit the estimates
    pub fn smallest_for(
        &self,
        intent: Intent,
        scope: u32,
        complexity: u32,
    ) -> Option<&WorkflowProfile> {
        self.profiles
            .iter()
            .filter(|p| p.requires(intent) && p.admits(scope, complexity))
            .min_by_key(|p| p.step_count())
    }
}

fn profile(
    name: &str,
    description: &str,
    steps: Vec<StepSpec>,
    scope: (u32, u32),
    complexity: (u32, u32),
    intents: &[Intent],
) -> WorkflowProfile {
    WorkflowProfile {
        name: name.to_string(),
        description: description.to_string(),
        steps,
        min_scope: scope.0,
        max_scope: scope.1,
        min_complexity: complexity.0,
        max_complexity: complexity.1,
        required_intents: intents.iter().copied().collect(),
        max_iterations: None,
    }
}

/// The built-in profile set
pub fn builtin_profiles() -> Vec<WorkflowProfile> {
    vec![
        profile(
            "full-feature",
            "End-to-end feature development with design, review and docs",
            vec![
                StepSpec::new("research", 0.7),
                StepSpec::new("design", 0.7),
                StepSpec::new("plan", 0.7),
                StepSpec::new("implement", 0.7),
                StepSpec::new("test", 0.8).looping_to("implement"),
                StepSpec::new("review", 0.8).looping_to("implement"),
                StepSpec::new("document", 0.7),
                StepSpec::new("verify", 0.8).looping_to("implement"),
            ],
            (1, u32::MAX),
            (1, 5),
            &[Intent::Feature],
        ),
        profile(
            "refactor",
            "Behavior-preserving restructuring",
            vec![
                StepSpec::new("analyze", 0.7),
                StepSpec::new("plan", 0.7),
                StepSpec::new("implement", 0.7),
                StepSpec::new("test", 0.8).looping_to("implement"),
                StepSpec::new("review", 0.8).looping_to("implement"),
            ],
            (1, u32::MAX),
            (1, 5),
            &[Intent::Refactor],
        ),
        profile(
            "bug-fix",
            "Reproduce, diagnose and fix a defect",
            vec![
                StepSpec::new("reproduce", 0.7),
                StepSpec::new("diagnose", 0.7),
                StepSpec::new("implement", 0.7),
                StepSpec::new("test", 0.8).looping_to("implement"),
            ],
            (1, 20),
            (1, 4),
            &[Intent::BugFix],
        ),
        profile(
            "investigation",
            "Explore and report without changing code",
            vec![
                StepSpec::new("explore", 0.6),
                StepSpec::new("analyze", 0.7),
                StepSpec::new("report", 0.7).looping_to("analyze"),
            ],
            (1, u32::MAX),
            (1, 5),
            &[Intent::Investigation],
        ),
        profile(
            "documentation",
            "Write or update documentation",
            vec![
                StepSpec::new("draft", 0.7),
                StepSpec::new("review", 0.8).looping_to("draft"),
            ],
            (1, u32::MAX),
            (1, 3),
            &[Intent::Documentation],
        ),
        profile(
            "quick-fix",
            "Small, local change with a single verification pass",
            vec![
                StepSpec::new("implement", 0.7),
                StepSpec::new("verify", 0.8).looping_to("implement"),
            ],
            (1, 3),
            (1, 2),
            &[Intent::BugFix, Intent::Documentation],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_are_valid() {
        let catalog = ProfileCatalog::builtin();
        for profile in catalog.iter() {
            profile.validate().unwrap();
        }
        assert_eq!(catalog.get("full-feature").unwrap().step_count(), 8);
        assert_eq!(catalog.get("quick-fix").unwrap().step_count(), 2);
    }

    #[test]
    fn test_require_unknown() {
        let catalog = ProfileCatalog::builtin();
        assert!(matches!(
            catalog.require("nope"),
            Err(Error::ProfileUnknown(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_loopback_index() {
        let catalog = ProfileCatalog::builtin();
        let full = catalog.get("full-feature").unwrap();
        assert_eq!(full.loopback_index(4), 3); // test → implement
        assert_eq!(full.loopback_index(0), 0); // no loopback → itself
    }

    #[test]
    fn test_smallest_for() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(
            catalog.smallest_for(Intent::BugFix, 1, 1).unwrap().name,
            "quick-fix"
        );
        // too big for quick-fix
        assert_eq!(
            catalog.smallest_for(Intent::BugFix, 8, 3).unwrap().name,
            "bug-fix"
        );
        // too big for anything bug-shaped
        assert!(catalog.smallest_for(Intent::BugFix, 50, 5).is_none());
    }

    #[test]
    fn test_forward_loopback_rejected() {
        let mut profile = ProfileCatalog::builtin().get("bug-fix").unwrap().clone();
        profile.steps[0].loopback = Some("test".to_string());
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_parse_profile_from_toml() {
        let content = r#"
name = "tiny"
required_intents = ["bug_fix"]

[[steps]]
name = "do"
threshold = 0.5
command = "make check"
"#;
        let profile: WorkflowProfile = toml::from_str(content).unwrap();
        assert_eq!(profile.step_count(), 1);
        assert_eq!(profile.max_scope, u32::MAX);
        assert!(profile.requires(Intent::BugFix));
        profile.validate().unwrap();
    }
}
