//! Workflow instance state
//!
//! A [`WorkflowInstance`] is a plain serializable record. It only changes
//! through [`WorkflowInstance::apply`], which returns the next snapshot
//! and leaves the current one untouched, so the executor can commit the
//! new snapshot before adopting it.
//!
//! ```text
//! Pending ─Start─▶ Running(i) ─StageFinished─▶ QualityCheck(i)
//!                     ▲                              │ EvaluateGate
//!                     ├──── advance / loopback ◀─────┤
//!                     │                              ├──▶ Completed
//!                     │                              └──▶ Aborted (budget exhausted)
//! Running | QualityCheck ─Interrupt─▶ Paused ─Resume─▶ (where it left off)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::profile::WorkflowProfile;
use crate::{Error, Result};

/// Overall instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not started
    Pending,
    /// A step is executing
    Running,
    /// A step finished and its gate is being evaluated
    QualityCheck,
    /// Interrupted; resumable
    Paused,
    /// Every step passed
    Completed,
    /// Retry budget exhausted or aborted by a hook
    Aborted,
}

impl WorkflowStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Aborted)
    }

    /// Statuses listed as resumable
    pub fn is_resumable(&self) -> bool {
        matches!(self, WorkflowStatus::Running | WorkflowStatus::Paused)
    }

    /// Get the name of this status
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::QualityCheck => "quality_check",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of one gate evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step that ran
    pub step_name: String,
    /// Reference to what the stage produced
    pub artifact_ref: String,
    /// Quality score in [0, 1]
    pub score: f64,
    /// Whether the score cleared the threshold
    pub passed: bool,
    /// When the gate was evaluated
    pub timestamp: DateTime<Utc>,
}

/// What a stage handler reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Reference to the produced artifact (path, commit, note)
    pub artifact_ref: String,
    /// Quality score in [0, 1]
    pub score: f64,
}

impl StageOutcome {
    /// Create an outcome; the score is clamped into [0, 1]
    pub fn new(artifact_ref: impl Into<String>, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            artifact_ref: artifact_ref.into(),
            score,
        }
    }
}

/// What the last gate evaluation decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Passed; moved on to the next step
    Advance { to: usize },
    /// Passed the last step
    Complete,
    /// Failed; returned to an earlier (or the same) step
    Loopback { to: usize, attempt: u32 },
    /// Failed with no retries left
    Exhausted,
}

/// Inputs to the transition function
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Pending → Running(0)
    Start,
    /// Running(i) → QualityCheck(i)
    StageFinished(StageOutcome),
    /// QualityCheck(i) → Running(next) | Running(j ≤ i) | Completed | Aborted
    EvaluateGate,
    /// Running | QualityCheck → Paused
    Interrupt,
    /// Paused → where it was interrupted
    Resume,
    /// Any non-terminal state → Aborted
    Abort { reason: String },
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::StageFinished(_) => "stage_finished",
            Transition::EvaluateGate => "evaluate_gate",
            Transition::Interrupt => "interrupt",
            Transition::Resume => "resume",
            Transition::Abort { .. } => "abort",
        }
    }
}

/// One workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique run ID
    pub id: String,
    /// Profile being executed
    pub profile_name: String,
    /// Task description the run was started with
    #[serde(default)]
    pub description: String,
    /// Index of the current step
    pub step_index: usize,
    /// Overall status
    pub status: WorkflowStatus,
    /// Loopbacks taken per step name
    #[serde(default)]
    pub retry_counts: BTreeMap<String, u32>,
    /// Every gate evaluation, oldest first
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// Artifacts handed forward to later steps
    #[serde(default)]
    pub context: Vec<String>,
    /// Outcome waiting for gate evaluation (set in QualityCheck)
    #[serde(default)]
    pub pending_outcome: Option<StageOutcome>,
    /// Last gate decision
    #[serde(default)]
    pub last_gate: Option<GateDecision>,
    /// Why the run was aborted
    #[serde(default)]
    pub abort_reason: Option<String>,
    /// Monotonic snapshot counter
    #[serde(default)]
    pub revision: u64,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the last transition happened
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a pending instance
    pub fn new(profile_name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            profile_name: profile_name.to_string(),
            description: description.to_string(),
            step_index: 0,
            status: WorkflowStatus::Pending,
            retry_counts: BTreeMap::new(),
            step_results: Vec::new(),
            context: Vec::new(),
            pending_outcome: None,
            last_gate: None,
            abort_reason: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Loopbacks taken so far for a step
    pub fn retries(&self, step: &str) -> u32 {
        self.retry_counts.get(step).copied().unwrap_or(0)
    }

    /// Total loopbacks across all steps
    pub fn total_loopbacks(&self) -> u32 {
        self.retry_counts.values().sum()
    }

    /// Compute the snapshot that follows `transition`.
    ///
    /// `self` is not modified. Moves that make no sense in the current
    /// status fail with `InvalidTransition`.
    pub fn apply(
        &self,
        transition: Transition,
        profile: &WorkflowProfile,
        max_iterations: u32,
    ) -> Result<WorkflowInstance> {
        let mut next = self.clone();

        match (self.status, transition) {
            (WorkflowStatus::Pending, Transition::Start) => {
                if profile.step_count() == 0 {
                    return Err(Error::InvalidTransition(format!(
                        "profile {} has no steps",
                        profile.name
                    )));
                }
                next.status = WorkflowStatus::Running;
                next.step_index = 0;
            }

            (WorkflowStatus::Running, Transition::StageFinished(outcome)) => {
                next.status = WorkflowStatus::QualityCheck;
                next.pending_outcome = Some(outcome);
            }

            (WorkflowStatus::QualityCheck, Transition::EvaluateGate) => {
                let outcome = self.pending_outcome.clone().ok_or_else(|| {
                    Error::InvalidTransition(format!("{}: no outcome to evaluate", self.id))
                })?;
                let step = profile.step(self.step_index).ok_or_else(|| {
                    Error::InvalidTransition(format!(
                        "{}: step {} out of range for {}",
                        self.id, self.step_index, profile.name
                    ))
                })?;

                let passed = outcome.score >= step.threshold;
                next.pending_outcome = None;
                next.step_results.push(StepResult {
                    step_name: step.name.clone(),
                    artifact_ref: outcome.artifact_ref.clone(),
                    score: outcome.score,
                    passed,
                    timestamp: Utc::now(),
                });
                next.context.push(outcome.artifact_ref);

                if passed {
                    if self.step_index + 1 >= profile.step_count() {
                        next.status = WorkflowStatus::Completed;
                        next.last_gate = Some(GateDecision::Complete);
                    } else {
                        next.status = WorkflowStatus::Running;
                        next.step_index = self.step_index + 1;
                        next.last_gate = Some(GateDecision::Advance {
                            to: next.step_index,
                        });
                    }
                } else {
                    let used = self.retries(&step.name);
                    if used < max_iterations {
                        let to = profile.loopback_index(self.step_index);
                        next.retry_counts.insert(step.name.clone(), used + 1);
                        next.status = WorkflowStatus::Running;
                        next.step_index = to;
                        next.last_gate = Some(GateDecision::Loopback {
                            to,
                            attempt: used + 1,
                        });
                    } else {
                        next.status = WorkflowStatus::Aborted;
                        next.last_gate = Some(GateDecision::Exhausted);
                        next.abort_reason = Some(format!(
                            "step '{}' scored {:.2} < {:.2} after {} retries",
                            step.name, outcome.score, step.threshold, used
                        ));
                    }
                }
            }

            (WorkflowStatus::Running | WorkflowStatus::QualityCheck, Transition::Interrupt) => {
                next.status = WorkflowStatus::Paused;
            }

            (WorkflowStatus::Paused, Transition::Resume) => {
                next.status = if self.pending_outcome.is_some() {
                    WorkflowStatus::QualityCheck
                } else {
                    WorkflowStatus::Running
                };
            }

            (status, Transition::Abort { reason }) if !status.is_terminal() => {
                next.status = WorkflowStatus::Aborted;
                next.abort_reason = Some(reason);
            }

            (status, transition) => {
                return Err(Error::InvalidTransition(format!(
                    "{}: cannot {} while {}",
                    self.id,
                    transition.name(),
                    status
                )));
            }
        }

        next.revision = self.revision + 1;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Multi-line progress summary
    pub fn summary(&self, profile: Option<&WorkflowProfile>) -> String {
        let mut lines = vec![
            format!("Workflow: {} ({})", self.profile_name, self.id),
            format!("Status: {}", self.status),
        ];

        if let Some(step) = profile.and_then(|p| p.step(self.step_index)) {
            lines.push(format!("Current: {} ({})", step.name, self.step_index));
        } else {
            lines.push(format!("Current: step {}", self.step_index));
        }

        if let Some(reason) = &self.abort_reason {
            lines.push(format!("Reason: {}", reason));
        }

        if !self.step_results.is_empty() {
            lines.push(String::new());
            lines.push("Results:".to_string());
            for result in &self.step_results {
                let icon = if result.passed { "✅" } else { "❌" };
                lines.push(format!(
                    "  {} {}: {:.2} ({})",
                    icon, result.step_name, result.score, result.artifact_ref
                ));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::profile::{ProfileCatalog, StepSpec};

    fn two_step() -> WorkflowProfile {
        let mut profile = ProfileCatalog::builtin().get("quick-fix").unwrap().clone();
        profile.steps = vec![
            StepSpec::new("implement", 0.7),
            StepSpec::new("verify", 0.8).looping_to("implement"),
        ];
        profile
    }

    fn finish(
        instance: &WorkflowInstance,
        profile: &WorkflowProfile,
        score: f64,
        k: u32,
    ) -> WorkflowInstance {
        instance
            .apply(
                Transition::StageFinished(StageOutcome::new("artifact", score)),
                profile,
                k,
            )
            .unwrap()
            .apply(Transition::EvaluateGate, profile, k)
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        let profile = two_step();
        let pending = WorkflowInstance::new(&profile.name, "fix it");
        let running = pending.apply(Transition::Start, &profile, 3).unwrap();
        assert_eq!(running.status, WorkflowStatus::Running);
        assert_eq!(running.revision, 1);
        // apply never mutates the source snapshot
        assert_eq!(pending.status, WorkflowStatus::Pending);

        let second = finish(&running, &profile, 0.9, 3);
        assert_eq!(second.step_index, 1);
        assert_eq!(second.last_gate, Some(GateDecision::Advance { to: 1 }));

        let done = finish(&second, &profile, 0.8, 3);
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.step_results.len(), 2);
        assert!(done.step_results.iter().all(|r| r.passed));
        assert_eq!(done.revision, 5);
    }

    #[test]
    fn test_loopback_then_exhaustion() {
        let profile = two_step();
        let k = 2;
        let mut instance = WorkflowInstance::new(&profile.name, "")
            .apply(Transition::Start, &profile, k)
            .unwrap();
        instance = finish(&instance, &profile, 1.0, k);

        let mut loopbacks = 0;
        while !instance.status.is_terminal() {
            // verify always fails; implement always passes
            let score = if instance.step_index == 1 { 0.1 } else { 1.0 };
            instance = finish(&instance, &profile, score, k);
            if let Some(GateDecision::Loopback { to, .. }) = instance.last_gate {
                assert_eq!(to, 0);
                loopbacks += 1;
            }
            assert!(instance.retries("verify") <= k);
        }

        assert_eq!(loopbacks, k);
        assert_eq!(instance.status, WorkflowStatus::Aborted);
        assert_eq!(instance.last_gate, Some(GateDecision::Exhausted));
        assert!(!instance.step_results.last().unwrap().passed);
    }

    #[test]
    fn test_zero_budget_aborts_immediately() {
        let profile = two_step();
        let running = WorkflowInstance::new(&profile.name, "")
            .apply(Transition::Start, &profile, 0)
            .unwrap();
        let aborted = finish(&running, &profile, 0.0, 0);
        assert_eq!(aborted.status, WorkflowStatus::Aborted);
        assert_eq!(aborted.total_loopbacks(), 0);
    }

    #[test]
    fn test_pause_and_resume_keep_position() {
        let profile = two_step();
        let running = WorkflowInstance::new(&profile.name, "")
            .apply(Transition::Start, &profile, 3)
            .unwrap();
        let checking = running
            .apply(
                Transition::StageFinished(StageOutcome::new("a", 0.9)),
                &profile,
                3,
            )
            .unwrap();

        let paused = checking.apply(Transition::Interrupt, &profile, 3).unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);

        let resumed = paused.apply(Transition::Resume, &profile, 3).unwrap();
        assert_eq!(resumed.status, WorkflowStatus::QualityCheck);
        assert_eq!(resumed.pending_outcome, checking.pending_outcome);

        let paused = running.apply(Transition::Interrupt, &profile, 3).unwrap();
        let resumed = paused.apply(Transition::Resume, &profile, 3).unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
    }

    #[test]
    fn test_invalid_transitions() {
        let profile = two_step();
        let pending = WorkflowInstance::new(&profile.name, "");
        assert!(matches!(
            pending.apply(Transition::EvaluateGate, &profile, 3),
            Err(Error::InvalidTransition(_))
        ));
        assert!(pending.apply(Transition::Interrupt, &profile, 3).is_err());

        let aborted = pending
            .apply(
                Transition::Abort {
                    reason: "hook".to_string(),
                },
                &profile,
                3,
            )
            .unwrap();
        assert!(aborted
            .apply(Transition::Abort { reason: "again".to_string() }, &profile, 3)
            .is_err());
        assert!(aborted.apply(Transition::Resume, &profile, 3).is_err());
    }

    #[test]
    fn test_outcome_score_is_clamped() {
        assert_eq!(StageOutcome::new("x", 4.0).score, 1.0);
        assert_eq!(StageOutcome::new("x", -1.0).score, 0.0);
        assert_eq!(StageOutcome::new("x", f64::NAN).score, 0.0);
    }

    #[test]
    fn test_yaml_round_trip_every_status() {
        let profile = two_step();
        let pending = WorkflowInstance::new(&profile.name, "round trip");
        let running = pending.apply(Transition::Start, &profile, 1).unwrap();
        let checking = running
            .apply(
                Transition::StageFinished(StageOutcome::new("a", 0.2)),
                &profile,
                1,
            )
            .unwrap();
        let looped = checking.apply(Transition::EvaluateGate, &profile, 1).unwrap();
        let paused = looped.apply(Transition::Interrupt, &profile, 1).unwrap();
        let completed = finish(&finish(&running, &profile, 1.0, 1), &profile, 1.0, 1);
        let aborted = finish(&looped, &profile, 0.0, 1);
        assert_eq!(aborted.status, WorkflowStatus::Aborted);

        for instance in [pending, running, checking, looped, paused, completed, aborted] {
            let yaml = serde_yaml::to_string(&instance).unwrap();
            let back: WorkflowInstance = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, instance);
        }
    }
}
