//! Workflow executor
//!
//! Drives a [`WorkflowInstance`] through its profile. Each transition is
//! computed with [`WorkflowInstance::apply`] and committed to the
//! checkpoint store before the executor adopts it; a failed commit ends the
//! run with an error. Interrupts and resumes work purely from what the
//! store holds.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointStore;
use super::profile::{ProfileCatalog, WorkflowProfile};
use super::stage::{StageHandler, StageRequest};
use super::state::{GateDecision, StageOutcome, Transition, WorkflowInstance, WorkflowStatus};
use crate::config::ExecutorConfig;
use crate::hooks::{HookContext, HookDispatcher, HookEvent};
use crate::{Error, Result};

/// Final instance plus everything that went wrong along the way
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Last committed snapshot
    pub instance: WorkflowInstance,
    /// Non-fatal problems (hook failures, stage errors, loopbacks)
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Whether the run completed
    pub fn is_success(&self) -> bool {
        self.instance.status == WorkflowStatus::Completed
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} {} ({}) after {} gate checks, {} loopbacks",
            self.instance.profile_name,
            self.instance.status,
            self.instance.id,
            self.instance.step_results.len(),
            self.instance.total_loopbacks()
        );
        if let Some(reason) = &self.instance.abort_reason {
            out.push_str(&format!("\nReason: {}", reason));
        }
        for warning in &self.warnings {
            out.push_str(&format!("\n⚠ {}", warning));
        }
        out
    }
}

/// Runs workflow instances step by step
pub struct WorkflowExecutor {
    catalog: ProfileCatalog,
    store: Arc<dyn CheckpointStore>,
    hooks: Arc<HookDispatcher>,
    handler: Arc<dyn StageHandler>,
    config: ExecutorConfig,
    interrupt: Arc<AtomicBool>,
    project_root: Option<PathBuf>,
}

impl WorkflowExecutor {
    /// Create an executor
    pub fn new(
        catalog: ProfileCatalog,
        store: Arc<dyn CheckpointStore>,
        hooks: Arc<HookDispatcher>,
        handler: Arc<dyn StageHandler>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            hooks,
            handler,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            project_root: None,
        }
    }

    /// Share an interrupt flag (e.g. one set by a Ctrl+C handler)
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Project root exported to hooks
    pub fn with_project_root(mut self, root: PathBuf) -> Self {
        self.project_root = Some(root);
        self
    }

    /// The interrupt flag checked between transitions
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Start a new instance of `profile_name` and drive it to a resting state.
    ///
    /// A fatal hook ends the run as `Aborted` in the report, with the hook
    /// error among the warnings.
    pub async fn run(&self, profile_name: &str, description: &str) -> Result<RunReport> {
        let profile = self.catalog.require(profile_name)?.clone();
        let pending = WorkflowInstance::new(&profile.name, description);
        self.store.save(&pending)?;

        info!("Starting workflow {} ({})", profile.name, pending.id);
        let mut warnings = Vec::new();
        let instance = self.begin(&pending, &profile, &mut warnings).await?;
        self.drive(instance, &profile, warnings).await
    }

    /// Continue an instance from its last committed checkpoint
    pub async fn resume(&self, id: &str) -> Result<RunReport> {
        let instance = self.store.load(id)?;
        let profile = self.catalog.require(&instance.profile_name)?.clone();
        let mut warnings = Vec::new();

        let instance = match instance.status {
            WorkflowStatus::Paused => self.commit(&instance, Transition::Resume, &profile)?,
            // left behind by a crash; the checkpoint is the truth
            WorkflowStatus::Running | WorkflowStatus::QualityCheck => instance,
            WorkflowStatus::Pending => self.begin(&instance, &profile, &mut warnings).await?,
            status => {
                return Err(Error::InvalidTransition(format!(
                    "{}: cannot resume a {} workflow",
                    id, status
                )))
            }
        };

        info!(
            "Resuming workflow {} ({}) at step {}",
            profile.name, id, instance.step_index
        );
        self.drive(instance, &profile, warnings).await
    }

    /// Pause an instance from outside its run, based on the committed snapshot
    pub fn pause(&self, id: &str) -> Result<WorkflowInstance> {
        let instance = self.store.load(id)?;
        let profile = self.catalog.require(&instance.profile_name)?;
        let paused = self.commit(&instance, Transition::Interrupt, profile)?;
        info!("Paused workflow {}", id);
        Ok(paused)
    }

    /// Last committed snapshot
    pub fn status(&self, id: &str) -> Result<WorkflowInstance> {
        self.store.load(id)
    }

    /// Ids that can be resumed (Running or Paused)
    pub fn list_resumable(&self) -> Result<Vec<String>> {
        self.store
            .list(&[WorkflowStatus::Running, WorkflowStatus::Paused])
    }

    fn max_iterations(&self, profile: &WorkflowProfile) -> u32 {
        profile.max_iterations.unwrap_or(self.config.max_iterations)
    }

    /// Compute, commit, then adopt
    fn commit(
        &self,
        current: &WorkflowInstance,
        transition: Transition,
        profile: &WorkflowProfile,
    ) -> Result<WorkflowInstance> {
        let next = current.apply(transition, profile, self.max_iterations(profile))?;
        match self.store.save(&next) {
            Ok(()) => {}
            Err(e @ Error::CheckpointConflict { .. }) => {
                debug!("{}", e);
                return Err(e);
            }
            Err(e) => {
                error!("Checkpoint commit failed for {}: {}", current.id, e);
                return Err(e);
            }
        }
        debug!(id = %next.id, status = %next.status, step = next.step_index, "transition committed");
        Ok(next)
    }

    /// Fire WorkflowStart, then commit Start; a fatal hook commits Aborted
    async fn begin(
        &self,
        pending: &WorkflowInstance,
        profile: &WorkflowProfile,
        warnings: &mut Vec<String>,
    ) -> Result<WorkflowInstance> {
        let context = self.hook_context(pending);
        match self.hooks.dispatch(HookEvent::WorkflowStart, &context).await {
            Ok(outcomes) => warnings.extend(outcomes.iter().filter_map(|o| o.warning())),
            Err(e) if e.is_hook_abort() => return self.abort(pending, profile, &e, warnings),
            Err(e) => return Err(e),
        }
        self.commit(pending, Transition::Start, profile)
    }

    /// A commit lost to a concurrent `pause(id)` ends the run at the
    /// committed Paused snapshot; anything else is fatal.
    fn yield_to_pause(
        &self,
        instance: &WorkflowInstance,
        cause: Error,
        warnings: Vec<String>,
    ) -> Result<RunReport> {
        if let Error::CheckpointConflict { .. } = cause {
            if let Ok(committed) = self.store.load(&instance.id) {
                if committed.status == WorkflowStatus::Paused {
                    info!("Workflow {} was paused", instance.id);
                    return Ok(RunReport {
                        instance: committed,
                        warnings,
                    });
                }
            }
        }
        Err(cause)
    }

    fn hook_context(&self, instance: &WorkflowInstance) -> HookContext {
        let mut context = HookContext::new()
            .with_workflow(&instance.profile_name, &instance.id)
            .with_prompt(&instance.description);
        if let Some(root) = &self.project_root {
            context = context.with_project_root(root.clone());
        }
        context
    }

    fn paused_externally(&self, instance: &WorkflowInstance) -> bool {
        matches!(
            self.store.load(&instance.id),
            Ok(committed) if committed.status == WorkflowStatus::Paused
                && committed.revision > instance.revision
        )
    }

    async fn drive(
        &self,
        mut instance: WorkflowInstance,
        profile: &WorkflowProfile,
        mut warnings: Vec<String>,
    ) -> Result<RunReport> {
        loop {
            let active = !instance.status.is_terminal();
            if active && self.interrupt.swap(false, Ordering::SeqCst) {
                return self.interrupted(&instance.id, profile, warnings);
            }
            if active && self.paused_externally(&instance) {
                info!("Workflow {} was paused", instance.id);
                let instance = self.store.load(&instance.id)?;
                return Ok(RunReport { instance, warnings });
            }

            match instance.status {
                WorkflowStatus::Running => {
                    let outcome = match self.run_step(&instance, profile, &mut warnings).await {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_hook_abort() => {
                            instance = self.abort(&instance, profile, &e, &mut warnings)?;
                            continue;
                        }
                        Err(e) => {
                            let aborted = self.abort(&instance, profile, &e, &mut warnings)?;
                            self.complete(&aborted, &mut warnings).await;
                            return Err(e);
                        }
                    };

                    // a stage cut short by an interrupt is not committed
                    if self.interrupt.swap(false, Ordering::SeqCst) {
                        return self.interrupted(&instance.id, profile, warnings);
                    }

                    instance = match self.commit(
                        &instance,
                        Transition::StageFinished(outcome),
                        profile,
                    ) {
                        Ok(next) => next,
                        Err(e) => return self.yield_to_pause(&instance, e, warnings),
                    };
                }

                WorkflowStatus::QualityCheck => {
                    let step_name = profile
                        .step(instance.step_index)
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    instance = match self.commit(&instance, Transition::EvaluateGate, profile) {
                        Ok(next) => next,
                        Err(e) => return self.yield_to_pause(&instance, e, warnings),
                    };
                    self.log_gate(&instance, &step_name, &mut warnings);

                    let result = instance.step_results.last().cloned();
                    let context = self.hook_context(&instance).with_status(
                        if result.map(|r| r.passed).unwrap_or(false) {
                            "passed"
                        } else {
                            "failed"
                        },
                    );
                    match self.hooks.dispatch(HookEvent::StepComplete, &context).await {
                        Ok(outcomes) => {
                            warnings.extend(outcomes.iter().filter_map(|o| o.warning()))
                        }
                        Err(e) if e.is_hook_abort() && !instance.status.is_terminal() => {
                            instance = self.abort(&instance, profile, &e, &mut warnings)?;
                        }
                        Err(e) => warnings.push(e.to_string()),
                    }
                }

                WorkflowStatus::Completed | WorkflowStatus::Aborted => {
                    self.complete(&instance, &mut warnings).await;
                    return Ok(RunReport { instance, warnings });
                }

                WorkflowStatus::Paused | WorkflowStatus::Pending => {
                    return Ok(RunReport { instance, warnings });
                }
            }
        }
    }

    /// Fire StepStart, then run the stage handler under the stage timeout.
    ///
    /// Handler errors and timeouts become a 0.0 score plus a warning; only a
    /// fatal StepStart hook is an error here.
    async fn run_step(
        &self,
        instance: &WorkflowInstance,
        profile: &WorkflowProfile,
        warnings: &mut Vec<String>,
    ) -> Result<StageOutcome> {
        let step = profile.step(instance.step_index).ok_or_else(|| {
            Error::InvalidTransition(format!(
                "{}: step {} out of range",
                instance.id, instance.step_index
            ))
        })?;
        let attempt = instance.retries(&step.name) + 1;

        let outcomes = self
            .hooks
            .dispatch(HookEvent::StepStart, &self.hook_context(instance))
            .await?;
        warnings.extend(outcomes.iter().filter_map(|o| o.warning()));

        info!(
            "Running step {}/{}: {} (attempt {})",
            instance.step_index + 1,
            profile.step_count(),
            step.name,
            attempt
        );

        let request = StageRequest {
            workflow_id: instance.id.clone(),
            profile_name: profile.name.clone(),
            description: instance.description.clone(),
            step_name: step.name.clone(),
            step_index: instance.step_index,
            attempt,
            command: step.command.clone(),
            context: instance.context.clone(),
        };

        let result = match self.config.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.handler.run(&request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Command(format!(
                    "step {} timed out after {}",
                    step.name,
                    humantime::format_duration(limit)
                ))),
            },
            None => self.handler.run(&request).await,
        };

        Ok(result.unwrap_or_else(|e| {
            let warning = format!("Step {} failed: {}", step.name, e);
            warn!("{}", warning);
            warnings.push(warning);
            StageOutcome::new(format!("{}#{}", step.name, attempt), 0.0)
        }))
    }

    fn log_gate(&self, instance: &WorkflowInstance, step: &str, warnings: &mut Vec<String>) {
        let score = instance.step_results.last().map(|r| r.score).unwrap_or(0.0);
        match &instance.last_gate {
            Some(GateDecision::Advance { to }) => {
                info!("Step {} passed ({:.2}), advancing to step {}", step, score, to + 1)
            }
            Some(GateDecision::Complete) => info!("Step {} passed ({:.2}), workflow complete", step, score),
            Some(GateDecision::Loopback { to, attempt }) => {
                let warning = format!(
                    "Step {} scored {:.2}, looping back to step {} (retry {})",
                    step,
                    score,
                    to + 1,
                    attempt
                );
                warn!("{}", warning);
                warnings.push(warning);
            }
            Some(GateDecision::Exhausted) => {
                let warning = format!("Step {} scored {:.2} with no retries left", step, score);
                error!("{}", warning);
                warnings.push(warning);
            }
            None => {}
        }
    }

    /// Reload the last committed snapshot and commit Paused on top of it
    fn interrupted(
        &self,
        id: &str,
        profile: &WorkflowProfile,
        warnings: Vec<String>,
    ) -> Result<RunReport> {
        let committed = self.store.load(id)?;
        let instance = match committed.status {
            WorkflowStatus::Running | WorkflowStatus::QualityCheck => {
                self.commit(&committed, Transition::Interrupt, profile)?
            }
            _ => committed,
        };
        warn!("Workflow {} interrupted, paused at step {}", id, instance.step_index);
        Ok(RunReport { instance, warnings })
    }

    /// Commit Aborted after a fatal error; the caller fires the completion hook
    fn abort(
        &self,
        instance: &WorkflowInstance,
        profile: &WorkflowProfile,
        cause: &Error,
        warnings: &mut Vec<String>,
    ) -> Result<WorkflowInstance> {
        error!("Aborting workflow {}: {}", instance.id, cause);
        let aborted = self.commit(
            instance,
            Transition::Abort {
                reason: cause.to_string(),
            },
            profile,
        )?;
        warnings.push(cause.to_string());
        Ok(aborted)
    }

    /// Fire WorkflowComplete; failures here are only warnings
    async fn complete(&self, instance: &WorkflowInstance, warnings: &mut Vec<String>) {
        info!("Workflow {} finished: {}", instance.id, instance.status);
        let context = self
            .hook_context(instance)
            .with_status(instance.status.name());
        match self.hooks.dispatch(HookEvent::WorkflowComplete, &context).await {
            Ok(outcomes) => warnings.extend(outcomes.iter().filter_map(|o| o.warning())),
            Err(e) => {
                warn!("{}", e);
                warnings.push(e.to_string());
            }
        }
    }
}
