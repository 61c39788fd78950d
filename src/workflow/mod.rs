//! Quality-gated workflow execution
//!
//! - **Profiles**: named pipelines of steps, each with a quality threshold
//!   and an optional loopback target
//! - **Validation**: warns when a profile does not fit the task description
//! - **State**: a serializable instance record with an explicit transition
//!   function
//! - **Checkpoints**: every transition is committed before it counts
//! - **Executor**: runs steps, evaluates gates, loops back, fires hooks
//!
//! ## Example profile
//!
//! ```toml
//! [[profiles]]
//! name = "hotfix"
//! required_intents = ["bug_fix"]
//! max_scope = 3
//!
//! [[profiles.steps]]
//! name = "implement"
//! command = "make fix"
//!
//! [[profiles.steps]]
//! name = "verify"
//! threshold = 0.9
//! loopback = "implement"
//! command = "make test && echo 'score: 1.0'"
//! ```

pub mod checkpoint;
pub mod executor;
pub mod profile;
pub mod stage;
pub mod state;
pub mod validator;

pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use executor::{RunReport, WorkflowExecutor};
pub use profile::{builtin_profiles, ProfileCatalog, StepSpec, WorkflowProfile};
pub use stage::{CommandStageHandler, StageHandler, StageRequest};
pub use state::{
    GateDecision, StageOutcome, StepResult, Transition, WorkflowInstance, WorkflowStatus,
};
pub use validator::{
    Estimator, EstimatorConfig, HeuristicEstimator, MismatchWarning, WorkflowValidator,
};
