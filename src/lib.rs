//! Stageflow: Quality-Gated Workflow Orchestration
//!
//! Drives multi-step pipelines for delegated work where every step must
//! clear a quality gate before the next one starts:
//! - **Intent classification**: weighted keyword tables detect what a task
//!   description is really asking for
//! - **Profile validation**: warns when the chosen pipeline is oversized (or
//!   wrong) for the detected intent
//! - **Checkpointed execution**: every state transition is committed to disk
//!   before it counts, so runs survive interruption
//! - **Lifecycle hooks**: opt-in external commands run at defined points
//!   under timeouts and failure policies
//! - **Sessions**: bracket user activity and keep local task records in sync
//!   with an external tracker
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Session (start ... end)          │
//! │  hydrate tasks → work → dehydrate       │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   Validator (classifier + catalog)      │
//! │  "this looks like a bug_fix"            │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   Executor: Running(i) → QualityCheck   │
//! │  → advance | loopback | abort           │
//! │  checkpoint on every transition         │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod hooks;
pub mod intent;
pub mod session;
pub mod workflow;

// Re-exports for convenience
pub use config::Config;
pub use hooks::{HookContext, HookDispatcher, HookEvent, HookOutcome};
pub use intent::{classify, ClassificationResult, Classifier, Intent};
pub use session::{Session, SessionManager, TaskRecord, Tracker};
pub use workflow::{
    CheckpointStore, FileCheckpointStore, MismatchWarning, ProfileCatalog, WorkflowExecutor,
    WorkflowInstance, WorkflowProfile, WorkflowStatus, WorkflowValidator,
};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown workflow profile: {0}")]
    ProfileUnknown(String),

    #[error("Hook '{hook}' timed out after {seconds}s")]
    HookTimeout { hook: String, seconds: u64 },

    #[error("Hook '{hook}' failed: {reason}")]
    HookFailed { hook: String, reason: String },

    #[error("Checkpoint write failed for {id}: {reason}")]
    CheckpointWrite { id: String, reason: String },

    #[error("Checkpoint conflict for {id}: revision {revision} is not newer than committed {committed}")]
    CheckpointConflict {
        id: String,
        revision: u64,
        committed: u64,
    },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Command error: {0}")]
    Command(String),
}

impl Error {
    /// Whether this error came from a hook that is configured to abort
    /// the operation that triggered it
    pub fn is_hook_abort(&self) -> bool {
        matches!(self, Error::HookTimeout { .. } | Error::HookFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
