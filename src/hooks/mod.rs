//! Lifecycle hooks
//!
//! External commands that run at defined points of a session or workflow:
//!
//! - **Opt-in**: a hook runs only when it is `enabled` and not denied
//! - **Ordered**: hooks for one event run sequentially, in configured order
//! - **Bounded**: every hook has a timeout (30s unless overridden)
//! - **Policy**: failures warn, unless the hook is `fail_on_error`

pub mod config;
pub mod dispatcher;

pub use config::{HookDefinition, HookEvent, HooksConfig, DEFAULT_HOOK_TIMEOUT};
pub use dispatcher::{merged_output, HookContext, HookDispatcher, HookOutcome, HookStatus};
