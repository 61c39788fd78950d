//! Sessions and tracker synchronization
//!
//! - **Sessions**: start/end records that bracket user activity and fire
//!   the session hooks
//! - **Task records**: local JSON files, one per task
//! - **Trackers**: where hydration pushes records and dehydration pulls
//!   status from
//! - **Signals**: Ctrl+C becomes a pause request for running workflows

pub mod manager;
pub mod signals;
pub mod tasks;
pub mod tracker;

pub use manager::{DehydrationReport, HydrationReport, Session, SessionManager, SyncFailure};
pub use signals::{Press, SignalHandler};
pub use tasks::{SyncConflict, TaskRecord, TaskStatus, TaskStore};
pub use tracker::{MemoryTracker, ScudTracker, Tracker};
