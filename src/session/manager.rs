//! Session lifecycle and tracker synchronization
//!
//! A session brackets a unit of user activity. Starting one fires the
//! session-start hooks and hydrates the tracker from local task records;
//! ending one fires the session-end hooks and dehydrates tracker status
//! back into the local records.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::tasks::{SyncConflict, TaskRecord, TaskStore};
use super::tracker::Tracker;
use crate::config::Config;
use crate::hooks::{merged_output, HookContext, HookDispatcher, HookEvent};
use crate::{Error, Result};

/// One unit of user activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Workflow instances run during the session
    #[serde(default)]
    pub touched_workflow_ids: Vec<String>,
    /// Where the session record lives
    pub log_ref: PathBuf,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A task that could not be synchronized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub task_id: String,
    pub reason: String,
}

/// What hydration did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HydrationReport {
    /// Tasks that got a new tracker record
    pub created: Vec<String>,
    /// Tasks whose existing reference still resolves
    pub verified: Vec<String>,
    /// Tasks that could not be created, verified or linked
    pub failed: Vec<SyncFailure>,
    /// Dependency edges written
    pub edges: usize,
}

impl HydrationReport {
    pub fn summary(&self) -> String {
        format!(
            "hydration: {} created, {} verified, {} failed, {} edges",
            self.created.len(),
            self.verified.len(),
            self.failed.len(),
            self.edges
        )
    }
}

/// What dehydration did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DehydrationReport {
    /// Tasks whose local status was updated from the tracker
    pub updated: Vec<String>,
    /// Tasks already in agreement
    pub unchanged: Vec<String>,
    /// Tasks marked conflicted
    pub conflicts: Vec<(String, SyncConflict)>,
    /// Tasks whose tracker status could not be read
    pub failed: Vec<SyncFailure>,
}

impl DehydrationReport {
    pub fn summary(&self) -> String {
        format!(
            "dehydration: {} updated, {} unchanged, {} conflicts, {} failed",
            self.updated.len(),
            self.unchanged.len(),
            self.conflicts.len(),
            self.failed.len()
        )
    }
}

/// Starts and ends sessions, syncing task records with the tracker
pub struct SessionManager {
    session_dir: PathBuf,
    hooks: Arc<HookDispatcher>,
    tasks: TaskStore,
    tracker: Arc<dyn Tracker>,
    project_root: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager using the configured state directories
    pub fn new(config: &Config, hooks: Arc<HookDispatcher>, tracker: Arc<dyn Tracker>) -> Self {
        Self {
            session_dir: config.session_dir(),
            hooks,
            tasks: TaskStore::new(config.task_dir()),
            tracker,
            project_root: config.tracker.project_root.clone(),
        }
    }

    /// Local task records
    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.session_dir.join(format!("{}.json", id))
    }

    fn hook_context(&self, session_id: &str) -> HookContext {
        let context = HookContext::new().with_session(session_id);
        match &self.project_root {
            Some(root) => context.with_project_root(root.clone()),
            None => context,
        }
    }

    /// Load a session record
    pub fn load(&self, id: &str) -> Result<Session> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.session_dir)?;
        let content = serde_json::to_string_pretty(session)?;
        let mut tmp = NamedTempFile::new_in(&self.session_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&session.log_ref).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Start a session: session-start hooks, then hydration.
    ///
    /// A failing `fail_on_error` hook fails the start and no session is
    /// recorded.
    pub async fn start(&self) -> Result<(Session, HydrationReport)> {
        let id = Uuid::new_v4().to_string();

        let outcomes = self
            .hooks
            .dispatch(HookEvent::SessionStart, &self.hook_context(&id))
            .await?;
        for warning in outcomes.iter().filter_map(|o| o.warning()) {
            warn!("{}", warning);
        }

        let session = Session {
            id: id.clone(),
            start_time: Utc::now(),
            end_time: None,
            touched_workflow_ids: Vec::new(),
            log_ref: self.path_for(&id),
        };
        self.save(&session)?;
        info!("Session {} started", id);

        let report = self.hydrate().await?;
        info!("{}", report.summary());
        Ok((session, report))
    }

    /// End a session: session-end hooks, then dehydration
    pub async fn end(&self, id: &str) -> Result<(Session, DehydrationReport)> {
        let mut session = self.load(id)?;
        if !session.is_open() {
            return Err(Error::InvalidTransition(format!(
                "session {} already ended",
                id
            )));
        }

        let outcomes = self
            .hooks
            .dispatch(HookEvent::SessionEnd, &self.hook_context(id))
            .await?;
        for warning in outcomes.iter().filter_map(|o| o.warning()) {
            warn!("{}", warning);
        }

        let report = self.dehydrate().await?;
        info!("{}", report.summary());

        session.end_time = Some(Utc::now());
        self.save(&session)?;
        info!("Session {} ended", id);
        Ok((session, report))
    }

    /// Record that a workflow instance ran in this session
    pub fn touch(&self, id: &str, workflow_id: &str) -> Result<Session> {
        let mut session = self.load(id)?;
        if !session.touched_workflow_ids.iter().any(|w| w == workflow_id) {
            session.touched_workflow_ids.push(workflow_id.to_string());
            self.save(&session)?;
        }
        Ok(session)
    }

    /// Fire prompt-submission hooks and merge what they print
    pub async fn submit_prompt(&self, id: &str, prompt: &str) -> Result<Option<String>> {
        let session = self.load(id)?;
        let context = self.hook_context(&session.id).with_prompt(prompt);
        let outcomes = self
            .hooks
            .dispatch(HookEvent::UserPromptSubmit, &context)
            .await?;
        Ok(merged_output(&outcomes))
    }

    /// Push local task records into the tracker.
    ///
    /// Creates tracker records for tasks without a reference, verifies the
    /// references that already exist, and rewrites dependency edges. Running
    /// it twice creates nothing the second time.
    pub async fn hydrate(&self) -> Result<HydrationReport> {
        let mut report = HydrationReport::default();
        let records = self.tasks.load_all()?;

        // Verify references that existed before this pass, concurrently
        let existing: Vec<(String, String)> = records
            .iter()
            .filter_map(|r| r.external_ref.clone().map(|ext| (r.id.clone(), ext)))
            .collect();
        let checks = join_all(
            existing
                .iter()
                .map(|(_, ext)| self.tracker.exists(ext)),
        )
        .await;
        for ((task_id, ext), check) in existing.iter().zip(checks) {
            match check {
                Ok(true) => report.verified.push(task_id.clone()),
                Ok(false) => report.failed.push(SyncFailure {
                    task_id: task_id.clone(),
                    reason: format!("tracker reference {} no longer exists", ext),
                }),
                Err(e) => report.failed.push(SyncFailure {
                    task_id: task_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        // Create missing tracker records
        for record in records.iter().filter(|r| r.external_ref.is_none()) {
            let _guard = self.tasks.lock(&record.id).await;
            let Some(mut current) = self.tasks.get(&record.id)? else {
                continue;
            };
            if current.external_ref.is_some() {
                debug!("Task {} was linked concurrently", current.id);
                continue;
            }

            match self.tracker.create(&current).await {
                Ok(ext) => {
                    current.assign_external_ref(ext.clone())?;
                    // baseline is what the tracker holds, not what was sent
                    current.synced_status = match self.tracker.status(&ext).await {
                        Ok(status) => Some(status),
                        Err(e) => {
                            warn!("Task {}: status of {} unreadable: {}", current.id, ext, e);
                            None
                        }
                    };
                    self.tasks.save(&current)?;
                    debug!("Linked task {} to {}", current.id, ext);
                    report.created.push(current.id.clone());
                }
                Err(e) => report.failed.push(SyncFailure {
                    task_id: current.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        // Rebuild dependency edges from the local graph
        let records = self.tasks.load_all()?;
        let refs: HashMap<&str, &str> = records
            .iter()
            .filter_map(|r| r.external_ref.as_deref().map(|ext| (r.id.as_str(), ext)))
            .collect();

        for record in &records {
            let Some(ext) = record.external_ref.as_deref() else {
                continue;
            };

            let mut dependencies = Vec::new();
            for dep in &record.dependencies {
                match refs.get(dep.as_str()) {
                    Some(dep_ref) => dependencies.push(dep_ref.to_string()),
                    None => report.failed.push(SyncFailure {
                        task_id: record.id.clone(),
                        reason: format!("dependency {} has no tracker reference", dep),
                    }),
                }
            }

            match self.tracker.set_dependencies(ext, &dependencies).await {
                Ok(()) => report.edges += dependencies.len(),
                Err(e) => report.failed.push(SyncFailure {
                    task_id: record.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(report)
    }

    /// Pull tracker status into local records.
    ///
    /// A task whose local status changed since the last sync and whose
    /// tracker status also moved is marked conflicted and left as is.
    pub async fn dehydrate(&self) -> Result<DehydrationReport> {
        let mut report = DehydrationReport::default();

        for record in self.tasks.load_all()? {
            let Some(ext) = record.external_ref.clone() else {
                continue;
            };

            let _guard = self.tasks.lock(&record.id).await;
            let Some(mut current) = self.tasks.get(&record.id)? else {
                continue;
            };

            let external = match self.tracker.status(&ext).await {
                Ok(status) => status,
                Err(e) => {
                    report.failed.push(SyncFailure {
                        task_id: current.id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if external == current.status {
                let changed = current.synced_status != Some(external) || current.conflict.is_some();
                current.synced_status = Some(external);
                current.conflict = None;
                if changed {
                    self.tasks.save(&current)?;
                }
                report.unchanged.push(current.id.clone());
            } else if !current.is_unflushed() {
                debug!("Task {}: {} -> {}", current.id, current.status, external);
                current.status = external;
                current.synced_status = Some(external);
                current.conflict = None;
                self.tasks.save(&current)?;
                report.updated.push(current.id.clone());
            } else if current.synced_status == Some(external) {
                // only the local side moved; it is flushed elsewhere
                report.unchanged.push(current.id.clone());
            } else {
                let conflict = SyncConflict {
                    local: current.status,
                    external,
                    detected_at: Utc::now(),
                };
                warn!("Task {} conflicts with tracker: {}", current.id, conflict);
                current.conflict = Some(conflict.clone());
                self.tasks.save(&current)?;
                report.conflicts.push((current.id.clone(), conflict));
            }
        }

        Ok(report)
    }
}
