//! External tracker adapters
//!
//! The tracker is only touched through [`Tracker`]: create a record, check a
//! reference still exists, set dependency edges, read back a status.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use super::tasks::{TaskRecord, TaskStatus};
use crate::{Error, Result};

/// Synchronization contract with an external issue tracker
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Tracker name for logs
    fn name(&self) -> &str;

    /// Create an external record and return its reference
    async fn create(&self, record: &TaskRecord) -> Result<String>;

    /// Whether a reference still resolves
    async fn exists(&self, external_ref: &str) -> Result<bool>;

    /// Replace the dependency edges of a record
    async fn set_dependencies(&self, external_ref: &str, dependencies: &[String]) -> Result<()>;

    /// Current external status
    async fn status(&self, external_ref: &str) -> Result<TaskStatus>;
}

#[derive(Debug, Clone)]
struct MemoryTask {
    title: String,
    status: TaskStatus,
    dependencies: Vec<String>,
}

/// In-process tracker for dry runs and tests
#[derive(Default)]
pub struct MemoryTracker {
    tasks: Mutex<BTreeMap<String, MemoryTask>>,
    next_id: AtomicUsize,
}

impl MemoryTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of external records
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether no records exist
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Change a status from the tracker's side
    pub async fn set_status(&self, external_ref: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(external_ref)
            .ok_or_else(|| Error::Tracker(format!("No such record: {}", external_ref)))?;
        task.status = status;
        Ok(())
    }

    /// Delete a record from the tracker's side
    pub async fn remove(&self, external_ref: &str) {
        self.tasks.lock().await.remove(external_ref);
    }

    /// Dependency edges of a record
    pub async fn dependencies(&self, external_ref: &str) -> Vec<String> {
        self.tasks
            .lock()
            .await
            .get(external_ref)
            .map(|t| t.dependencies.clone())
            .unwrap_or_default()
    }

    /// Title of a record
    pub async fn title(&self, external_ref: &str) -> Option<String> {
        self.tasks
            .lock()
            .await
            .get(external_ref)
            .map(|t| t.title.clone())
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, record: &TaskRecord) -> Result<String> {
        let mut tasks = self.tasks.lock().await;
        let external_ref = format!("MEM-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        tasks.insert(
            external_ref.clone(),
            MemoryTask {
                title: record.title.clone(),
                status: record.status,
                dependencies: Vec::new(),
            },
        );
        Ok(external_ref)
    }

    async fn exists(&self, external_ref: &str) -> Result<bool> {
        Ok(self.tasks.lock().await.contains_key(external_ref))
    }

    async fn set_dependencies(&self, external_ref: &str, dependencies: &[String]) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(external_ref)
            .ok_or_else(|| Error::Tracker(format!("No such record: {}", external_ref)))?;
        task.dependencies = dependencies.to_vec();
        Ok(())
    }

    async fn status(&self, external_ref: &str) -> Result<TaskStatus> {
        self.tasks
            .lock()
            .await
            .get(external_ref)
            .map(|t| t.status)
            .ok_or_else(|| Error::Tracker(format!("No such record: {}", external_ref)))
    }
}

/// Tracker backed by a SCUD task group on disk.
///
/// References look like `<group>:<task id>`.
pub struct ScudTracker {
    project_root: Option<PathBuf>,
    group: Option<String>,
    write_lock: Mutex<()>,
}

impl ScudTracker {
    /// Create a tracker for a project root (current directory when `None`)
    /// and group (the active group when `None`)
    pub fn new(project_root: Option<PathBuf>, group: Option<String>) -> Self {
        Self {
            project_root,
            group,
            write_lock: Mutex::new(()),
        }
    }

    fn storage(&self) -> Result<scud::storage::Storage> {
        let root = match &self.project_root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        Ok(scud::storage::Storage::new(Some(root)))
    }

    fn group_tag(&self, storage: &scud::storage::Storage) -> Result<String> {
        if let Some(group) = &self.group {
            return Ok(group.clone());
        }
        storage
            .get_active_group()
            .map_err(|e| Error::Tracker(format!("Failed to get active group: {}", e)))?
            .ok_or_else(|| Error::Tracker("No active SCUD group set".to_string()))
    }

    fn load(&self) -> Result<(scud::storage::Storage, String, scud::models::Phase)> {
        let storage = self.storage()?;
        let tag = self.group_tag(&storage)?;
        let phase = storage
            .load_group(&tag)
            .map_err(|e| Error::Tracker(format!("Failed to load group {}: {}", tag, e)))?;
        Ok((storage, tag, phase))
    }

    fn split_ref(external_ref: &str) -> Result<(&str, &str)> {
        external_ref
            .split_once(':')
            .ok_or_else(|| Error::Tracker(format!("Malformed SCUD reference: {}", external_ref)))
    }
}

/// Map a SCUD status onto the local vocabulary
fn from_scud(status: &scud::models::TaskStatus) -> TaskStatus {
    use scud::models::TaskStatus as Scud;
    match status {
        Scud::Pending => TaskStatus::Pending,
        Scud::InProgress => TaskStatus::InProgress,
        // split into subtasks that are still being worked
        Scud::Expanded => TaskStatus::InProgress,
        Scud::Review => TaskStatus::Review,
        Scud::Blocked | Scud::Deferred | Scud::Failed => TaskStatus::Blocked,
        Scud::Done => TaskStatus::Done,
        Scud::Cancelled => TaskStatus::Cancelled,
    }
}

fn to_scud(status: TaskStatus) -> scud::models::TaskStatus {
    use scud::models::TaskStatus as Scud;
    match status {
        TaskStatus::Pending => Scud::Pending,
        TaskStatus::InProgress => Scud::InProgress,
        TaskStatus::Review => Scud::Review,
        TaskStatus::Blocked => Scud::Blocked,
        TaskStatus::Done => Scud::Done,
        TaskStatus::Cancelled => Scud::Cancelled,
    }
}

#[async_trait]
impl Tracker for ScudTracker {
    fn name(&self) -> &str {
        "scud"
    }

    async fn create(&self, record: &TaskRecord) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let (storage, tag, mut phase) = self.load()?;

        // Prefer the local id; suffix it if the group already uses it
        let mut task_id = record.id.clone();
        let mut n = 1;
        while phase.get_task(&task_id).is_some() {
            n += 1;
            task_id = format!("{}-{}", record.id, n);
        }

        let mut task = scud::models::Task::new(
            task_id.clone(),
            record.title.clone(),
            record.description.clone(),
        );
        task.set_status(to_scud(record.status));
        phase.add_task(task);
        storage
            .update_group(&tag, &phase)
            .map_err(|e| Error::Tracker(format!("Failed to save group {}: {}", tag, e)))?;

        debug!("Created SCUD task {}:{}", tag, task_id);
        Ok(format!("{}:{}", tag, task_id))
    }

    async fn exists(&self, external_ref: &str) -> Result<bool> {
        let (group, task_id) = Self::split_ref(external_ref)?;
        let storage = self.storage()?;
        match storage.load_group(group) {
            Ok(phase) => Ok(phase.get_task(task_id).is_some()),
            Err(e) => {
                debug!("SCUD group {} not loadable: {}", group, e);
                Ok(false)
            }
        }
    }

    async fn set_dependencies(&self, external_ref: &str, dependencies: &[String]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (group, task_id) = Self::split_ref(external_ref)?;
        let storage = self.storage()?;
        let mut phase = storage
            .load_group(group)
            .map_err(|e| Error::Tracker(format!("Failed to load group {}: {}", group, e)))?;

        // Edges across groups cannot be expressed in SCUD
        let mut edges = Vec::new();
        for dep in dependencies {
            let (dep_group, dep_id) = Self::split_ref(dep)?;
            if dep_group == group {
                edges.push(dep_id.to_string());
            } else {
                debug!("Skipping cross-group edge {} -> {}", external_ref, dep);
            }
        }

        let task = phase
            .get_task_mut(task_id)
            .ok_or_else(|| Error::Tracker(format!("Task not found: {}", external_ref)))?;
        task.dependencies = edges;

        storage
            .update_group(group, &phase)
            .map_err(|e| Error::Tracker(format!("Failed to save group {}: {}", group, e)))
    }

    async fn status(&self, external_ref: &str) -> Result<TaskStatus> {
        let (group, task_id) = Self::split_ref(external_ref)?;
        let storage = self.storage()?;
        let phase = storage
            .load_group(group)
            .map_err(|e| Error::Tracker(format!("Failed to load group {}: {}", group, e)))?;
        phase
            .get_task(task_id)
            .map(|t| from_scud(&t.status))
            .ok_or_else(|| Error::Tracker(format!("Task not found: {}", external_ref)))
    }
}
