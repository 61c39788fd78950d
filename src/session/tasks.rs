//! Local task records
//!
//! One JSON file per record under the tasks directory. Writers take a
//! per-record async lock and re-read the file under it, so two sync passes
//! never interleave on the same record.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Task status, shared vocabulary with the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Review,
    Blocked,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Get the name of this status
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "pending" | "todo" | "open" => Ok(TaskStatus::Pending),
            "inprogress" | "active" | "started" => Ok(TaskStatus::InProgress),
            "review" | "inreview" => Ok(TaskStatus::Review),
            "blocked" | "deferred" => Ok(TaskStatus::Blocked),
            "done" | "complete" | "completed" | "closed" => Ok(TaskStatus::Done),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(Error::Tracker(format!("Unknown task status: {}", s))),
        }
    }
}

/// Local and external status disagree and both changed since the last sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Status held locally
    pub local: TaskStatus,
    /// Status reported by the tracker
    pub external: TaskStatus,
    /// When the conflict was found
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for SyncConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local {} vs tracker {}", self.local, self.external)
    }
}

/// A task as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Local id
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Task type (feature, bug, chore, ...)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Story points
    #[serde(default)]
    pub points: Option<u32>,
    #[serde(default)]
    pub epic: Option<String>,
    /// Local ids this task depends on
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Tracker reference, assigned once by hydration
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Profile this task should run under
    #[serde(default)]
    pub workflow_profile: Option<String>,
    /// Associated file globs
    #[serde(default)]
    pub files: Vec<String>,
    /// Status at the last successful sync
    #[serde(default)]
    pub synced_status: Option<TaskStatus>,
    /// Unresolved sync conflict
    #[serde(default)]
    pub conflict: Option<SyncConflict>,
}

impl TaskRecord {
    /// Create a pending record
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            kind: None,
            priority: None,
            points: None,
            epic: None,
            dependencies: BTreeSet::new(),
            external_ref: None,
            status: TaskStatus::Pending,
            workflow_profile: None,
            files: Vec::new(),
            synced_status: None,
            conflict: None,
        }
    }

    /// Add a dependency on another local record
    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependencies.insert(id.to_string());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Whether the local status changed since the last sync
    pub fn is_unflushed(&self) -> bool {
        self.synced_status != Some(self.status)
    }

    /// Assign the tracker reference; refuses to replace an existing one
    pub fn assign_external_ref(&mut self, external_ref: String) -> Result<()> {
        match &self.external_ref {
            Some(existing) if *existing != external_ref => Err(Error::Tracker(format!(
                "Task {} already has tracker reference {}",
                self.id, existing
            ))),
            _ => {
                self.external_ref = Some(external_ref);
                Ok(())
            }
        }
    }
}

/// Directory of task record files
pub struct TaskStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TaskStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Take the per-record lock
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Load one record
    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_record(&path)?))
    }

    /// Load every record, sorted by id
    pub fn load_all(&self) -> Result<Vec<TaskRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_record(&path) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping task file {}: {}", path.display(), e),
                }
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Write a record atomically (caller holds the record lock)
    pub fn save(&self, record: &TaskRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(self.path_for(&record.id))
            .map_err(|e| Error::Io(e.error))?;

        debug!("Saved task record {}", record.id);
        Ok(())
    }

    /// Lock, save, unlock
    pub async fn put(&self, record: &TaskRecord) -> Result<()> {
        let _guard = self.lock(&record.id).await;
        self.save(record)
    }
}

fn read_record(path: &Path) -> Result<TaskRecord> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
