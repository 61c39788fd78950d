//! Durable workflow checkpoints
//!
//! One YAML file per instance id. Saves go through a temp file in the same
//! directory and are renamed into place, so readers only ever see a
//! complete snapshot. Writers for one id are serialized by an in-process
//! mutex plus an exclusive lock on `<id>.lock`, which also covers other
//! processes sharing the directory.

use dashmap::DashMap;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::debug;

use super::state::{WorkflowInstance, WorkflowStatus};
use crate::{Error, Result};

/// Persistence for workflow instances
pub trait CheckpointStore: Send + Sync {
    /// Atomically commit a snapshot
    fn save(&self, instance: &WorkflowInstance) -> Result<()>;

    /// Load the last committed snapshot
    fn load(&self, id: &str) -> Result<WorkflowInstance>;

    /// Ids whose status is in `filter` (all ids if empty), sorted
    fn list(&self, filter: &[WorkflowStatus]) -> Result<Vec<String>>;

    /// Remove a checkpoint; missing ids are not an error
    fn delete(&self, id: &str) -> Result<()>;
}

/// YAML checkpoints under a directory
pub struct FileCheckpointStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir` (created on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    /// Directory holding the checkpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", id))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Exclusive advisory lock on `<id>.lock`, released when the file drops.
    ///
    /// Lock files are never removed: unlinking one while another process
    /// waits on it would let two writers in.
    fn lock_file(&self, id: &str) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(format!("{}.lock", id)))?;
        file.lock_exclusive().map_err(|e| Error::CheckpointWrite {
            id: id.to_string(),
            reason: format!("failed to lock: {}", e),
        })?;
        Ok(file)
    }

    fn read(path: &Path, id: &str) -> Result<WorkflowInstance> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CheckpointNotFound(id.to_string())
            } else {
                Error::Io(e)
            }
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse checkpoint {}: {}", id, e)))
    }

    fn write_atomic(&self, instance: &WorkflowInstance) -> std::result::Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;

        let content = serde_yaml::to_string(instance).map_err(|e| e.to_string())?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| e.to_string())?;
        tmp.write_all(content.as_bytes()).map_err(|e| e.to_string())?;
        tmp.as_file().sync_all().map_err(|e| e.to_string())?;
        tmp.persist(self.path_for(&instance.id))
            .map_err(|e| e.error.to_string())?;

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, instance: &WorkflowInstance) -> Result<()> {
        let lock = self.lock_for(&instance.id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _file_lock = self.lock_file(&instance.id)?;

        let path = self.path_for(&instance.id);
        if path.exists() {
            let committed = Self::read(&path, &instance.id)?;
            if instance.revision <= committed.revision {
                return Err(Error::CheckpointConflict {
                    id: instance.id.clone(),
                    revision: instance.revision,
                    committed: committed.revision,
                });
            }
        }

        self.write_atomic(instance)
            .map_err(|reason| Error::CheckpointWrite {
                id: instance.id.clone(),
                reason,
            })?;

        debug!(
            id = %instance.id,
            revision = instance.revision,
            status = %instance.status,
            "checkpoint committed"
        );
        Ok(())
    }

    fn load(&self, id: &str) -> Result<WorkflowInstance> {
        Self::read(&self.path_for(id), id)
    }

    fn list(&self, filter: &[WorkflowStatus]) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "yaml").unwrap_or(true) {
                continue;
            }
            let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            if filter.is_empty() {
                ids.push(id);
                continue;
            }

            match Self::read(&path, &id) {
                Ok(instance) if filter.contains(&instance.status) => ids.push(id),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable checkpoint {}: {}", id, e),
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let file_lock = self.lock_file(id)?;

        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        drop(file_lock);
        drop(guard);
        self.locks.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::profile::ProfileCatalog;
    use crate::workflow::state::{StageOutcome, Transition};
    use tempfile::TempDir;

    fn started(store: &FileCheckpointStore) -> WorkflowInstance {
        let profile = ProfileCatalog::builtin().get("quick-fix").unwrap().clone();
        let pending = WorkflowInstance::new(&profile.name, "checkpoint test");
        store.save(&pending).unwrap();
        let running = pending.apply(Transition::Start, &profile, 3).unwrap();
        store.save(&running).unwrap();
        running
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let running = started(&store);

        assert_eq!(store.load(&running.id).unwrap(), running);
        // no temp files left behind, only the snapshot and its lock
        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![format!("{}.lock", running.id), format!("{}.yaml", running.id)]
        );
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.load("nope"),
            Err(Error::CheckpointNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_stale_revision_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let running = started(&store);

        let mut stale = running.clone();
        stale.revision = 0;
        assert!(matches!(
            store.save(&stale),
            Err(Error::CheckpointConflict { revision: 0, committed: 1, .. })
        ));
        assert!(store.save(&running).is_err());
        assert_eq!(store.load(&running.id).unwrap().revision, running.revision);
    }

    #[test]
    fn test_list_with_filter() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let profile = ProfileCatalog::builtin().get("quick-fix").unwrap().clone();

        let running = started(&store);
        let paused = started(&store)
            .apply(Transition::Interrupt, &profile, 3)
            .unwrap();
        store.save(&paused).unwrap();
        let checking = started(&store)
            .apply(
                Transition::StageFinished(StageOutcome::new("x", 0.5)),
                &profile,
                3,
            )
            .unwrap();
        store.save(&checking).unwrap();

        let mut expected = vec![running.id.clone(), paused.id.clone()];
        expected.sort();
        assert_eq!(
            store
                .list(&[WorkflowStatus::Running, WorkflowStatus::Paused])
                .unwrap(),
            expected
        );
        assert_eq!(store.list(&[]).unwrap().len(), 3);
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let running = started(&store);

        store.delete(&running.id).unwrap();
        store.delete(&running.id).unwrap();
        assert!(store.load(&running.id).is_err());
    }

    #[test]
    fn test_concurrent_saves_for_different_ids() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let profile = ProfileCatalog::builtin().get("quick-fix").unwrap().clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let profile = profile.clone();
                std::thread::spawn(move || {
                    let mut instance = WorkflowInstance::new(&profile.name, "");
                    store.save(&instance).unwrap();
                    instance = instance.apply(Transition::Start, &profile, 3).unwrap();
                    store.save(&instance).unwrap();
                    instance
                })
            })
            .collect();

        for handle in handles {
            let instance = handle.join().unwrap();
            assert_eq!(store.load(&instance.id).unwrap(), instance);
        }
        assert_eq!(store.list(&[WorkflowStatus::Running]).unwrap().len(), 8);
    }

    #[test]
    fn test_concurrent_saves_for_same_id_are_serialized() {
        let dir = TempDir::new().unwrap();
        let profile = ProfileCatalog::builtin().get("quick-fix").unwrap().clone();
        let pending = WorkflowInstance::new(&profile.name, "");
        FileCheckpointStore::new(dir.path()).save(&pending).unwrap();

        // Each writer has its own store, like separate processes, and
        // commits Start then Interrupt then Resume on whatever is committed.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.path().to_path_buf();
                let id = pending.id.clone();
                let profile = profile.clone();
                std::thread::spawn(move || {
                    let store = FileCheckpointStore::new(dir);
                    let mut committed = Vec::new();
                    for _ in 0..20 {
                        let current = store.load(&id).unwrap();
                        let transition = match current.status {
                            WorkflowStatus::Pending => Transition::Start,
                            WorkflowStatus::Running => Transition::Interrupt,
                            _ => Transition::Resume,
                        };
                        let next = current.apply(transition, &profile, 3).unwrap();
                        match store.save(&next) {
                            Ok(()) => committed.push(next.revision),
                            Err(Error::CheckpointConflict { .. }) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    committed
                })
            })
            .collect();

        let mut revisions: Vec<u64> = Vec::new();
        for handle in handles {
            let committed = handle.join().unwrap();
            assert!(committed.windows(2).all(|w| w[0] < w[1]));
            revisions.extend(committed);
        }

        // every accepted revision is distinct and the last one is on disk
        let total = revisions.len();
        revisions.sort();
        revisions.dedup();
        assert_eq!(revisions.len(), total);
        let last = FileCheckpointStore::new(dir.path()).load(&pending.id).unwrap();
        assert_eq!(Some(&last.revision), revisions.last());
        assert_eq!(revisions, (1..=last.revision).collect::<Vec<_>>());
    }
}
