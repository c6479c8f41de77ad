use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tokio::sync::Mutex;
use tracing::debug;

use devflow_utils::atomic_write::write_file_atomic;
use devflow_utils::canonicalization::emit_jcs;
use devflow_utils::types::{TaskId, TenantId};

use crate::model::Task;
use crate::store::{StoreError, TaskStore, check_revision, sort_and_filter};

/// Task store keeping one canonical-JSON file per task under a directory.
///
/// Writes go through tempfile + fsync + rename, so a reader never observes a
/// partially written task. File I/O runs on tokio's blocking pool.
#[derive(Debug)]
pub struct FileTaskStore {
    root: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// # Errors
    ///
    /// `Unavailable` if the directory cannot be created.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| unavailable(&root, &e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path_for(&self, task_id: &TaskId) -> Result<Utf8PathBuf, StoreError> {
        let id = task_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId {
                task_id: id.to_string(),
            });
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

fn unavailable(path: &Utf8Path, err: &std::io::Error) -> StoreError {
    StoreError::Unavailable {
        reason: format!("{path}: {err}"),
    }
}

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable {
            reason: format!("task store I/O did not complete: {e}"),
        })?
}

fn read_task(path: &Utf8Path) -> Result<Option<Task>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, &e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Unavailable {
            reason: format!("corrupt task file {path}: {e}"),
        })
}

fn write_task(path: &Utf8Path, task: &Task) -> Result<(), StoreError> {
    let json = emit_jcs(task).map_err(|e| StoreError::Unavailable {
        reason: format!("{e:#}"),
    })?;
    write_file_atomic(path, &json).map_err(|e| StoreError::Unavailable {
        reason: format!("failed to write {path}: {e:#}"),
    })?;
    debug!(path = %path, revision = task.revision, "Persisted task");
    Ok(())
}

fn list_tasks(root: &Utf8Path) -> Result<Vec<Task>, StoreError> {
    let mut tasks = Vec::new();
    let entries = fs::read_dir(root).map_err(|e| unavailable(root, &e))?;
    for entry in entries {
        let entry = entry.map_err(|e| unavailable(root, &e))?;
        if let Some(name) = entry.file_name().to_str()
            && name.ends_with(".json")
            && let Some(task) = read_task(&root.join(name))?
        {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.path_for(&task.id)?;
        let task = task.clone();
        let _guard = self.write_lock.lock().await;
        blocking(move || {
            if path.exists() {
                return Err(StoreError::AlreadyExists {
                    task_id: task.id.to_string(),
                });
            }
            write_task(&path, &task)
        })
        .await
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        let path = self.path_for(task_id)?;
        blocking(move || read_task(&path)).await
    }

    async fn save(&self, task: &Task) -> Result<u64, StoreError> {
        let path = self.path_for(&task.id)?;
        let mut next = task.clone();
        let _guard = self.write_lock.lock().await;
        blocking(move || {
            let stored = read_task(&path)?.ok_or_else(|| StoreError::NotFound {
                task_id: next.id.to_string(),
            })?;
            let revision = check_revision(&stored, &next)?;
            next.revision = revision;
            write_task(&path, &next)?;
            Ok(revision)
        })
        .await
    }

    async fn list(&self, tenant: Option<&TenantId>) -> Result<Vec<Task>, StoreError> {
        let root = self.root.clone();
        let tasks = blocking(move || list_tasks(&root)).await?;
        Ok(sort_and_filter(tasks, tenant))
    }
}
