//! Persistence Gateway contract plus an in-memory implementation.
//!
//! The engine only talks to these traits; `Database` (SQLite) and
//! `MemoryStore` both implement them.

use crate::error::StoreError;
use crate::models::{ProgressRecord, Task, TaskDraft, TaskId, UserId, DEFAULT_ICON};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable task and progress records
pub trait PersistenceGateway: Send + Sync {
    /// Tasks of a user ordered by id ascending
    fn get_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>>;
    fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>>;
    fn insert_task(&self, user_id: &str, draft: &TaskDraft) -> StoreResult<Task>;
    fn update_task_fields(&self, task_id: TaskId, draft: &TaskDraft) -> StoreResult<()>;
    fn upsert_task_elapsed(&self, task_id: TaskId, elapsed_seconds: u64) -> StoreResult<()>;
    fn upsert_task_suspension(
        &self,
        task_id: TaskId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    fn upsert_task_persistent(&self, task_id: TaskId, persistent_seconds: u64) -> StoreResult<()>;
    fn reset_task_elapsed(&self, task_id: TaskId) -> StoreResult<()>;
    fn delete_task(&self, task_id: TaskId) -> StoreResult<()>;
    fn get_progress(&self, user_id: &str) -> StoreResult<Option<ProgressRecord>>;
    /// Full-state upsert keyed by user id (safe to repeat)
    fn upsert_progress(&self, user_id: &str, record: &ProgressRecord) -> StoreResult<()>;
}

/// Device-local state that survives a reload (active task marker)
pub trait DeviceState: Send + Sync {
    fn active_task(&self, user_id: &str) -> StoreResult<Option<TaskId>>;
    fn set_active_task(&self, user_id: &str, task_id: Option<TaskId>) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: BTreeMap<TaskId, Task>,
    progress: HashMap<UserId, ProgressRecord>,
    active: HashMap<UserId, TaskId>,
    next_id: TaskId,
}

/// In-memory store. Used by tests (with failure injection) and as a fallback
/// when the SQLite file cannot be opened.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_marker_clears: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail only `upsert_task_suspension(_, None)`; other writes go through
    pub fn set_fail_marker_clears(&self, fail: bool) {
        self.fail_marker_clears.store(fail, Ordering::SeqCst);
    }

    /// Seed a record directly, bypassing validation
    pub fn put_task(&self, task: Task) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.next_id = state.next_id.max(task.id);
        state.tasks.insert(task.id, task);
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn read(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read failure injected".to_string()));
        }
        self.lock()
    }

    fn write(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write failure injected".to_string()));
        }
        self.lock()
    }

    fn with_task<F>(&self, task_id: TaskId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Task),
    {
        let mut state = self.write()?;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::MissingRow(task_id))?;
        f(task);
        Ok(())
    }
}

impl PersistenceGateway for MemoryStore {
    fn get_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>> {
        let state = self.read()?;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.read()?.tasks.get(&task_id).cloned())
    }

    fn insert_task(&self, user_id: &str, draft: &TaskDraft) -> StoreResult<Task> {
        let mut state = self.write()?;
        state.next_id += 1;
        let task = Task {
            id: state.next_id,
            user_id: user_id.to_string(),
            title: draft.title.clone(),
            duration_minutes: draft.duration_minutes,
            kind: draft.kind,
            elapsed_seconds: 0,
            persistent_seconds: 0,
            suspended_at: None,
            icon: draft.icon.clone().unwrap_or_else(|| DEFAULT_ICON.to_string()),
        };
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn update_task_fields(&self, task_id: TaskId, draft: &TaskDraft) -> StoreResult<()> {
        self.with_task(task_id, |t| {
            t.title = draft.title.clone();
            t.duration_minutes = draft.duration_minutes;
            t.kind = draft.kind;
            if let Some(icon) = &draft.icon {
                t.icon = icon.clone();
            }
        })
    }

    fn upsert_task_elapsed(&self, task_id: TaskId, elapsed_seconds: u64) -> StoreResult<()> {
        self.with_task(task_id, |t| t.elapsed_seconds = elapsed_seconds)
    }

    fn upsert_task_suspension(
        &self,
        task_id: TaskId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        if suspended_at.is_none() && self.fail_marker_clears.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("marker clear failure injected".to_string()));
        }
        self.with_task(task_id, |t| t.suspended_at = suspended_at)
    }

    fn upsert_task_persistent(&self, task_id: TaskId, persistent_seconds: u64) -> StoreResult<()> {
        self.with_task(task_id, |t| t.persistent_seconds = persistent_seconds)
    }

    fn reset_task_elapsed(&self, task_id: TaskId) -> StoreResult<()> {
        self.with_task(task_id, |t| t.elapsed_seconds = 0)
    }

    fn delete_task(&self, task_id: TaskId) -> StoreResult<()> {
        self.write()?.tasks.remove(&task_id);
        Ok(())
    }

    fn get_progress(&self, user_id: &str) -> StoreResult<Option<ProgressRecord>> {
        Ok(self.read()?.progress.get(user_id).cloned())
    }

    fn upsert_progress(&self, user_id: &str, record: &ProgressRecord) -> StoreResult<()> {
        self.write()?
            .progress
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }
}

impl DeviceState for MemoryStore {
    fn active_task(&self, user_id: &str) -> StoreResult<Option<TaskId>> {
        Ok(self.lock()?.active.get(user_id).copied())
    }

    fn set_active_task(&self, user_id: &str, task_id: Option<TaskId>) -> StoreResult<()> {
        let mut state = self.lock()?;
        match task_id {
            Some(id) => state.active.insert(user_id.to_string(), id),
            None => state.active.remove(user_id),
        };
        Ok(())
    }
}
