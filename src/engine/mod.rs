use crate::clock::Clock;
use crate::codec;
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::gateway::{DeviceState, PersistenceGateway, StoreResult};
use crate::models::{EngineSnapshot, ProgressRecord, Task, TaskId, TaskState, TaskView, UserId};
use crate::progress;
use crate::scheduler::{JobHandle, Scheduler};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
mod core;
mod db;
mod rollover;
mod visibility;

/// Timer Engine - FSM одного пользователя.
///
/// Владеет коллекцией задач, единственным активным таймером и планировщиком.
/// Все мутации идут через `&mut self`: драйвер (service) сериализует события
/// в один логический поток, поэтому tick и visibility никогда не гонятся.
pub struct TimerEngine {
    pub(crate) user_id: UserId,
    /// Задачи пользователя, отсортированы по id
    pub(crate) tasks: Vec<TaskEntry>,
    /// Активный таймер - только id задачи, без копии данных
    pub(crate) active: Option<ActiveTimer>,
    pub(crate) progress: ProgressRecord,
    pub(crate) scheduler: Scheduler,
    pub(crate) config: EngineConfig,
    pub(crate) deps: EngineDeps,
    /// Ticks not yet written to the store
    pub(crate) pending_ticks: u32,
    /// Durable fields whose last write failed; retried by `flush_pending_writes`
    pub(crate) pending_writes: BTreeSet<(TaskId, DurableField)>,
}

/// Внешние коллабораторы движка
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn PersistenceGateway>,
    pub device: Arc<dyn DeviceState>,
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        device: Arc<dyn DeviceState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            device,
            clock,
        }
    }
}

/// In-memory view of one task: durable record plus runtime state
#[derive(Debug, Clone)]
pub(crate) struct TaskEntry {
    pub(crate) task: Task,
    pub(crate) state: TaskState,
    /// Live "HH:MM:SS" string
    pub(crate) display: String,
}

impl TaskEntry {
    pub(crate) fn from_task(task: Task) -> Self {
        // Маркер приостановки из хранилища = задача ждёт reconciliation
        let state = if task.suspended_at.is_some() {
            TaskState::Suspended
        } else {
            TaskState::Idle
        };
        let display = codec::format_hms(task.elapsed_seconds);
        Self {
            task,
            state,
            display,
        }
    }

    fn view(&self) -> TaskView {
        let t = &self.task;
        TaskView {
            id: t.id,
            title: t.title.clone(),
            kind: t.kind,
            duration_minutes: t.duration_minutes,
            elapsed_seconds: t.elapsed_seconds,
            persistent_seconds: t.persistent_seconds,
            display: self.display.clone(),
            state: self.state,
            progress: progress::task_progress(t.elapsed_seconds, t.duration_minutes),
            is_complete: progress::is_complete(t.elapsed_seconds, t.duration_minutes),
            icon: t.icon.clone(),
        }
    }
}

/// Timer Session: weak reference (id) + live tick handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActiveTimer {
    pub(crate) task_id: TaskId,
    pub(crate) tick: JobHandle,
}

/// Durable task column mirrored from memory.
///
/// Declaration order is the write order for one task: lifetime total before
/// elapsed, elapsed before a cleared suspension marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum DurableField {
    Persistent,
    Elapsed,
    Suspension,
}

/// Why the running timer is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    User,
    /// Another task is being started
    Switch,
    /// App lost foreground (or exits) while running
    Suspend,
    Rollover,
    Delete,
    SignOut,
}

impl StopReason {
    /// Device marker survives only when the timer is expected to be reconciled later
    /// (suspension) or immediately replaced (switch)
    fn clears_device_marker(self) -> bool {
        !matches!(self, StopReason::Suspend | StopReason::Switch)
    }
}

impl TimerEngine {
    /// Пустой движок без загрузки из хранилища (для тестов и fallback)
    pub fn empty(user_id: impl Into<UserId>, deps: EngineDeps, config: EngineConfig) -> Self {
        Self {
            user_id: user_id.into(),
            tasks: Vec::new(),
            active: None,
            progress: ProgressRecord::default(),
            scheduler: Scheduler::new(),
            config,
            deps,
            pending_ticks: 0,
            pending_writes: BTreeSet::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn active_task_id(&self) -> Option<TaskId> {
        self.active.map(|a| a.task_id)
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.entry(task_id).map(|e| &e.task)
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.entry(task_id).map(|e| e.state)
    }

    pub fn display(&self, task_id: TaskId) -> Option<&str> {
        self.entry(task_id).map(|e| e.display.as_str())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().map(|e| &e.task)
    }

    pub fn progress_record(&self) -> &ProgressRecord {
        &self.progress
    }

    /// Number of tasks in Running state (never more than one)
    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| e.state == TaskState::Running)
            .count()
    }

    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.scheduler.next_deadline_ms()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            user_id: self.user_id.clone(),
            tasks: self.tasks.iter().map(TaskEntry::view).collect(),
            active_task_id: self.active_task_id(),
            ongoing_progress: self.progress.ongoing_progress,
            total_days_completed: self.progress.total_days_completed,
            daily_progress: self.progress.daily_progress.clone(),
            goal_completions: self.progress.goal_completions.clone(),
        }
    }

    pub(crate) fn entry_index(&self, task_id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|e| e.task.id == task_id)
    }

    fn entry(&self, task_id: TaskId) -> Option<&TaskEntry> {
        self.tasks.iter().find(|e| e.task.id == task_id)
    }

    /// Пересчитать ongoing progress из текущих elapsed (никогда не инкрементируется отдельно)
    pub(crate) fn refresh_progress(&mut self) {
        self.progress.ongoing_progress =
            progress::ongoing_progress(self.tasks.iter().map(|e| &e.task));
    }

    /// Write one durable field of a task from its in-memory value.
    ///
    /// A failed write is queued and retried by the next flush. A queued
    /// predecessor is written first and blocks this write if it fails again:
    /// elapsed waits for the lifetime total, a cleared suspension marker waits
    /// for elapsed.
    pub(crate) fn persist_field(
        &mut self,
        task_id: TaskId,
        field: DurableField,
    ) -> StoreResult<()> {
        let Some(task) = self.task(task_id) else {
            self.pending_writes.retain(|(id, _)| *id != task_id);
            return Ok(());
        };
        let (persistent, elapsed, suspended_at) =
            (task.persistent_seconds, task.elapsed_seconds, task.suspended_at);

        let blocker = match field {
            DurableField::Persistent => None,
            DurableField::Elapsed => Some(DurableField::Persistent),
            DurableField::Suspension if suspended_at.is_none() => Some(DurableField::Elapsed),
            DurableField::Suspension => None,
        };
        if let Some(blocker) = blocker.filter(|b| self.pending_writes.contains(&(task_id, *b))) {
            if let Err(e) = self.persist_field(task_id, blocker) {
                self.pending_writes.insert((task_id, field));
                return Err(StoreError::Unavailable(format!(
                    "{:?} of task {} waits for queued {:?} write: {}",
                    field, task_id, blocker, e
                )));
            }
        }

        let store = &self.deps.store;
        let result = match field {
            DurableField::Persistent => store.upsert_task_persistent(task_id, persistent),
            DurableField::Elapsed => store.upsert_task_elapsed(task_id, elapsed),
            DurableField::Suspension => store.upsert_task_suspension(task_id, suspended_at),
        };
        self.record_write(task_id, field, result.is_ok());
        result
    }

    /// Queue (failed) or dequeue (succeeded) a durable field
    pub(crate) fn record_write(&mut self, task_id: TaskId, field: DurableField, ok: bool) {
        if ok {
            self.pending_writes.remove(&(task_id, field));
        } else {
            self.pending_writes.insert((task_id, field));
        }
    }

    /// Retry every queued task write, in per-task write order.
    pub(crate) fn flush_pending_writes(&mut self) {
        if self.pending_writes.is_empty() {
            return;
        }
        let queued: Vec<_> = self.pending_writes.iter().copied().collect();
        let mut failed = 0;
        for (task_id, field) in queued {
            if let Err(e) = self.persist_field(task_id, field) {
                debug!("[DB] Retry of {:?} for task {} failed: {}", field, task_id, e);
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("[DB] {} task write(s) still pending", failed);
        } else {
            debug!("[DB] Pending task writes flushed");
        }
    }

    /// Записать/очистить маркер активной задачи на устройстве. Ошибки только логируются.
    pub(crate) fn mark_device_active(&self, task_id: Option<TaskId>) {
        if let Err(e) = self.deps.device.set_active_task(&self.user_id, task_id) {
            warn!("[TIMER] Failed to update device active-task marker ({:?}): {}", task_id, e);
        }
    }
}
