use super::{ActiveTimer, DurableField, StopReason, TaskEntry, TimerEngine};
use crate::codec;
use crate::error::EngineError;
use crate::models::{Task, TaskDraft, TaskId, TaskState};
use crate::scheduler::{JobHandle, JobName};
use tracing::{debug, error, info, warn};

/// Максимальная длина названия задачи (в символах)
pub const MAX_TITLE_CHARS: usize = 22;
/// Максимальная длительность цели/лимита в минутах (сутки)
pub const MAX_DURATION_MINUTES: u32 = 1440;

impl TimerEngine {
    /// Start a timer for `task_id`.
    ///
    /// Same task already running: no-op. Another task running: it is stopped
    /// first so at most one Running task ever exists. A Suspended task gets its
    /// background credit before the new tick loop starts.
    pub fn start(&mut self, task_id: TaskId) -> Result<(), EngineError> {
        let Some(idx) = self.entry_index(task_id) else {
            warn!("[TIMER] start: task {} not found, ignoring", task_id);
            return Err(EngineError::NotFound(task_id));
        };

        if let Some(active) = self.active {
            if active.task_id == task_id {
                debug!("[FSM] start: task {} is already running (no-op)", task_id);
                return Ok(());
            }
            info!("[FSM] Switching from task {} to task {}", active.task_id, task_id);
            if let Err(e) = self.stop_internal(StopReason::Switch) {
                warn!(
                    "[TIMER] Previous task {} stopped but final value not persisted: {}",
                    active.task_id, e
                );
            }
        }

        if self.tasks[idx].state == TaskState::Suspended {
            self.credit_suspension(task_id);
        }

        let now_ms = self.deps.clock.now_millis();
        let tick = self
            .scheduler
            .schedule(JobName::Tick, self.config.tick_period_ms, now_ms);
        self.active = Some(ActiveTimer { task_id, tick });
        self.pending_ticks = 0;

        let entry = &mut self.tasks[idx];
        entry.state = TaskState::Running;
        entry.task.suspended_at = None;
        entry.display = codec::format_hms(entry.task.elapsed_seconds);
        info!("[TIMER] Task {} started from {}", task_id, entry.display);

        if let Err(e) = self.persist_field(task_id, DurableField::Suspension) {
            warn!("[DB] Suspension marker of task {} not cleared yet: {}", task_id, e);
        }
        self.mark_device_active(Some(task_id));
        self.refresh_progress();
        Ok(())
    }

    /// Stop the running timer. No running timer: no-op.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.stop_internal(StopReason::User)?.is_none() {
            debug!("[FSM] stop: no running task (no-op)");
        }
        Ok(())
    }

    /// Общий путь остановки. Тик отменяется синхронно, до любых записей,
    /// поэтому поздний тик не может перезаписать финальное значение.
    ///
    /// In-memory state is updated even when the final write fails; the error is
    /// returned so the caller can decide whether to surface it.
    pub(crate) fn stop_internal(
        &mut self,
        reason: StopReason,
    ) -> Result<Option<TaskId>, EngineError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.scheduler.cancel(JobName::Tick);
        self.pending_ticks = 0;

        let task_id = active.task_id;
        let Some(idx) = self.entry_index(task_id) else {
            warn!("[FSM] Active task {} vanished before stop", task_id);
            return Ok(None);
        };

        let entry = &mut self.tasks[idx];
        // Финальное значение берём из отображаемой строки
        let final_seconds = match codec::parse_hms(&entry.display) {
            Some(seconds) => seconds,
            None => {
                warn!(
                    "[TIMER] Unparseable display '{}' for task {}, using counter {}s",
                    entry.display, task_id, entry.task.elapsed_seconds
                );
                entry.task.elapsed_seconds
            }
        };
        entry.task.elapsed_seconds = final_seconds;
        entry.display = codec::format_hms(final_seconds);
        entry.state = if reason == StopReason::Suspend {
            TaskState::Suspended
        } else {
            TaskState::Idle
        };
        info!("[TIMER] Task {} stopped at {}s ({:?})", task_id, final_seconds, reason);

        if reason.clears_device_marker() {
            self.mark_device_active(None);
        }
        self.refresh_progress();

        // При ошибке значение остаётся в очереди и дописывается следующим flush
        self.persist_field(task_id, DurableField::Elapsed).map_err(|e| {
            error!(
                "[DB] Failed to persist final value {}s for task {}: {}",
                final_seconds, task_id, e
            );
            EngineError::from(e)
        })?;
        Ok(Some(task_id))
    }

    /// Run every scheduler job that is due at the clock's current time.
    /// Returns how many occurrences fired.
    pub fn run_due(&mut self) -> usize {
        let now_ms = self.deps.clock.now_millis();
        let mut fired = 0;
        while let Some(job) = self.scheduler.pop_due(now_ms) {
            fired += 1;
            match job.name {
                JobName::Tick => self.on_tick(job),
                JobName::ProgressFlush => self.save_progress(),
            }
        }
        fired
    }

    fn on_tick(&mut self, job: JobHandle) {
        let Some(active) = self.active else {
            debug!("[TIMER] Tick with no active task, dropped");
            return;
        };
        if active.tick != job {
            debug!("[TIMER] Stale tick (generation {}), dropped", job.generation);
            return;
        }
        let Some(idx) = self.entry_index(active.task_id) else {
            warn!("[TIMER] Tick for missing task {}", active.task_id);
            return;
        };

        let entry = &mut self.tasks[idx];
        entry.task.elapsed_seconds = entry.task.elapsed_seconds.saturating_add(1);
        entry.display = codec::format_hms(entry.task.elapsed_seconds);
        let elapsed = entry.task.elapsed_seconds;

        self.pending_ticks = self.pending_ticks.saturating_add(1);
        if self.pending_ticks >= self.config.persist_every_ticks.max(1) {
            // Абсолютное значение: повторная запись безопасна
            match self.persist_field(active.task_id, DurableField::Elapsed) {
                Ok(()) => self.pending_ticks = 0,
                Err(e) => warn!(
                    "[TIMER] Failed to persist {}s for task {}, retry on next tick: {}",
                    elapsed, active.task_id, e
                ),
            }
        }
        self.refresh_progress();
    }

    /// Create (no id) or edit (with id) a task after validation.
    pub fn save_task(&mut self, draft: TaskDraft) -> Result<Task, EngineError> {
        let draft = self.validate_draft(draft)?;

        let Some(task_id) = draft.id else {
            let task = self
                .deps
                .store
                .insert_task(&self.user_id, &draft)
                .map_err(|e| {
                    error!("[DB] Failed to insert task '{}': {}", draft.title, e);
                    EngineError::from(e)
                })?;
            info!("[TIMER] Task {} '{}' created", task.id, task.title);
            self.tasks.push(TaskEntry::from_task(task.clone()));
            self.tasks.sort_by_key(|e| e.task.id);
            self.refresh_progress();
            return Ok(task);
        };

        let Some(idx) = self.entry_index(task_id) else {
            warn!("[TIMER] edit: task {} not found", task_id);
            return Err(EngineError::NotFound(task_id));
        };
        if let Err(e) = self.deps.store.update_task_fields(task_id, &draft) {
            warn!("[DB] Failed to persist edit of task {} (kept in memory): {}", task_id, e);
        }
        let task = &mut self.tasks[idx].task;
        task.title = draft.title;
        task.duration_minutes = draft.duration_minutes;
        task.kind = draft.kind;
        if let Some(icon) = draft.icon {
            task.icon = icon;
        }
        let updated = task.clone();
        info!("[TIMER] Task {} updated", task_id);
        self.refresh_progress();
        Ok(updated)
    }

    /// Delete a task, stopping it first if it is the running one.
    pub fn delete_task(&mut self, task_id: TaskId) -> Result<(), EngineError> {
        if self.entry_index(task_id).is_none() {
            warn!("[TIMER] delete: task {} not found", task_id);
            return Err(EngineError::NotFound(task_id));
        }
        if self.active_task_id() == Some(task_id) {
            if let Err(e) = self.stop_internal(StopReason::Delete) {
                debug!("[TIMER] Final write before delete failed: {}", e);
            }
        }
        if let Err(e) = self.deps.store.delete_task(task_id) {
            warn!("[DB] Failed to delete task {}: {}", task_id, e);
        }
        self.tasks.retain(|e| e.task.id != task_id);
        self.pending_writes.retain(|(id, _)| *id != task_id);
        self.progress.goal_completions.remove(&task_id);
        info!("[TIMER] Task {} deleted", task_id);
        self.save_progress();
        Ok(())
    }

    fn validate_draft(&self, mut draft: TaskDraft) -> Result<TaskDraft, EngineError> {
        draft.title = draft.title.trim().to_string();
        if draft.title.is_empty() {
            return Err(EngineError::InvalidInput("task name cannot be empty".to_string()));
        }
        if draft.title.chars().count() > MAX_TITLE_CHARS {
            return Err(EngineError::InvalidInput(format!(
                "task name cannot exceed {} characters",
                MAX_TITLE_CHARS
            )));
        }
        if draft.duration_minutes == 0 || draft.duration_minutes > MAX_DURATION_MINUTES {
            return Err(EngineError::InvalidInput(format!(
                "duration must be between 1 and {} minutes",
                MAX_DURATION_MINUTES
            )));
        }
        let duplicate = self
            .tasks
            .iter()
            .any(|e| e.task.title == draft.title && Some(e.task.id) != draft.id);
        if duplicate {
            return Err(EngineError::InvalidInput(format!("task '{}' already exists", draft.title)));
        }
        Ok(draft)
    }
}
