use super::{DurableField, StopReason, TimerEngine};
use crate::codec;
use crate::models::{TaskId, TaskState, Visibility};
use tracing::{debug, info, warn};

impl TimerEngine {
    /// Foreground/background transition from the host.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => self.on_hidden(),
            Visibility::Visible => self.on_visible(),
        }
    }

    /// Фон: записать момент ухода и остановить тик. Задача становится Suspended,
    /// маркер устройства остаётся, чтобы reload тоже мог досчитать время.
    pub(crate) fn on_hidden(&mut self) {
        let Some(active) = self.active else {
            debug!("[VISIBILITY] Hidden with no running task");
            return;
        };
        let task_id = active.task_id;
        let now = self.deps.clock.now();

        if let Some(idx) = self.entry_index(task_id) {
            self.tasks[idx].task.suspended_at = Some(now);
        }
        if let Err(e) = self.persist_field(task_id, DurableField::Suspension) {
            warn!("[VISIBILITY] Failed to persist suspension of task {}: {}", task_id, e);
        }
        if let Err(e) = self.stop_internal(StopReason::Suspend) {
            warn!("[VISIBILITY] Suspend write failed for task {}: {}", task_id, e);
        }
        info!("[VISIBILITY] Task {} suspended at {}", task_id, now);
    }

    /// Foreground: credit every suspended task with the time spent away.
    /// The timer is not auto-resumed.
    pub(crate) fn on_visible(&mut self) {
        let marker = match self.deps.device.active_task(&self.user_id) {
            Ok(marker) => marker,
            Err(e) => {
                warn!("[VISIBILITY] Failed to read device marker: {}", e);
                None
            }
        };

        let mut pending: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|e| e.state == TaskState::Suspended)
            .map(|e| e.task.id)
            .collect();
        if let Some(id) = marker {
            if !pending.contains(&id) && self.active_task_id() != Some(id) {
                pending.push(id);
            }
        }
        if pending.is_empty() {
            debug!("[VISIBILITY] Visible, nothing to reconcile");
            return;
        }

        for task_id in pending {
            self.credit_suspension(task_id);
        }
        if self.active.is_none() {
            self.mark_device_active(None);
        }
    }

    /// Add now - suspended_at to the task's elapsed and clear the marker.
    ///
    /// Returns the credited seconds. Negative gaps (clock moved back) credit 0;
    /// gaps above `max_background_credit_secs` are capped.
    pub(crate) fn credit_suspension(&mut self, task_id: TaskId) -> u64 {
        let Some(idx) = self.entry_index(task_id) else {
            warn!("[VISIBILITY] Cannot reconcile unknown task {}", task_id);
            return 0;
        };
        if self.active_task_id() == Some(task_id) {
            return 0;
        }

        // Перечитать запись: после reload хранилище - единственный источник
        let stored = match self.deps.store.get_task(task_id) {
            Ok(Some(task)) => Some(task),
            Ok(None) => {
                warn!("[VISIBILITY] Task {} missing in store, using memory", task_id);
                None
            }
            Err(e) => {
                warn!("[VISIBILITY] Failed to re-read task {}, using memory: {}", task_id, e);
                None
            }
        };

        let entry = &self.tasks[idx];
        // Маркер в памяти решает, нужно ли зачисление; хранилище даёт точное время
        let suspended_at = entry.task.suspended_at.map(|in_memory| {
            stored
                .as_ref()
                .and_then(|t| t.suspended_at)
                .unwrap_or(in_memory)
        });
        let base = stored
            .as_ref()
            .map_or(entry.task.elapsed_seconds, |t| {
                t.elapsed_seconds.max(entry.task.elapsed_seconds)
            });

        let Some(suspended_at) = suspended_at else {
            debug!("[VISIBILITY] Task {} has no suspension marker", task_id);
            let entry = &mut self.tasks[idx];
            if entry.state == TaskState::Suspended {
                entry.state = TaskState::Idle;
            }
            return 0;
        };

        let gap = (self.deps.clock.now() - suspended_at).num_seconds();
        let max_credit = self.config.max_background_credit_secs;
        let credited = if gap < 0 {
            warn!(
                "[VISIBILITY] Clock went backwards by {}s for task {}, crediting 0",
                -gap, task_id
            );
            0
        } else if gap as u64 > max_credit {
            warn!(
                "[VISIBILITY] Background gap {}s for task {} exceeds cap, crediting {}s",
                gap, task_id, max_credit
            );
            max_credit
        } else {
            gap as u64
        };

        let elapsed = base.saturating_add(credited);
        let entry = &mut self.tasks[idx];
        entry.task.elapsed_seconds = elapsed;
        entry.task.suspended_at = None;
        entry.state = TaskState::Idle;
        entry.display = codec::format_hms(elapsed);

        // Маркер снимается только после записи зачтённого значения,
        // иначе reload зачтёт тот же интервал второй раз
        if let Err(e) = self.persist_field(task_id, DurableField::Elapsed) {
            warn!(
                "[VISIBILITY] Failed to persist credited value for task {}, queued: {}",
                task_id, e
            );
        }
        if let Err(e) = self.persist_field(task_id, DurableField::Suspension) {
            warn!("[VISIBILITY] Suspension marker of task {} still stored, queued: {}", task_id, e);
        }
        self.refresh_progress();
        info!(
            "[VISIBILITY] Task {} credited {}s in background, now {}s",
            task_id, credited, elapsed
        );
        credited
    }
}
