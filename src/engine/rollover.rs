use super::{DurableField, StopReason, TimerEngine};
use crate::codec;
use crate::models::{DayReport, TaskKind, TaskState};
use tracing::{error, info, warn};

impl TimerEngine {
    /// Close the current day.
    ///
    /// Order matters: stop the running timer, credit pending suspensions,
    /// archive the day's aggregate, count finished goals, then move elapsed into
    /// the lifetime counters. Per-task write failures are counted in the report;
    /// the in-memory rollover always completes.
    pub fn complete_day(&mut self) -> DayReport {
        if let Err(e) = self.stop_internal(StopReason::Rollover) {
            warn!("[ROLLOVER] Running task stopped with unsaved value: {}", e);
        }
        let suspended: Vec<_> = self
            .tasks
            .iter()
            .filter(|e| e.state == TaskState::Suspended || e.task.suspended_at.is_some())
            .map(|e| e.task.id)
            .collect();
        for task_id in suspended {
            self.credit_suspension(task_id);
        }

        self.refresh_progress();
        let archived = self.progress.ongoing_progress;

        let mut next = self.progress.clone();
        next.daily_progress.push(archived);
        next.total_days_completed = next.total_days_completed.saturating_add(1);
        next.ongoing_progress = 0.0;

        let mut completed_goals = Vec::new();
        for entry in &self.tasks {
            let task = &entry.task;
            let target = task.target_seconds();
            if task.kind == TaskKind::Goal && target > 0 && task.elapsed_seconds >= target {
                *next.goal_completions.entry(task.id).or_insert(0) += 1;
                completed_goals.push(task.id);
            }
        }

        let mut failed_writes = 0;
        let ids: Vec<_> = self.tasks.iter().map(|e| e.task.id).collect();
        for entry in self.tasks.iter_mut() {
            entry.task.persistent_seconds = entry
                .task
                .persistent_seconds
                .saturating_add(entry.task.elapsed_seconds);
            entry.task.elapsed_seconds = 0;
            entry.task.suspended_at = None;
            entry.state = TaskState::Idle;
            entry.display = codec::ZERO_DISPLAY.to_string();
        }

        for task_id in ids {
            // elapsed сбрасываем в хранилище только после успешного переноса
            if let Err(e) = self.persist_field(task_id, DurableField::Persistent) {
                error!("[ROLLOVER] Failed to persist lifetime total of task {}: {}", task_id, e);
                self.record_write(task_id, DurableField::Elapsed, false);
                failed_writes += 1;
                continue;
            }
            let reset = self.deps.store.reset_task_elapsed(task_id);
            if let Err(e) = &reset {
                error!("[ROLLOVER] Failed to reset elapsed of task {}: {}", task_id, e);
                failed_writes += 1;
            }
            self.record_write(task_id, DurableField::Elapsed, reset.is_ok());
        }

        self.active = None;
        self.progress = next;
        self.mark_device_active(None);
        self.save_progress();

        let report = DayReport {
            day_number: self.progress.total_days_completed,
            archived_progress: archived,
            completed_goals,
            failed_writes,
        };
        if failed_writes > 0 {
            warn!(
                "[ROLLOVER] Day {} closed with {} failed task write(s)",
                report.day_number, failed_writes
            );
        }
        info!(
            "[ROLLOVER] Day {} archived at {:.1}%, {} goal(s) completed",
            report.day_number,
            archived,
            report.completed_goals.len()
        );
        report
    }
}
