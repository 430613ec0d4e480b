use super::{StopReason, TaskEntry, TimerEngine};
use crate::config::EngineConfig;
use crate::engine::EngineDeps;
use crate::models::{ProgressRecord, TaskId, UserId};
use crate::scheduler::JobName;
use tracing::{debug, error, info, warn};

impl TimerEngine {
    /// Загрузка движка пользователя из хранилища.
    ///
    /// Никогда не падает: ошибки чтения логируются, движок стартует с тем,
    /// что удалось прочитать.
    pub fn load(user_id: impl Into<UserId>, deps: EngineDeps, config: EngineConfig) -> Self {
        let mut engine = Self::empty(user_id, deps, config);
        engine.restore_state();

        let now_ms = engine.deps.clock.now_millis();
        let flush_ms = engine.config.progress_flush_secs.saturating_mul(1000);
        engine.scheduler.schedule(JobName::ProgressFlush, flush_ms, now_ms);
        engine
    }

    fn restore_state(&mut self) {
        match self.deps.store.get_progress(&self.user_id) {
            Ok(Some(record)) => {
                debug!("[DB] Progress restored: {} day(s) completed", record.total_days_completed);
                self.progress = record;
            }
            Ok(None) => {
                info!("[DB] No progress record for user, creating default");
                if let Err(e) = self
                    .deps
                    .store
                    .upsert_progress(&self.user_id, &ProgressRecord::default())
                {
                    warn!("[DB] Failed to create default progress record: {}", e);
                }
            }
            Err(e) => error!("[DB] Failed to load progress, starting from default: {}", e),
        }

        match self.deps.store.get_tasks(&self.user_id) {
            Ok(mut tasks) => {
                tasks.sort_by_key(|t| t.id);
                self.tasks = tasks.into_iter().map(TaskEntry::from_task).collect();
            }
            Err(e) => error!("[DB] Failed to load tasks: {}", e),
        }

        self.reconcile_on_load();
        self.refresh_progress();
        info!(
            "[DB] Loaded {} task(s), ongoing progress {:.1}%",
            self.tasks.len(),
            self.progress.ongoing_progress
        );
    }

    /// Reload path: a task that was running when the app went away carries a
    /// suspension marker; credit it now. The timer never auto-resumes.
    fn reconcile_on_load(&mut self) {
        let marker = match self.deps.device.active_task(&self.user_id) {
            Ok(marker) => marker,
            Err(e) => {
                warn!("[DB] Failed to read device marker: {}", e);
                None
            }
        };
        let suspended: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|e| e.task.suspended_at.is_some())
            .map(|e| e.task.id)
            .collect();

        if let Some(id) = marker {
            if !suspended.contains(&id) {
                info!(
                    "[DB] Task {} was running without a suspension marker, keeping last persisted value",
                    id
                );
            }
        }
        for task_id in suspended {
            self.credit_suspension(task_id);
        }
        if marker.is_some() {
            self.mark_device_active(None);
        }
    }

    /// Retry queued task writes, then upsert the progress record.
    /// Failures are logged; the next flush retries.
    pub fn save_progress(&mut self) {
        self.flush_pending_writes();
        self.refresh_progress();
        match self.deps.store.upsert_progress(&self.user_id, &self.progress) {
            Ok(()) => debug!("[PROGRESS] Saved ({:.1}%)", self.progress.ongoing_progress),
            Err(e) => warn!("[PROGRESS] Failed to save progress: {}", e),
        }
    }

    /// Выход из приложения. Запущенный таймер считается ушедшим в фон,
    /// чтобы следующий запуск досчитал время отсутствия.
    pub fn shutdown(&mut self) {
        if self.active.is_some() {
            info!("[DB] Exiting with a running timer, recording suspension");
            self.on_hidden();
        }
        self.save_progress();
        self.scheduler.cancel_all();
    }

    /// Sign-out: stop (no suspension), flush and drop every per-user job.
    pub fn close(&mut self) {
        if let Err(e) = self.stop_internal(StopReason::SignOut) {
            warn!("[DB] Final write on sign-out failed: {}", e);
        }
        self.save_progress();
        self.scheduler.cancel_all();
        info!("[DB] Engine for user closed");
    }
}
