use crate::error::StoreError;
use crate::gateway::{DeviceState, PersistenceGateway, StoreResult};
use crate::models::{ProgressRecord, Task, TaskDraft, TaskId, TaskKind, DEFAULT_ICON};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use scopeguard::{guard, ScopeGuard};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation: caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check the data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check the data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

fn active_task_key(user_id: &str) -> String {
    format!("active_task_id:{}", user_id)
}

fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let kind = TaskKind::parse(&status).unwrap_or_else(|| {
        warn!("[DB] Unknown task status '{}', treating as GOAL", status);
        TaskKind::Goal
    });
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        duration_minutes: row.get(3)?,
        kind,
        elapsed_seconds: row.get(5)?,
        persistent_seconds: row.get(6)?,
        suspended_at: millis_to_datetime(row.get(7)?),
        icon: row.get(8)?,
    })
}

const TASK_COLUMNS: &str = "id, user_id, task_name, duration, status, elapsed_time, persistent_time, start_time, icon";

/// SQLite-backed Persistence Gateway and device state
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            StoreError::Poisoned(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup, detect corruption before init
        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        if integrity.to_lowercase() != "ok" {
            return Err(StoreError::Unavailable(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        // WAL: лучше защищает от corruption при обрыве записи
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.", e);
        }
        // Every tick writes one row; NORMAL is safe with WAL
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                duration INTEGER NOT NULL,
                status TEXT NOT NULL,
                elapsed_time INTEGER NOT NULL DEFAULT 0,
                persistent_time INTEGER NOT NULL DEFAULT 0,
                start_time INTEGER,
                icon TEXT NOT NULL DEFAULT 'FaSun',
                UNIQUE(user_id, task_name)
            )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS user_progress (
                user_id TEXT PRIMARY KEY,
                total_days_completed INTEGER NOT NULL DEFAULT 0,
                daily_progress TEXT NOT NULL DEFAULT '[]',
                ongoing_progress REAL NOT NULL DEFAULT 0,
                goal_completions TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS app_meta (key TEXT PRIMARY KEY, value TEXT)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id)",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Run `f` inside BEGIN IMMEDIATE … COMMIT.
    /// Any early return (error or panic) rolls back through the scope guard.
    fn in_transaction<T, F>(&self, context: &str, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.lock_conn()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(|e| {
                log_io_error_if_any(context, &e);
                error!("[DB] {}: failed to begin transaction: {}", context, e);
                e
            })?;

        let tx = guard(&*conn, |c| {
            warn!("[DB] {}: rolling back transaction", context);
            let _ = c.execute("ROLLBACK", []);
        });

        let value = f(*tx).map_err(|e| {
            log_io_error_if_any(context, &e);
            error!("[DB] {}: {}", context, e);
            e
        })?;

        tx.execute("COMMIT", []).map_err(|e| {
            log_io_error_if_any(context, &e);
            error!("[DB] {}: failed to commit transaction: {}", context, e);
            e
        })?;
        ScopeGuard::into_inner(tx);
        Ok(value)
    }

    /// UPDATE one task row; zero affected rows means the task is gone
    fn update_task<P: rusqlite::Params>(
        &self,
        context: &str,
        task_id: TaskId,
        sql: &str,
        params: P,
    ) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(sql, params).map_err(|e| {
            log_io_error_if_any(context, &e);
            e
        })?;
        if changed == 0 {
            return Err(StoreError::MissingRow(task_id));
        }
        Ok(())
    }

    pub fn get_app_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM app_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_app_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO app_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_app_meta(&self, key: &str) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM app_meta WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl PersistenceGateway for Database {
    fn get_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE user_id = ?1 ORDER BY id ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>> {
        let conn = self.lock_conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn insert_task(&self, user_id: &str, draft: &TaskDraft) -> StoreResult<Task> {
        let icon = draft
            .icon
            .clone()
            .unwrap_or_else(|| DEFAULT_ICON.to_string());
        let id = self.in_transaction("insert_task", |conn| {
            conn.execute(
                "INSERT INTO tasks (user_id, task_name, duration, status, icon)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    draft.title,
                    draft.duration_minutes,
                    draft.kind.as_str(),
                    icon
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(Task {
            id,
            user_id: user_id.to_string(),
            title: draft.title.clone(),
            duration_minutes: draft.duration_minutes,
            kind: draft.kind,
            elapsed_seconds: 0,
            persistent_seconds: 0,
            suspended_at: None,
            icon,
        })
    }

    fn update_task_fields(&self, task_id: TaskId, draft: &TaskDraft) -> StoreResult<()> {
        match &draft.icon {
            Some(icon) => self.update_task(
                "update_task_fields",
                task_id,
                "UPDATE tasks SET task_name = ?1, duration = ?2, status = ?3, icon = ?4 WHERE id = ?5",
                params![
                    draft.title,
                    draft.duration_minutes,
                    draft.kind.as_str(),
                    icon,
                    task_id
                ],
            ),
            None => self.update_task(
                "update_task_fields",
                task_id,
                "UPDATE tasks SET task_name = ?1, duration = ?2, status = ?3 WHERE id = ?4",
                params![
                    draft.title,
                    draft.duration_minutes,
                    draft.kind.as_str(),
                    task_id
                ],
            ),
        }
    }

    fn upsert_task_elapsed(&self, task_id: TaskId, elapsed_seconds: u64) -> StoreResult<()> {
        self.update_task(
            "upsert_task_elapsed",
            task_id,
            "UPDATE tasks SET elapsed_time = ?1 WHERE id = ?2",
            params![elapsed_seconds, task_id],
        )
    }

    fn upsert_task_suspension(
        &self,
        task_id: TaskId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.update_task(
            "upsert_task_suspension",
            task_id,
            "UPDATE tasks SET start_time = ?1 WHERE id = ?2",
            params![suspended_at.map(|t| t.timestamp_millis()), task_id],
        )
    }

    fn upsert_task_persistent(&self, task_id: TaskId, persistent_seconds: u64) -> StoreResult<()> {
        self.update_task(
            "upsert_task_persistent",
            task_id,
            "UPDATE tasks SET persistent_time = ?1 WHERE id = ?2",
            params![persistent_seconds, task_id],
        )
    }

    fn reset_task_elapsed(&self, task_id: TaskId) -> StoreResult<()> {
        self.update_task(
            "reset_task_elapsed",
            task_id,
            "UPDATE tasks SET elapsed_time = 0 WHERE id = ?1",
            params![task_id],
        )
    }

    fn delete_task(&self, task_id: TaskId) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])
            .map_err(|e| {
                log_io_error_if_any("delete_task", &e);
                e
            })?;
        Ok(())
    }

    fn get_progress(&self, user_id: &str) -> StoreResult<Option<ProgressRecord>> {
        let raw: Option<(u32, String, f64, String)> = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT total_days_completed, daily_progress, ongoing_progress, goal_completions
                 FROM user_progress WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?
        };

        let Some((total_days_completed, daily, ongoing_progress, completions)) = raw else {
            return Ok(None);
        };
        Ok(Some(ProgressRecord {
            total_days_completed,
            daily_progress: serde_json::from_str(&daily)?,
            ongoing_progress,
            goal_completions: serde_json::from_str(&completions)?,
        }))
    }

    fn upsert_progress(&self, user_id: &str, record: &ProgressRecord) -> StoreResult<()> {
        let daily = serde_json::to_string(&record.daily_progress)?;
        let completions = serde_json::to_string(&record.goal_completions)?;
        let now = Utc::now().timestamp();
        self.in_transaction("upsert_progress", |conn| {
            conn.execute(
                "INSERT INTO user_progress
                    (user_id, total_days_completed, daily_progress, ongoing_progress, goal_completions, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    total_days_completed = ?2,
                    daily_progress = ?3,
                    ongoing_progress = ?4,
                    goal_completions = ?5,
                    updated_at = ?6",
                params![
                    user_id,
                    record.total_days_completed,
                    daily,
                    record.ongoing_progress,
                    completions,
                    now
                ],
            )?;
            Ok(())
        })
    }
}

impl DeviceState for Database {
    fn active_task(&self, user_id: &str) -> StoreResult<Option<TaskId>> {
        let Some(raw) = self.get_app_meta(&active_task_key(user_id))? else {
            return Ok(None);
        };
        match raw.trim().parse::<TaskId>() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                warn!("[DB] Ignoring malformed active task marker '{}'", raw);
                Ok(None)
            }
        }
    }

    fn set_active_task(&self, user_id: &str, task_id: Option<TaskId>) -> StoreResult<()> {
        let key = active_task_key(user_id);
        match task_id {
            Some(id) => self.set_app_meta(&key, &id.to_string()),
            None => self.delete_app_meta(&key),
        }
    }
}
