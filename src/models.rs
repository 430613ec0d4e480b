use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-assigned task id (ascending, stable)
pub type TaskId = i64;
/// Authenticated user id
pub type UserId = String;

pub const DEFAULT_ICON: &str = "FaSun";

/// GOAL tasks count toward the daily aggregate, LIMIT tasks are tracked for awareness only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Goal,
    Limit,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Goal => "GOAL",
            TaskKind::Limit => "LIMIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GOAL" => Some(TaskKind::Goal),
            "LIMIT" => Some(TaskKind::Limit),
            _ => None,
        }
    }
}

/// Durable task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    /// Target in minutes (> 0)
    pub duration_minutes: u32,
    pub kind: TaskKind,
    pub elapsed_seconds: u64,
    /// Seconds carried across day rollovers
    pub persistent_seconds: u64,
    /// Suspension marker: set when the app lost foreground while this task was running
    pub suspended_at: Option<DateTime<Utc>>,
    pub icon: String,
}

impl Task {
    pub fn target_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

/// Fields accepted by createOrUpdateTask. `id == None` creates a new task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub id: Option<TaskId>,
    pub title: String,
    pub duration_minutes: u32,
    pub kind: TaskKind,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Per-user daily progress record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub total_days_completed: u32,
    /// One archived percentage per completed day (append-only)
    pub daily_progress: Vec<f64>,
    /// Current day's live percentage (0..=100)
    pub ongoing_progress: f64,
    /// task id → number of days the goal was reached
    pub goal_completions: BTreeMap<TaskId, u32>,
}

/// Runtime state of a task inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Idle,
    Running,
    /// Was running when the app lost foreground; waiting for reconciliation
    Suspended,
}

/// Read-only view of one task for the view layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub title: String,
    pub kind: TaskKind,
    pub duration_minutes: u32,
    pub elapsed_seconds: u64,
    pub persistent_seconds: u64,
    pub display: String,
    pub state: TaskState,
    pub progress: f64,
    pub is_complete: bool,
    pub icon: String,
}

/// Снимок состояния движка для подписчиков (view layer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub user_id: UserId,
    pub tasks: Vec<TaskView>,
    pub active_task_id: Option<TaskId>,
    pub ongoing_progress: f64,
    pub total_days_completed: u32,
    pub daily_progress: Vec<f64>,
    pub goal_completions: BTreeMap<TaskId, u32>,
}

/// Outcome of completeDay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayReport {
    /// 1-based number of the day just closed
    pub day_number: u32,
    pub archived_progress: f64,
    pub completed_goals: Vec<TaskId>,
    /// Per-task store writes that failed (logged, in-memory reset still applied)
    pub failed_writes: usize,
}

/// Foreground/background transition reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Hidden,
    Visible,
}
