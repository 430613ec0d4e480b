//! Summary view: lifetime totals and a paged week of archived days.

use crate::codec;
use crate::models::{EngineSnapshot, TaskId, TaskKind};
use crate::progress;
use serde::Serialize;

pub const DAYS_PER_PAGE: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCell {
    /// 1-based day number
    pub day_number: u32,
    /// None for days that have not been completed yet
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalTally {
    pub task_id: TaskId,
    pub title: String,
    pub completions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_days_completed: u32,
    pub total_tracked_seconds: u64,
    pub total_tracked_display: String,
    pub lifetime_progress: f64,
    pub ongoing_progress: f64,
    pub week_offset: u32,
    pub week: Vec<DayCell>,
    pub goals: Vec<GoalTally>,
}

impl Summary {
    /// `week_offset` None selects the page holding the latest completed day
    pub fn build(snapshot: &EngineSnapshot, week_offset: Option<u32>) -> Self {
        let total_tracked_seconds = snapshot
            .tasks
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.persistent_seconds));
        let week_offset =
            week_offset.unwrap_or_else(|| default_week_offset(snapshot.total_days_completed));
        let goals = snapshot
            .tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Goal)
            .map(|t| GoalTally {
                task_id: t.id,
                title: t.title.clone(),
                completions: snapshot.goal_completions.get(&t.id).copied().unwrap_or(0),
            })
            .collect();

        Self {
            total_days_completed: snapshot.total_days_completed,
            total_tracked_seconds,
            total_tracked_display: codec::format_hms(total_tracked_seconds),
            lifetime_progress: progress::lifetime_progress(&snapshot.tasks),
            ongoing_progress: snapshot.ongoing_progress,
            week_offset,
            week: week_page(&snapshot.daily_progress, week_offset),
            goals,
        }
    }
}

/// Offset of the page containing the most recent day
pub fn default_week_offset(total_days_completed: u32) -> u32 {
    if total_days_completed < DAYS_PER_PAGE {
        return 0;
    }
    (total_days_completed - 1) / DAYS_PER_PAGE * DAYS_PER_PAGE
}

/// Seven cells starting after `offset` days
pub fn week_page(daily_progress: &[f64], offset: u32) -> Vec<DayCell> {
    (1..=DAYS_PER_PAGE)
        .map(|i| {
            let day_number = offset.saturating_add(i);
            DayCell {
                day_number,
                progress: daily_progress.get(day_number as usize - 1).copied(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offset_pages_by_week() {
        assert_eq!(default_week_offset(0), 0);
        assert_eq!(default_week_offset(6), 0);
        assert_eq!(default_week_offset(7), 0);
        assert_eq!(default_week_offset(8), 7);
        assert_eq!(default_week_offset(14), 7);
        assert_eq!(default_week_offset(15), 14);
    }

    #[test]
    fn week_page_marks_future_days_empty() {
        let page = week_page(&[10.0, 20.0, 30.0], 0);
        assert_eq!(page.len(), 7);
        assert_eq!(page[0].progress, Some(10.0));
        assert_eq!(page[2].progress, Some(30.0));
        assert_eq!(page[3].progress, None);
        assert_eq!(page[6].day_number, 7);
    }
}
