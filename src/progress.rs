//! Progress aggregation. Pure functions, always recomputed from the current
//! elapsed values so repeated calls never drift.

use crate::models::{Task, TaskKind, TaskView};

/// Anything that carries a target and elapsed counters
pub trait Tracked {
    fn kind(&self) -> TaskKind;
    fn duration_minutes(&self) -> u32;
    fn elapsed_seconds(&self) -> u64;
    fn persistent_seconds(&self) -> u64;

    fn target_seconds(&self) -> u64 {
        u64::from(self.duration_minutes()) * 60
    }
}

impl Tracked for Task {
    fn kind(&self) -> TaskKind {
        self.kind
    }
    fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }
    fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }
    fn persistent_seconds(&self) -> u64 {
        self.persistent_seconds
    }
}

impl Tracked for TaskView {
    fn kind(&self) -> TaskKind {
        self.kind
    }
    fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }
    fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }
    fn persistent_seconds(&self) -> u64 {
        self.persistent_seconds
    }
}

/// min(elapsed / target, 1) * 100. A zero target reports 0.
pub fn task_progress(elapsed_seconds: u64, duration_minutes: u32) -> f64 {
    let target = u64::from(duration_minutes) * 60;
    if target == 0 {
        return 0.0;
    }
    let ratio = elapsed_seconds as f64 / target as f64;
    ratio.min(1.0) * 100.0
}

pub fn is_complete(elapsed_seconds: u64, duration_minutes: u32) -> bool {
    duration_minutes > 0 && task_progress(elapsed_seconds, duration_minutes) >= 100.0
}

/// Aggregate over GOAL tasks only:
/// sum(min(elapsed, target)) / sum(target) * 100, 0 when there is no goal time.
pub fn ongoing_progress<'a, T, I>(tasks: I) -> f64
where
    T: Tracked + 'a,
    I: IntoIterator<Item = &'a T>,
{
    goal_ratio(tasks, |t| t.elapsed_seconds())
}

/// Same aggregate over the lifetime counters (persistent_seconds)
pub fn lifetime_progress<'a, T, I>(tasks: I) -> f64
where
    T: Tracked + 'a,
    I: IntoIterator<Item = &'a T>,
{
    goal_ratio(tasks, |t| t.persistent_seconds())
}

fn goal_ratio<'a, T, I, F>(tasks: I, seconds: F) -> f64
where
    T: Tracked + 'a,
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> u64,
{
    let (done, total) = tasks
        .into_iter()
        .filter(|t| t.kind() == TaskKind::Goal)
        .fold((0u64, 0u64), |(done, total), t| {
            let target = t.target_seconds();
            (
                done.saturating_add(seconds(t).min(target)),
                total.saturating_add(target),
            )
        });
    if total == 0 {
        return 0.0;
    }
    done as f64 / total as f64 * 100.0
}
