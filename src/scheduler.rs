//! Single scheduler for every recurring job the engine owns.
//!
//! Jobs are named; registering a name again replaces (cancels) the previous
//! registration. Each registration gets a fresh generation, so a handle kept
//! by a stale callback can be recognised and dropped. Cancellation is
//! synchronous: once `cancel` returns, `pop_due` never yields that job again.

use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobName {
    /// One-second timer tick of the active task
    Tick,
    /// Periodic progress upsert
    ProgressFlush,
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobName::Tick => write!(f, "tick"),
            JobName::ProgressFlush => write!(f, "progress-flush"),
        }
    }
}

/// Handle of one registration. Equal handles mean the same live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub name: JobName,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct Job {
    generation: u64,
    period_ms: i64,
    next_due_ms: i64,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: HashMap<JobName, Job>,
    next_generation: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` to fire every `period_ms`, first at `now_ms + period_ms`.
    /// An existing registration under the same name is cancelled first.
    pub fn schedule(&mut self, name: JobName, period_ms: u64, now_ms: i64) -> JobHandle {
        self.next_generation += 1;
        let period_ms = i64::try_from(period_ms.max(1)).unwrap_or(i64::MAX);
        if self.jobs.contains_key(&name) {
            debug!("[SCHEDULER] Replacing existing '{}' registration", name);
        }
        self.jobs.insert(
            name,
            Job {
                generation: self.next_generation,
                period_ms,
                next_due_ms: now_ms.saturating_add(period_ms),
            },
        );
        JobHandle {
            name,
            generation: self.next_generation,
        }
    }

    /// Returns true if something was cancelled
    pub fn cancel(&mut self, name: JobName) -> bool {
        self.jobs.remove(&name).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.jobs.clear();
    }

    pub fn is_live(&self, handle: JobHandle) -> bool {
        self.jobs
            .get(&handle.name)
            .map_or(false, |job| job.generation == handle.generation)
    }

    pub fn is_scheduled(&self, name: JobName) -> bool {
        self.jobs.contains_key(&name)
    }

    /// Earliest deadline among live jobs
    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.jobs.values().map(|job| job.next_due_ms).min()
    }

    /// Pop one due occurrence (earliest first, ties by name) and advance it by one period.
    /// Missed periods come out one at a time on subsequent calls.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<JobHandle> {
        let (name, _) = self
            .jobs
            .iter()
            .filter(|(_, job)| job.next_due_ms <= now_ms)
            .map(|(name, job)| (*name, job.next_due_ms))
            .min_by_key(|(name, due)| (*due, *name))?;
        let job = self.jobs.get_mut(&name)?;
        job.next_due_ms = job.next_due_ms.saturating_add(job.period_ms);
        Some(JobHandle {
            name,
            generation: job.generation,
        })
    }
}
