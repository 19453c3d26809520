//! Outcomes of executing a frame's tasks.

use crate::TaskID;
use radium_thread::{TaskError, WorkerID};
use std::time::{Duration, Instant};

/// How the execution of a single task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// The task was processed without error.
    Completed,
    /// Processing the task returned an error or panicked.
    Failed,
    /// The task was never processed because one of the tasks it depends on,
    /// directly or transitively, failed.
    Skipped,
}

/// When and where a task was processed.
#[derive(Clone, Debug)]
pub struct TaskTiming {
    pub name: String,
    /// The worker thread that processed the task, or [`None`] if it was
    /// processed on the calling thread.
    pub worker: Option<WorkerID>,
    pub start: Instant,
    pub end: Instant,
}

/// A task whose processing failed, together with the resulting error.
#[derive(Debug)]
pub struct FailedTask {
    pub id: TaskID,
    pub name: String,
    pub error: TaskError,
}

/// Summary of one execution of the tasks in a
/// [`TaskQueue`](crate::TaskQueue).
///
/// Task names are listed in an order where each task comes after the tasks
/// it depends on.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
    pub skipped: Vec<String>,
    /// Timings of every processed task, sorted by start time.
    pub timings: Vec<TaskTiming>,
}

impl TaskTiming {
    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

impl ExecutionReport {
    /// Whether every task in the execution completed.
    pub fn all_completed(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn n_tasks(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }

    /// Returns the timing of the first processed task with the given name.
    pub fn timing_of(&self, name: &str) -> Option<&TaskTiming> {
        self.timings.iter().find(|timing| timing.name == name)
    }

    pub(crate) fn log_problems(&self) {
        for failed_task in &self.failed {
            radium_log::error!("Task {} failed: {:#}", failed_task.name, failed_task.error);
        }
        for name in &self.skipped {
            radium_log::warn!(
                "Task {} was skipped because a task it depends on did not complete",
                name
            );
        }
    }

    pub(crate) fn log_timings(&self) {
        for timing in &self.timings {
            radium_log::debug!(
                "Task {} took {:.3} ms on {}",
                timing.name,
                timing.duration().as_secs_f64() * 1e3,
                timing
                    .worker
                    .map_or_else(|| "calling thread".to_owned(), |id| format!("worker {id}"))
            );
        }
    }
}
