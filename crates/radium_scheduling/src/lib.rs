//! Per-frame task scheduling.

mod dependency_graph;
mod queue;
mod report;
mod task;

pub use queue::{TaskID, TaskQueue};
pub use radium_thread::{TaskError, WorkerID};
pub use report::{ExecutionReport, FailedTask, TaskOutcome, TaskTiming};
pub use task::{FunctionTask, ParameterizedTask, Task};
