//! Per-frame task queue.

use crate::{
    dependency_graph::TaskDependencyGraph,
    report::{ExecutionReport, FailedTask, TaskOutcome, TaskTiming},
    task::{FunctionTask, ParameterizedTask, Task},
};
use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;
use radium_thread::{
    TaskClosureReturnValue, TaskError, TaskIndex, ThreadPool, ThreadPoolChannel, WorkerID,
};
use std::{
    any::Any,
    collections::HashMap,
    fmt, io,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};

/// Identifier issued by a [`TaskQueue`] when a task is registered. An ID is
/// only valid until the queue is flushed, after which it is rejected as
/// unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskID {
    index: u32,
    frame: u32,
}

/// A scheduler that executes the tasks registered for a frame on a pool of
/// worker threads, respecting the dependencies declared between them.
///
/// Each frame goes through a single-threaded build phase
/// ([`register_task`](Self::register_task),
/// [`add_dependency`](Self::add_dependency) and friends), an execution phase
/// started by [`start_tasks`](Self::start_tasks) and joined by
/// [`wait_for_tasks`](Self::wait_for_tasks), and a reset by
/// [`flush_task_queue`](Self::flush_task_queue) that keeps the worker threads
/// alive for the next frame.
///
/// A task that fails causes every task depending on it, directly or
/// transitively, to be skipped. Tasks that do not depend on the failed task
/// are unaffected, including tasks that merely share a dependent with it.
#[derive(Debug)]
pub struct TaskQueue {
    frame: u32,
    tasks: Vec<Arc<dyn Task>>,
    dependency_graph: TaskDependencyGraph,
    pending_dependencies: Vec<PendingDependency>,
    phase: QueuePhase,
    execution_state: Option<Arc<TaskExecutionState>>,
    timings: Vec<TaskTiming>,
    thread_pool: TaskQueueThreadPool,
}

/// Type of message sent to worker threads in a [`TaskQueue`].
type TaskMessage = (Arc<TaskExecutionState>, TaskIndex);

type TaskQueueThreadPool = ThreadPool<TaskMessage>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePhase {
    Building,
    Executing,
    Finished,
}

/// A dependency where one side is identified by name and only resolved when
/// the tasks are started.
#[derive(Clone, Debug)]
enum PendingDependency {
    OnName {
        dependency_name: String,
        dependent_idx: usize,
    },
    ForName {
        dependency_idx: usize,
        dependent_name: String,
    },
}

#[derive(Debug)]
struct TaskExecutionState {
    frame: u32,
    task_ordering: TaskOrdering,
}

/// A list of tasks ordered according to the following criteria:
/// - All tasks without dependencies come first in the list.
/// - Every task comes after all of the tasks it depends on.
#[derive(Debug)]
struct TaskOrdering {
    tasks: Vec<OrderedTask>,
    n_dependencyless_tasks: usize,
}

/// A wrapper for a [`Task`] inside a [`TaskOrdering`] that includes some
/// dependency information and execution state.
#[derive(Debug)]
struct OrderedTask {
    task: Arc<dyn Task>,
    registration_idx: usize,
    n_dependencies: usize,
    indices_of_dependent_tasks: Vec<usize>,
    completed_dependency_count: AtomicUsize,
    poisoned: AtomicBool,
    record: Mutex<TaskRecord>,
}

#[derive(Debug, Default)]
struct TaskRecord {
    outcome: Option<TaskOutcome>,
    timing: Option<TaskTiming>,
}

#[derive(Debug)]
enum Settlement {
    Completed,
    Failed(TaskError),
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum TaskReady {
    Yes,
    No,
}

impl TaskID {
    /// Position of the task in the registration order of its frame.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The frame the ID was issued in.
    pub fn frame(&self) -> u32 {
        self.frame
    }
}

impl fmt::Display for TaskID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} (frame {})", self.index, self.frame)
    }
}

impl TaskQueue {
    /// Creates a new task queue that will execute tasks using the given
    /// number of worker threads.
    pub fn new(n_workers: NonZeroUsize) -> Self {
        Self {
            frame: 0,
            tasks: Vec::new(),
            dependency_graph: TaskDependencyGraph::new(),
            pending_dependencies: Vec::new(),
            phase: QueuePhase::Building,
            execution_state: None,
            timings: Vec::new(),
            thread_pool: ThreadPool::new(n_workers, &Self::execute_task_and_schedule_dependents),
        }
    }

    /// Creates a new task queue using one worker thread less than the
    /// available hardware parallelism, but at least one.
    pub fn with_default_worker_count() -> Self {
        Self::new(default_worker_count())
    }

    /// Returns the number of worker threads used to execute tasks.
    pub fn n_workers(&self) -> usize {
        self.thread_pool.n_workers().get()
    }

    /// Returns the number of tasks registered for the current frame.
    pub fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the index of the current frame, which is incremented on every
    /// flush.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Whether tasks have been started and not yet waited for.
    pub fn is_executing(&self) -> bool {
        self.phase == QueuePhase::Executing
    }

    /// Whether the given ID refers to a task registered in the current frame.
    pub fn has_task(&self, task_id: TaskID) -> bool {
        self.task_idx(task_id).is_ok()
    }

    /// Returns the name of the task with the given ID, if it is registered in
    /// the current frame.
    pub fn task_name(&self, task_id: TaskID) -> Option<&str> {
        self.task_idx(task_id)
            .ok()
            .map(|task_idx| self.tasks[task_idx].name())
    }

    /// Returns the ID of the first task registered under the given name in
    /// the current frame.
    pub fn task_id(&self, name: &str) -> Option<TaskID> {
        self.find_task_idx(name)
            .map(|task_idx| self.create_task_id(task_idx))
    }

    /// Takes ownership of the given task and includes it among the tasks to
    /// execute this frame.
    ///
    /// # Errors
    /// Returns an error if the tasks of the current frame have already been
    /// started.
    pub fn register_task(&mut self, task: impl Task + 'static) -> Result<TaskID> {
        self.ensure_building("register tasks")?;

        let task_idx = self.tasks.len();
        if u32::try_from(task_idx).is_err() {
            bail!("Too many tasks registered in frame {}", self.frame);
        }

        radium_log::trace!("Registering task {} ({})", task.name(), task_idx);

        self.dependency_graph.add_task(task_idx);
        self.tasks.push(Arc::new(task));

        Ok(self.create_task_id(task_idx))
    }

    /// Initializes the given task with the given parameters and registers
    /// it.
    ///
    /// # Errors
    /// See [`register_task`](Self::register_task).
    pub fn register_parameterized_task<T>(
        &mut self,
        mut task: T,
        parameters: T::Parameters,
    ) -> Result<TaskID>
    where
        T: ParameterizedTask + 'static,
    {
        task.init(parameters);
        self.register_task(task)
    }

    /// Replaces the task with the given ID by a task with the same name that
    /// does nothing. Dependencies on and of the task are kept, so ordering
    /// through it still holds. Returns `false` if the ID is unknown or the
    /// tasks have already been started.
    pub fn remove_task(&mut self, task_id: TaskID) -> bool {
        if self.phase != QueuePhase::Building {
            radium_log::debug!("Ignoring removal of {} after tasks were started", task_id);
            return false;
        }
        match self.task_idx(task_id) {
            Ok(task_idx) => {
                let name = self.tasks[task_idx].name().to_owned();
                radium_log::trace!("Removing task {} ({})", name, task_idx);
                self.tasks[task_idx] = Arc::new(FunctionTask::noop(name));
                true
            }
            Err(error) => {
                radium_log::debug!("Ignoring task removal: {}", error);
                false
            }
        }
    }

    /// Declares that the task `dependent` must not start before the task
    /// `dependency` has completed.
    ///
    /// # Errors
    /// Returns an error, leaving the dependencies unchanged, if:
    /// - The tasks have already been started.
    /// - Either ID does not refer to a task registered this frame.
    /// - The two IDs are equal.
    /// - The dependency has already been declared.
    pub fn add_dependency(&mut self, dependency: TaskID, dependent: TaskID) -> Result<()> {
        self.ensure_building("add dependencies")?;
        let dependency_idx = self.task_idx(dependency)?;
        let dependent_idx = self.task_idx(dependent)?;
        self.add_dependency_between(dependency_idx, dependent_idx)
    }

    /// Like [`add_dependency`](Self::add_dependency), but with the dependency
    /// identified by the name of a task registered earlier this frame.
    /// Returns `false` if there is no task with the given name.
    ///
    /// # Errors
    /// See [`add_dependency`](Self::add_dependency).
    pub fn add_dependency_on_name(
        &mut self,
        dependency_name: &str,
        dependent: TaskID,
    ) -> Result<bool> {
        self.ensure_building("add dependencies")?;
        let dependent_idx = self.task_idx(dependent)?;
        let Some(dependency_idx) = self.find_task_idx(dependency_name) else {
            return Ok(false);
        };
        self.add_dependency_between(dependency_idx, dependent_idx)?;
        Ok(true)
    }

    /// Like [`add_dependency`](Self::add_dependency), but with the dependent
    /// identified by the name of a task registered earlier this frame.
    /// Returns `false` if there is no task with the given name.
    ///
    /// # Errors
    /// See [`add_dependency`](Self::add_dependency).
    pub fn add_dependent_by_name(
        &mut self,
        dependency: TaskID,
        dependent_name: &str,
    ) -> Result<bool> {
        self.ensure_building("add dependencies")?;
        let dependency_idx = self.task_idx(dependency)?;
        let Some(dependent_idx) = self.find_task_idx(dependent_name) else {
            return Ok(false);
        };
        self.add_dependency_between(dependency_idx, dependent_idx)?;
        Ok(true)
    }

    /// Declares that the task `dependent` must follow whichever task, if
    /// any, is registered under `dependency_name` when the tasks are started.
    /// If no such task has been registered by then, the dependency is
    /// dropped with a warning.
    ///
    /// # Errors
    /// Returns an error if the tasks have already been started or the ID is
    /// unknown.
    pub fn add_pending_dependency(
        &mut self,
        dependency_name: impl Into<String>,
        dependent: TaskID,
    ) -> Result<()> {
        self.ensure_building("add dependencies")?;
        let dependent_idx = self.task_idx(dependent)?;
        self.pending_dependencies.push(PendingDependency::OnName {
            dependency_name: dependency_name.into(),
            dependent_idx,
        });
        Ok(())
    }

    /// Declares that whichever task, if any, is registered under
    /// `dependent_name` when the tasks are started must follow the task
    /// `dependency`. If no such task has been registered by then, the
    /// dependency is dropped with a warning.
    ///
    /// # Errors
    /// Returns an error if the tasks have already been started or the ID is
    /// unknown.
    pub fn add_pending_dependent(
        &mut self,
        dependency: TaskID,
        dependent_name: impl Into<String>,
    ) -> Result<()> {
        self.ensure_building("add dependencies")?;
        let dependency_idx = self.task_idx(dependency)?;
        self.pending_dependencies.push(PendingDependency::ForName {
            dependency_idx,
            dependent_name: dependent_name.into(),
        });
        Ok(())
    }

    /// Resolves pending dependencies and begins executing the registered
    /// tasks on the worker threads. Returns as soon as all tasks without
    /// dependencies have been dispatched.
    ///
    /// # Errors
    /// Returns an error if the tasks have already been started this frame or
    /// if the dependencies are circular. In the latter case no task is
    /// executed, and [`wait_for_tasks`](Self::wait_for_tasks) returns
    /// immediately.
    pub fn start_tasks(&mut self) -> Result<()> {
        self.ensure_building("start tasks")?;

        let state = Arc::new(self.prepare_execution()?);
        let n_tasks = state.task_ordering().n_tasks();

        radium_log::debug!(
            "Starting {} tasks for frame {} on {} workers",
            n_tasks,
            self.frame,
            self.n_workers()
        );

        self.phase = QueuePhase::Executing;

        // Only the tasks without dependencies are dispatched here. The
        // workers dispatch each remaining task once its dependencies settle.
        self.thread_pool.execute(
            (0..state.task_ordering().n_dependencyless_tasks())
                .map(|task_idx| (Arc::clone(&state), task_idx)),
            n_tasks,
        );

        self.execution_state = Some(state);

        Ok(())
    }

    /// Blocks until every started task has either been processed or skipped,
    /// then returns a report of the execution. Failed and skipped tasks are
    /// also logged. Returns an empty report immediately if no tasks are
    /// executing.
    ///
    /// There is no timeout: a task that never returns from
    /// [`process`](Task::process) blocks this call indefinitely.
    pub fn wait_for_tasks(&mut self) -> ExecutionReport {
        if self.phase != QueuePhase::Executing {
            return ExecutionReport::default();
        }
        let Some(state) = self.execution_state.as_ref() else {
            return ExecutionReport::default();
        };

        let errors = match self.thread_pool.wait_until_done() {
            Ok(()) => HashMap::new(),
            Err(errors) => errors.into_errors().collect(),
        };

        let report = state.create_report(errors);
        report.log_problems();
        report.log_timings();

        self.timings.clone_from(&report.timings);
        self.phase = QueuePhase::Finished;

        report
    }

    /// Executes all registered tasks on the calling thread, with the same
    /// ordering and failure semantics as on the worker threads, and then
    /// flushes the queue.
    ///
    /// # Errors
    /// Returns an error if the tasks have already been started or the
    /// dependencies are circular. The queue is flushed in the latter case.
    pub fn run_tasks_in_this_thread(&mut self) -> Result<ExecutionReport> {
        self.ensure_building("run tasks")?;

        let state = match self.prepare_execution() {
            Ok(state) => state,
            Err(error) => {
                self.flush_task_queue();
                return Err(error);
            }
        };

        radium_log::debug!(
            "Running {} tasks for frame {} on the calling thread",
            state.task_ordering().n_tasks(),
            self.frame
        );

        let mut errors = HashMap::new();

        for task_idx in 0..state.task_ordering().n_tasks() {
            let poison_dependents = match state.settle_task(task_idx, None) {
                Settlement::Completed => false,
                Settlement::Failed(error) => {
                    errors.insert(task_idx, error);
                    true
                }
                Settlement::Skipped => true,
            };
            // Tasks are visited in dependency order, so readiness needs no
            // tracking here
            for _ready_task_idx in state.release_dependents(task_idx, poison_dependents) {}
        }

        let report = state.create_report(errors);
        report.log_problems();
        report.log_timings();

        self.flush_task_queue();

        Ok(report)
    }

    /// Returns the timings recorded by the last
    /// [`wait_for_tasks`](Self::wait_for_tasks) of the current frame.
    pub fn timings(&self) -> &[TaskTiming] {
        &self.timings
    }

    /// Returns the outcome of the task with the given ID, if it has settled.
    pub fn task_outcome(&self, task_id: TaskID) -> Option<TaskOutcome> {
        let task_idx = self.task_idx(task_id).ok()?;
        self.execution_state
            .as_ref()?
            .task_ordering()
            .tasks()
            .iter()
            .find(|ordered_task| ordered_task.registration_idx == task_idx)?
            .outcome()
    }

    /// Removes all registered tasks and dependencies, making the queue ready
    /// for the next frame. The worker threads are kept. If tasks are still
    /// executing, this first waits for them to settle.
    pub fn flush_task_queue(&mut self) {
        if self.phase == QueuePhase::Executing {
            radium_log::warn!("Flushing task queue before waiting for tasks");
            self.wait_for_tasks();
        }

        radium_log::debug!(
            "Flushing {} tasks from frame {}",
            self.tasks.len(),
            self.frame
        );

        self.tasks.clear();
        self.dependency_graph.clear();
        self.pending_dependencies.clear();
        self.execution_state = None;
        self.timings.clear();
        self.phase = QueuePhase::Building;
        self.frame = self.frame.wrapping_add(1);
    }

    /// Writes the registered tasks and their dependencies in Graphviz DOT
    /// format. Pending dependencies on names that are not registered are
    /// written with a `?` appended to the name.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_task_graph(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writeln!(writer, "digraph tasks {{")?;

        for task in &self.tasks {
            writeln!(writer, "\"{}\"", task.name())?;
        }

        for (dependency_idx, dependent_idx) in self.dependency_graph.dependencies() {
            writeln!(
                writer,
                "\"{}\" -> \"{}\"",
                self.tasks[dependency_idx].name(),
                self.tasks[dependent_idx].name()
            )?;
        }

        for pending in &self.pending_dependencies {
            let (dependency_name, dependent_name) = match pending {
                PendingDependency::OnName {
                    dependency_name,
                    dependent_idx,
                } => (
                    self.dot_name_of_pending(dependency_name),
                    self.tasks[*dependent_idx].name().to_owned(),
                ),
                PendingDependency::ForName {
                    dependency_idx,
                    dependent_name,
                } => (
                    self.tasks[*dependency_idx].name().to_owned(),
                    self.dot_name_of_pending(dependent_name),
                ),
            };
            writeln!(writer, "\"{dependency_name}\" -> \"{dependent_name}\"")?;
        }

        writeln!(writer, "}}")
    }

    /// This is the function called by worker threads in the [`ThreadPool`]
    /// when they receive an execution instruction.
    fn execute_task_and_schedule_dependents(
        channel: &ThreadPoolChannel<TaskMessage>,
        (state, first_task_idx): TaskMessage,
    ) -> TaskClosureReturnValue {
        let worker_id = channel.owning_worker_id();

        let mut task_idx = first_task_idx;
        let mut n_settled_tasks = 0;

        loop {
            let task_name = state.task_ordering().task(task_idx).task().name();

            radium_log::trace!("Worker {} obtained task {}", worker_id, task_name);

            let settlement = radium_log::with_trace_logging!(
                "Worker {} settling task {}", worker_id, task_name;
                state.settle_task(task_idx, Some(worker_id))
            );
            n_settled_tasks += 1;

            let (poison_dependents, error) = match settlement {
                Settlement::Completed => (false, None),
                Settlement::Failed(error) => (true, Some(error)),
                Settlement::Skipped => (true, None),
            };

            // Find each of the tasks that depend on this one, and increment
            // its count of settled dependencies. We keep track of any
            // dependent tasks that have no unsettled dependencies left as a
            // result of settling this task.
            let mut ready_dependent_task_indices =
                state.release_dependents(task_idx, poison_dependents);

            // A failure must be returned right away, so the worker only
            // continues with a ready dependent after a success or a skip
            let next_task_idx = if error.is_none() {
                ready_dependent_task_indices.next()
            } else {
                None
            };

            for ready_dependent_task_idx in ready_dependent_task_indices {
                radium_log::trace!(
                    "Worker {} scheduling execution of task {}",
                    worker_id,
                    state
                        .task_ordering()
                        .task(ready_dependent_task_idx)
                        .task()
                        .name()
                );
                channel.send_execute_instruction((Arc::clone(&state), ready_dependent_task_idx));
            }

            if let Some(error) = error {
                return TaskClosureReturnValue::failure(n_settled_tasks, task_idx, error);
            }

            match next_task_idx {
                Some(ready_dependent_task_idx) => {
                    task_idx = ready_dependent_task_idx;
                }
                None => return TaskClosureReturnValue::success(n_settled_tasks),
            }
        }
    }

    fn prepare_execution(&mut self) -> Result<TaskExecutionState> {
        self.resolve_pending_dependencies();
        let task_ordering = TaskOrdering::new(&self.tasks, &self.dependency_graph)?;
        Ok(TaskExecutionState {
            frame: self.frame,
            task_ordering,
        })
    }

    fn resolve_pending_dependencies(&mut self) {
        for pending in std::mem::take(&mut self.pending_dependencies) {
            let resolved = match &pending {
                PendingDependency::OnName {
                    dependency_name,
                    dependent_idx,
                } => self
                    .find_task_idx(dependency_name)
                    .map(|dependency_idx| (dependency_idx, *dependent_idx)),
                PendingDependency::ForName {
                    dependency_idx,
                    dependent_name,
                } => self
                    .find_task_idx(dependent_name)
                    .map(|dependent_idx| (*dependency_idx, dependent_idx)),
            };

            match resolved {
                Some((dependency_idx, dependent_idx)) => {
                    if dependency_idx == dependent_idx {
                        radium_log::warn!(
                            "Ignoring pending dependency of task {} on itself",
                            self.tasks[dependent_idx].name()
                        );
                    } else if self
                        .dependency_graph
                        .add_dependency(dependency_idx, dependent_idx)
                    {
                        radium_log::trace!(
                            "Resolved pending dependency {} -> {}",
                            self.tasks[dependency_idx].name(),
                            self.tasks[dependent_idx].name()
                        );
                    }
                }
                None => {
                    radium_log::warn!(
                        "Pending dependency {} was not resolved",
                        self.describe_pending(&pending)
                    );
                }
            }
        }
    }

    fn add_dependency_between(&mut self, dependency_idx: usize, dependent_idx: usize) -> Result<()> {
        if dependency_idx == dependent_idx {
            bail!(
                "Task {} cannot depend on itself",
                self.tasks[dependent_idx].name()
            );
        }
        if self
            .dependency_graph
            .has_dependency(dependency_idx, dependent_idx)
        {
            bail!(
                "Task {} already depends on task {}",
                self.tasks[dependent_idx].name(),
                self.tasks[dependency_idx].name()
            );
        }
        self.dependency_graph
            .add_dependency(dependency_idx, dependent_idx);
        Ok(())
    }

    fn ensure_building(&self, action: &str) -> Result<()> {
        match self.phase {
            QueuePhase::Building => Ok(()),
            QueuePhase::Executing => bail!("Cannot {} while tasks are executing", action),
            QueuePhase::Finished => bail!(
                "Cannot {} before the task queue has been flushed",
                action
            ),
        }
    }

    fn task_idx(&self, task_id: TaskID) -> Result<usize> {
        let task_idx = task_id.index();
        if task_id.frame != self.frame || task_idx >= self.tasks.len() {
            return Err(anyhow!("Unknown {}", task_id));
        }
        Ok(task_idx)
    }

    fn find_task_idx(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.name() == name)
    }

    fn create_task_id(&self, task_idx: usize) -> TaskID {
        TaskID {
            index: task_idx as u32,
            frame: self.frame,
        }
    }

    fn dot_name_of_pending(&self, name: &str) -> String {
        if self.find_task_idx(name).is_some() {
            name.to_owned()
        } else {
            format!("{name}?")
        }
    }

    fn describe_pending(&self, pending: &PendingDependency) -> String {
        match pending {
            PendingDependency::OnName {
                dependency_name,
                dependent_idx,
            } => format!(
                "of {} on {}",
                self.tasks[*dependent_idx].name(),
                dependency_name
            ),
            PendingDependency::ForName {
                dependency_idx,
                dependent_name,
            } => format!(
                "of {} on {}",
                dependent_name,
                self.tasks[*dependency_idx].name()
            ),
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if self.phase == QueuePhase::Executing {
            // Workers must not be terminated while tasks are in flight
            let _ = self.thread_pool.wait_until_done();
        }
    }
}

impl TaskExecutionState {
    fn task_ordering(&self) -> &TaskOrdering {
        &self.task_ordering
    }

    /// Processes the task, or skips it if a task it depends on did not
    /// complete, and records the outcome.
    fn settle_task(&self, task_idx: usize, worker_id: Option<WorkerID>) -> Settlement {
        let ordered_task = self.task_ordering.task(task_idx);
        let task = ordered_task.task();

        if ordered_task.is_poisoned() {
            radium_log::trace!("Skipping task {}", task.name());
            ordered_task.record(TaskOutcome::Skipped, None);
            return Settlement::Skipped;
        }

        let start = Instant::now();
        let result = process_catching_panic(task);
        let end = Instant::now();

        let timing = TaskTiming {
            name: task.name().to_owned(),
            worker: worker_id,
            start,
            end,
        };

        match result {
            Ok(()) => {
                ordered_task.record(TaskOutcome::Completed, Some(timing));
                Settlement::Completed
            }
            Err(error) => {
                ordered_task.record(TaskOutcome::Failed, Some(timing));
                Settlement::Failed(error)
            }
        }
    }

    /// Marks the given task as settled for each of its dependents, first
    /// poisoning them if requested. Returns the indices of dependents that
    /// became ready as a result. The returned iterator must be consumed.
    fn release_dependents(
        &self,
        task_idx: usize,
        poison: bool,
    ) -> impl Iterator<Item = usize> + '_ {
        self.task_ordering
            .task(task_idx)
            .indices_of_dependent_tasks()
            .iter()
            .filter_map(move |&dependent_task_idx| {
                let dependent_task = self.task_ordering.task(dependent_task_idx);
                if poison {
                    dependent_task.poison();
                }
                match dependent_task.complete_dependency() {
                    TaskReady::Yes => Some(dependent_task_idx),
                    TaskReady::No => None,
                }
            })
    }

    fn create_report(&self, mut errors: HashMap<TaskIndex, TaskError>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (task_idx, ordered_task) in self.task_ordering.tasks().iter().enumerate() {
            let name = ordered_task.task().name().to_owned();
            let TaskRecord { outcome, timing } = ordered_task.take_record();

            match outcome {
                Some(TaskOutcome::Completed) => report.completed.push(name),
                Some(TaskOutcome::Failed) => {
                    let error = errors
                        .remove(&task_idx)
                        .unwrap_or_else(|| anyhow!("Task failed without reporting an error"));
                    report.failed.push(FailedTask {
                        id: TaskID {
                            index: ordered_task.registration_idx as u32,
                            frame: self.frame,
                        },
                        name,
                        error,
                    });
                }
                Some(TaskOutcome::Skipped) => report.skipped.push(name),
                None => {
                    radium_log::error!("Task {} never settled", name);
                }
            }

            // Keep the outcome available for queries until the flush
            ordered_task.record.lock().outcome = outcome;

            report.timings.extend(timing);
        }

        report.timings.sort_by_key(|timing| timing.start);

        report
    }
}

impl TaskOrdering {
    fn new(tasks: &[Arc<dyn Task>], dependency_graph: &TaskDependencyGraph) -> Result<Self> {
        let ordered_task_indices = dependency_graph
            .obtain_ordered_task_indices()
            .map_err(|cycle| {
                anyhow!(
                    "Found circular task dependencies involving task {}",
                    tasks[cycle.node_id()].name()
                )
            })?;

        // Map from registration index to index in `ordered_task_indices`
        let mut positions = vec![0; ordered_task_indices.len()];
        for (position, &task_idx) in ordered_task_indices.iter().enumerate() {
            positions[task_idx] = position;
        }

        let tasks: Vec<_> = ordered_task_indices
            .iter()
            .map(|&task_idx| {
                let indices_of_dependent_tasks = dependency_graph
                    .find_dependent_task_indices(task_idx)
                    .map(|dependent_task_idx| positions[dependent_task_idx])
                    .collect();

                OrderedTask::new(
                    Arc::clone(&tasks[task_idx]),
                    task_idx,
                    dependency_graph.n_dependencies(task_idx),
                    indices_of_dependent_tasks,
                )
            })
            .collect();

        let n_dependencyless_tasks = tasks
            .iter()
            .position(|task| task.n_dependencies() > 0)
            .unwrap_or(tasks.len());

        Ok(Self {
            tasks,
            n_dependencyless_tasks,
        })
    }

    fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn n_dependencyless_tasks(&self) -> usize {
        self.n_dependencyless_tasks
    }

    fn task(&self, idx: usize) -> &OrderedTask {
        &self.tasks[idx]
    }

    fn tasks(&self) -> &[OrderedTask] {
        &self.tasks
    }
}

impl OrderedTask {
    fn new(
        task: Arc<dyn Task>,
        registration_idx: usize,
        n_dependencies: usize,
        indices_of_dependent_tasks: Vec<usize>,
    ) -> Self {
        Self {
            task,
            registration_idx,
            n_dependencies,
            indices_of_dependent_tasks,
            completed_dependency_count: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
            record: Mutex::new(TaskRecord::default()),
        }
    }

    fn task(&self) -> &dyn Task {
        self.task.as_ref()
    }

    fn n_dependencies(&self) -> usize {
        self.n_dependencies
    }

    fn indices_of_dependent_tasks(&self) -> &[usize] {
        &self.indices_of_dependent_tasks
    }

    /// Increments the count of settled dependencies.
    ///
    /// # Returns
    /// An enum indicating whether the task has no unsettled dependencies left
    /// and is thus ready to be settled itself.
    fn complete_dependency(&self) -> TaskReady {
        // The acquire-release increment also publishes any poisoning done by
        // the settling worker to the worker that observes readiness
        let previous_count = self
            .completed_dependency_count
            .fetch_add(1, Ordering::AcqRel);

        assert!(previous_count < self.n_dependencies());

        if previous_count + 1 == self.n_dependencies() {
            TaskReady::Yes
        } else {
            TaskReady::No
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn record(&self, outcome: TaskOutcome, timing: Option<TaskTiming>) {
        let mut record = self.record.lock();
        assert!(record.outcome.is_none(), "Task settled twice");
        record.outcome = Some(outcome);
        record.timing = timing;
    }

    fn take_record(&self) -> TaskRecord {
        std::mem::take(&mut *self.record.lock())
    }

    fn outcome(&self) -> Option<TaskOutcome> {
        self.record.lock().outcome
    }
}

fn process_catching_panic(task: &dyn Task) -> Result<(), TaskError> {
    panic::catch_unwind(AssertUnwindSafe(|| task.process()))
        .unwrap_or_else(|payload| Err(anyhow!("Task panicked: {}", panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}

fn default_worker_count() -> NonZeroUsize {
    thread::available_parallelism()
        .ok()
        .and_then(|parallelism| NonZeroUsize::new(parallelism.get() - 1))
        .unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::{sync::mpsc, time::Duration};

    #[derive(Debug, Default)]
    struct TaskRecorder {
        recorded_tasks: Mutex<Vec<String>>,
    }

    impl TaskRecorder {
        fn recorded_names(&self) -> Vec<String> {
            self.recorded_tasks.lock().clone()
        }

        fn position(&self, name: &str) -> usize {
            self.recorded_tasks
                .lock()
                .iter()
                .position(|recorded| recorded == name)
                .unwrap()
        }

        fn record_task(&self, name: &str) {
            self.recorded_tasks.lock().push(name.to_owned());
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn recording_task(name: &'static str, recorder: &Arc<TaskRecorder>) -> FunctionTask {
        let recorder = Arc::clone(recorder);
        FunctionTask::new(name, move || {
            recorder.record_task(name);
            Ok(())
        })
    }

    fn failing_task(name: &'static str) -> FunctionTask {
        FunctionTask::new(name, move || bail!("{} always fails!", name))
    }

    fn create_queue(n_workers: usize) -> TaskQueue {
        TaskQueue::new(NonZeroUsize::new(n_workers).unwrap())
    }

    #[test]
    fn registering_tasks_issues_distinct_ids() {
        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        let b = queue.register_task(FunctionTask::noop("B")).unwrap();
        assert_ne!(a, b);
        assert_eq!(queue.n_tasks(), 2);
        assert!(queue.has_task(a));
        assert_eq!(queue.task_name(b), Some("B"));
        assert_eq!(queue.task_id("A"), Some(a));
        assert_eq!(queue.task_id("C"), None);
    }

    #[test]
    fn default_worker_count_is_at_least_one() {
        let queue = TaskQueue::with_default_worker_count();
        assert!(queue.n_workers() >= 1);
    }

    #[test]
    fn adding_dependency_on_unknown_task_fails() {
        let mut other_queue = create_queue(1);
        other_queue.register_task(FunctionTask::noop("X")).unwrap();
        let foreign = other_queue.register_task(FunctionTask::noop("Y")).unwrap();

        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        assert!(queue.add_dependency(a, foreign).is_err());
        assert!(queue.add_dependency(foreign, a).is_err());
    }

    #[test]
    fn ids_from_earlier_frames_are_rejected() {
        let mut queue = create_queue(1);
        let stale = queue.register_task(FunctionTask::noop("A")).unwrap();
        queue.flush_task_queue();

        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        assert_eq!(a.index(), stale.index());
        assert_ne!(a.frame(), stale.frame());
        assert!(!queue.has_task(stale));
        assert!(queue.add_dependency(stale, a).is_err());
    }

    #[test]
    fn adding_self_or_duplicate_dependency_fails() {
        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        let b = queue.register_task(FunctionTask::noop("B")).unwrap();
        assert!(queue.add_dependency(a, a).is_err());
        queue.add_dependency(a, b).unwrap();
        assert!(queue.add_dependency(a, b).is_err());

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();
        assert_eq!(report.completed, vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn executing_tasks_respects_dependencies() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let dep_dep_task1_task2 = queue
            .register_task(recording_task("DepDepTask1Task2", &recorder))
            .unwrap();
        let task2 = queue.register_task(recording_task("Task2", &recorder)).unwrap();
        let dep_task1 = queue
            .register_task(recording_task("DepTask1", &recorder))
            .unwrap();
        let task1 = queue.register_task(recording_task("Task1", &recorder)).unwrap();
        let dep_task1_task2 = queue
            .register_task(recording_task("DepTask1Task2", &recorder))
            .unwrap();

        queue.add_dependency(task1, dep_task1).unwrap();
        queue.add_dependency(task1, dep_task1_task2).unwrap();
        queue.add_dependency(task2, dep_task1_task2).unwrap();
        queue.add_dependency(dep_task1, dep_dep_task1_task2).unwrap();
        queue.add_dependency(task2, dep_dep_task1_task2).unwrap();

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();

        assert!(report.all_completed());
        assert_eq!(report.completed.len(), 5);
        assert_eq!(recorder.recorded_names().len(), 5);

        assert!(recorder.position("DepTask1") > recorder.position("Task1"));
        assert!(recorder.position("DepTask1Task2") > recorder.position("Task1"));
        assert!(recorder.position("DepTask1Task2") > recorder.position("Task2"));
        assert!(recorder.position("DepDepTask1Task2") > recorder.position("DepTask1"));
        assert!(recorder.position("DepDepTask1Task2") > recorder.position("Task2"));

        assert_eq!(queue.timings().len(), 5);
        assert_eq!(queue.task_outcome(task1), Some(TaskOutcome::Completed));
    }

    /// Runs two independent tasks where "Waiting" blocks until "Signalling"
    /// has run, registering them in the given order, and returns the order
    /// in which they recorded themselves.
    fn run_signalling_pair(register_waiting_first: bool) -> Vec<String> {
        let recorder = Arc::new(TaskRecorder::default());
        let (sender, receiver) = mpsc::channel::<()>();

        let waiting = {
            let recorder = Arc::clone(&recorder);
            let receiver = Mutex::new(receiver);
            FunctionTask::new("Waiting", move || {
                receiver
                    .lock()
                    .recv_timeout(Duration::from_secs(10))
                    .map_err(|_| anyhow!("Signal never arrived"))?;
                recorder.record_task("Waiting");
                Ok(())
            })
        };
        let signalling = {
            let recorder = Arc::clone(&recorder);
            let sender = Mutex::new(sender);
            FunctionTask::new("Signalling", move || {
                recorder.record_task("Signalling");
                sender.lock().send(()).map_err(|_| anyhow!("Receiver gone"))?;
                Ok(())
            })
        };

        let mut queue = create_queue(2);
        if register_waiting_first {
            queue.register_task(waiting).unwrap();
            queue.register_task(signalling).unwrap();
        } else {
            queue.register_task(signalling).unwrap();
            queue.register_task(waiting).unwrap();
        }

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();
        assert!(report.all_completed());
        recorder.recorded_names()
    }

    #[test]
    fn independent_tasks_may_complete_in_either_order() {
        let expected = vec!["Signalling".to_owned(), "Waiting".to_owned()];

        // The task registered first completes last
        assert_eq!(run_signalling_pair(true), expected);

        // The task registered first completes first
        assert_eq!(run_signalling_pair(false), expected);
    }

    #[test]
    fn failing_task_skips_transitive_dependents_only() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let a = queue.register_task(failing_task("A")).unwrap();
        let b = queue.register_task(recording_task("B", &recorder)).unwrap();
        let c = queue.register_task(recording_task("C", &recorder)).unwrap();
        let d = queue.register_task(recording_task("D", &recorder)).unwrap();
        queue.add_dependency(a, b).unwrap();
        queue.add_dependency(b, c).unwrap();

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();

        assert_eq!(report.completed, vec!["D".to_owned()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, a);
        assert_eq!(report.failed[0].name, "A");
        assert_eq!(report.failed[0].error.to_string(), "A always fails!");
        assert_eq!(report.skipped, vec!["B".to_owned(), "C".to_owned()]);

        assert_eq!(recorder.recorded_names(), vec!["D".to_owned()]);

        assert_eq!(queue.task_outcome(a), Some(TaskOutcome::Failed));
        assert_eq!(queue.task_outcome(c), Some(TaskOutcome::Skipped));
        assert_eq!(queue.task_outcome(d), Some(TaskOutcome::Completed));
    }

    #[test]
    fn sibling_sharing_dependent_with_failed_task_still_runs() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let failing = queue.register_task(failing_task("Failing")).unwrap();
        let sibling = queue.register_task(recording_task("Sibling", &recorder)).unwrap();
        let joined = queue.register_task(recording_task("Joined", &recorder)).unwrap();
        queue.add_dependency(failing, joined).unwrap();
        queue.add_dependency(sibling, joined).unwrap();

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();

        assert_eq!(report.completed, vec!["Sibling".to_owned()]);
        assert_eq!(report.skipped, vec!["Joined".to_owned()]);
        assert_eq!(recorder.recorded_names(), vec!["Sibling".to_owned()]);
    }

    #[test]
    fn panicking_task_is_reported_as_failed() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(1);

        let panicking = queue
            .register_task(FunctionTask::new("Panicking", || panic!("boom")))
            .unwrap();
        let dependent = queue.register_task(recording_task("Dependent", &recorder)).unwrap();
        queue.add_dependency(panicking, dependent).unwrap();

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.to_string().contains("boom"));
        assert_eq!(report.skipped, vec!["Dependent".to_owned()]);
        assert!(recorder.recorded_names().is_empty());

        // The workers survive the panic
        queue.flush_task_queue();
        queue.register_task(recording_task("After", &recorder)).unwrap();
        queue.start_tasks().unwrap();
        assert!(queue.wait_for_tasks().all_completed());
    }

    #[test]
    fn circular_dependencies_are_rejected_without_hanging() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let a = queue.register_task(recording_task("A", &recorder)).unwrap();
        let b = queue.register_task(recording_task("B", &recorder)).unwrap();
        queue.add_dependency(a, b).unwrap();
        queue.add_dependency(b, a).unwrap();

        assert!(queue.start_tasks().is_err());
        assert!(!queue.is_executing());

        let report = queue.wait_for_tasks();
        assert_eq!(report.n_tasks(), 0);
        assert!(recorder.recorded_names().is_empty());

        queue.flush_task_queue();
        queue.register_task(recording_task("C", &recorder)).unwrap();
        queue.start_tasks().unwrap();
        assert!(queue.wait_for_tasks().all_completed());
        assert_eq!(recorder.recorded_names(), vec!["C".to_owned()]);
    }

    #[test]
    fn pending_dependency_closing_a_cycle_is_rejected() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let animate = queue.register_task(recording_task("Animate", &recorder)).unwrap();
        let skin = queue.register_task(recording_task("Skin", &recorder)).unwrap();
        queue.add_dependency(animate, skin).unwrap();
        queue.add_pending_dependency("Skin", animate).unwrap();

        let error = queue.start_tasks().unwrap_err().to_string();
        assert!(error.starts_with("Found circular task dependencies"));
        assert!(error.ends_with("Animate") || error.ends_with("Skin"));
        assert!(!queue.is_executing());

        assert_eq!(queue.wait_for_tasks().n_tasks(), 0);
        assert!(recorder.recorded_names().is_empty());
    }

    #[test]
    fn waiting_after_flush_returns_immediately() {
        let mut queue = create_queue(2);
        assert_eq!(queue.wait_for_tasks().n_tasks(), 0);

        queue.register_task(FunctionTask::noop("A")).unwrap();
        queue.start_tasks().unwrap();
        queue.wait_for_tasks();
        queue.flush_task_queue();

        let report = queue.wait_for_tasks();
        assert!(report.all_completed());
        assert_eq!(report.n_tasks(), 0);
        assert!(queue.timings().is_empty());
    }

    #[test]
    fn starting_empty_queue_works() {
        let mut queue = create_queue(1);
        queue.start_tasks().unwrap();
        assert_eq!(queue.wait_for_tasks().n_tasks(), 0);
        queue.flush_task_queue();
    }

    #[test]
    fn registering_while_executing_fails() {
        let mut queue = create_queue(1);
        let (sender, receiver) = mpsc::channel::<()>();
        let receiver = Mutex::new(receiver);
        queue
            .register_task(FunctionTask::new("Blocking", move || {
                let _ = receiver.lock().recv_timeout(Duration::from_secs(10));
                Ok(())
            }))
            .unwrap();
        queue.start_tasks().unwrap();

        assert!(queue.is_executing());
        assert!(queue.register_task(FunctionTask::noop("Late")).is_err());
        assert!(queue.start_tasks().is_err());

        sender.send(()).unwrap();
        assert!(queue.wait_for_tasks().all_completed());

        assert!(queue.register_task(FunctionTask::noop("Late")).is_err());
        queue.flush_task_queue();
        queue.register_task(FunctionTask::noop("Late")).unwrap();
    }

    #[test]
    fn pending_dependency_is_resolved_by_name() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let skin = queue.register_task(recording_task("Skin", &recorder)).unwrap();
        queue.add_pending_dependency("Animate", skin).unwrap();
        queue.register_task(recording_task("Animate", &recorder)).unwrap();

        queue.start_tasks().unwrap();
        assert!(queue.wait_for_tasks().all_completed());
        assert_eq!(
            recorder.recorded_names(),
            vec!["Animate".to_owned(), "Skin".to_owned()]
        );
    }

    #[test]
    fn pending_dependency_on_missing_name_is_ignored() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(1);

        let skin = queue.register_task(recording_task("Skin", &recorder)).unwrap();
        queue.add_pending_dependency("Animate", skin).unwrap();

        queue.start_tasks().unwrap();
        let report = queue.wait_for_tasks();
        assert!(report.all_completed());
        assert_eq!(report.completed, vec!["Skin".to_owned()]);
    }

    #[test]
    fn pending_dependent_is_resolved_by_name() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let animate = queue.register_task(recording_task("Animate", &recorder)).unwrap();
        queue.add_pending_dependent(animate, "Skin").unwrap();
        queue.add_pending_dependent(animate, "Missing").unwrap();
        queue.register_task(recording_task("Skin", &recorder)).unwrap();

        let report = queue.run_tasks_in_this_thread().unwrap();
        assert!(report.all_completed());
        assert_eq!(
            recorder.recorded_names(),
            vec!["Animate".to_owned(), "Skin".to_owned()]
        );
    }

    #[test]
    fn immediate_name_dependencies_report_unknown_names() {
        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        let b = queue.register_task(FunctionTask::noop("B")).unwrap();

        assert!(queue.add_dependency_on_name("A", b).unwrap());
        assert!(!queue.add_dependency_on_name("Missing", b).unwrap());
        assert!(!queue.add_dependent_by_name(a, "Missing").unwrap());
        assert!(queue.add_dependency_on_name("A", b).is_err());

        let c = queue.register_task(FunctionTask::noop("C")).unwrap();
        assert!(queue.add_dependent_by_name(b, "C").unwrap());

        let report = queue.run_tasks_in_this_thread().unwrap();
        assert_eq!(
            report.completed,
            vec!["A".to_owned(), "B".to_owned(), "C".to_owned()]
        );
        assert!(!queue.has_task(c));
    }

    #[test]
    fn removed_task_keeps_ordering_through_it() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(2);

        let a = queue.register_task(recording_task("A", &recorder)).unwrap();
        let b = queue.register_task(recording_task("B", &recorder)).unwrap();
        let c = queue.register_task(recording_task("C", &recorder)).unwrap();
        queue.add_dependency(a, b).unwrap();
        queue.add_dependency(b, c).unwrap();

        assert!(queue.remove_task(b));
        assert_eq!(queue.task_name(b), Some("B"));

        let report = queue.run_tasks_in_this_thread().unwrap();
        assert_eq!(report.completed.len(), 3);
        assert_eq!(recorder.recorded_names(), vec!["A".to_owned(), "C".to_owned()]);

        assert!(!queue.remove_task(b));
    }

    #[test]
    fn running_in_this_thread_skips_dependents_of_failures_and_flushes() {
        let recorder = Arc::new(TaskRecorder::default());
        let mut queue = create_queue(1);
        let frame = queue.frame();

        let a = queue.register_task(failing_task("A")).unwrap();
        let b = queue.register_task(recording_task("B", &recorder)).unwrap();
        queue.register_task(recording_task("C", &recorder)).unwrap();
        queue.add_dependency(a, b).unwrap();

        let report = queue.run_tasks_in_this_thread().unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped, vec!["B".to_owned()]);
        assert_eq!(report.completed, vec!["C".to_owned()]);
        assert!(report.timings.iter().all(|timing| timing.worker.is_none()));

        assert_eq!(queue.n_tasks(), 0);
        assert_eq!(queue.frame(), frame + 1);
    }

    #[test]
    fn running_circular_tasks_in_this_thread_fails_and_flushes() {
        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        let b = queue.register_task(FunctionTask::noop("B")).unwrap();
        queue.add_dependency(a, b).unwrap();
        queue.add_dependency(b, a).unwrap();

        assert!(queue.run_tasks_in_this_thread().is_err());
        assert_eq!(queue.n_tasks(), 0);
    }

    #[test]
    fn task_graph_is_written_in_dot_format() {
        let mut queue = create_queue(1);
        let a = queue.register_task(FunctionTask::noop("A")).unwrap();
        let b = queue.register_task(FunctionTask::noop("B")).unwrap();
        queue.add_dependency(a, b).unwrap();
        queue.add_pending_dependency("Missing", b).unwrap();
        queue.add_pending_dependent(a, "B").unwrap();

        let mut output = Vec::new();
        queue.write_task_graph(&mut output).unwrap();
        let dot = String::from_utf8(output).unwrap();

        assert_eq!(
            dot,
            "digraph tasks {\n\"A\"\n\"B\"\n\"A\" -> \"B\"\n\"Missing?\" -> \"B\"\n\"A\" -> \"B\"\n}\n"
        );
    }

    #[test]
    fn parameterized_task_is_initialized_before_registration() {
        #[derive(Debug, Default)]
        struct Accumulate {
            values: Vec<u32>,
            total: Arc<Mutex<u32>>,
        }

        impl Task for Accumulate {
            fn name(&self) -> &str {
                "Accumulate"
            }

            fn process(&self) -> Result<(), TaskError> {
                *self.total.lock() = self.values.iter().sum();
                Ok(())
            }
        }

        impl ParameterizedTask for Accumulate {
            type Parameters = Vec<u32>;

            fn init(&mut self, parameters: Self::Parameters) {
                self.values = parameters;
            }
        }

        let total = Arc::new(Mutex::new(0));
        let mut queue = create_queue(1);
        queue
            .register_parameterized_task(
                Accumulate {
                    values: Vec::new(),
                    total: Arc::clone(&total),
                },
                vec![1, 2, 3],
            )
            .unwrap();
        queue.start_tasks().unwrap();
        assert!(queue.wait_for_tasks().all_completed());
        assert_eq!(*total.lock(), 6);
    }

    #[test]
    fn ordered_tasks_are_created_correctly() {
        let mut queue = create_queue(1);
        let dep_dep = queue.register_task(FunctionTask::noop("DepDep")).unwrap();
        let task = queue.register_task(FunctionTask::noop("Task")).unwrap();
        let dep = queue.register_task(FunctionTask::noop("Dep")).unwrap();
        queue.add_dependency(task, dep).unwrap();
        queue.add_dependency(dep, dep_dep).unwrap();

        let ordering = TaskOrdering::new(&queue.tasks, &queue.dependency_graph).unwrap();
        assert_eq!(ordering.n_dependencyless_tasks(), 1);

        let first = ordering.task(0);
        assert_eq!(first.task().name(), "Task");
        assert_eq!(first.n_dependencies(), 0);
        assert_eq!(first.indices_of_dependent_tasks(), &[1]);

        let second = ordering.task(1);
        assert_eq!(second.task().name(), "Dep");
        assert_eq!(second.n_dependencies(), 1);
        assert_eq!(second.indices_of_dependent_tasks(), &[2]);

        let third = ordering.task(2);
        assert_eq!(third.task().name(), "DepDep");
        assert!(third.indices_of_dependent_tasks().is_empty());
    }
}
