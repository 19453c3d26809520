//! Utilities for multithreading.

use anyhow::Error;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashMap,
    mem,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

/// A set of worker threads configured to execute a specific task on request.
///
/// The threads pull instructions from a single shared queue, and may push new
/// instructions onto the same queue from within the task closure. This is what
/// allows a task graph to be driven entirely by the workers once the first
/// tasks have been submitted.
///
/// # Examples
/// ```no_run
/// # use radium_thread::{ThreadPool, TaskClosureReturnValue};
/// # use parking_lot::Mutex;
/// # use std::{iter, num::NonZeroUsize, sync::Arc};
/// #
/// let n_workers = 2;
/// let n_tasks = 2;
///
/// let pool = ThreadPool::new(
///     NonZeroUsize::new(n_workers).unwrap(),
///     &|_channel, (count, incr): (Arc<Mutex<usize>>, usize)| {
///         *count.lock() += incr;
///         TaskClosureReturnValue::success(1)
///     },
/// );
///
/// let count = Arc::new(Mutex::new(0));
/// let messages = iter::repeat_with(|| (Arc::clone(&count), 3)).take(n_tasks);
///
/// pool.execute_and_wait(messages, n_tasks).unwrap();
///
/// assert_eq!(*count.lock(), n_tasks * 3);
/// ```
///
/// # Type parameters
/// `M` is the type of message content sent to threads when they should
/// execute a task.
#[derive(Debug)]
pub struct ThreadPool<M> {
    communicator: ThreadPoolCommunicator<M>,
    workers: Vec<Worker>,
}

/// An instruction that can be sent to threads in a [`ThreadPool`] to make them
/// begin executing their task with a given message, or to terminate so that
/// they can be joined.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkerInstruction<M> {
    Execute(M),
    Terminate,
}

/// The type of ID used for worker threads in a [`ThreadPool`].
pub type WorkerID = usize;

/// Index identifying a task within a single batch of executions submitted to
/// a [`ThreadPool`]. Its meaning is defined by whoever submits the batch.
pub type TaskIndex = usize;

/// Type of error produced by failed task executions in a [`ThreadPool`].
pub type TaskError = Error;

/// [`Result`] produced by the task closure executed by worker threads in a
/// [`ThreadPool`]. The [`Err`] variant contains the index of the failed task
/// together with the resulting [`TaskError`].
pub type TaskClosureResult = Result<(), (TaskIndex, TaskError)>;

/// The information returned from the task closure executed by worker threads
/// in a [`ThreadPool`].
#[derive(Debug)]
pub struct TaskClosureReturnValue {
    /// The number of expected task executions that were settled by the
    /// closure call, whether they ran, failed or were skipped.
    pub n_settled_tasks: usize,
    /// The result of the task closure execution, which should be an [`Err`]
    /// if any of the tasks executed in the closure failed.
    pub result: TaskClosureResult,
}

/// [`Result`] returned by execution of a set of tasks in a [`ThreadPool`].
pub type ThreadPoolResult = Result<(), ThreadPoolTaskErrors>;

/// Container for a non-empty set of [`TaskError`]s produced by execution of a
/// set of tasks in a [`ThreadPool`]. The errors can be looked up by
/// [`TaskIndex`].
#[derive(Debug)]
pub struct ThreadPoolTaskErrors {
    errors: HashMap<TaskIndex, TaskError>,
}

/// A single channel shared between the main thread and all worker threads in
/// a [`ThreadPool`], used for sending and receiving instructions to and from a
/// shared queue.
#[derive(Debug)]
pub struct ThreadPoolChannel<M> {
    owning_worker_id: Option<WorkerID>,
    sender: Sender<WorkerInstruction<M>>,
    receiver: Receiver<WorkerInstruction<M>>,
}

#[derive(Debug)]
struct ThreadPoolCommunicator<M> {
    n_workers: NonZeroUsize,
    channel: ThreadPoolChannel<M>,
    execution_progress: ExecutionProgress,
    task_status: TaskStatus,
}

#[derive(Clone, Debug)]
struct ExecutionProgress {
    pending_task_count: Arc<AtomicUsize>,
    no_pending_tasks_condvar: Arc<(Mutex<bool>, Condvar)>,
}

#[derive(Clone, Debug)]
struct TaskStatus {
    errors_of_failed_tasks: Arc<Mutex<HashMap<TaskIndex, TaskError>>>,
}

#[derive(Debug)]
struct Worker {
    handle: JoinHandle<()>,
}

impl<M> ThreadPool<M> {
    /// Creates a new thread pool containing the given number of worker
    /// threads configured to execute a specified task. When a thread receives
    /// a [`WorkerInstruction`] to execute the task, the given `execute_task`
    /// closure is called with the message contained in the instruction and a
    /// [`ThreadPoolChannel`] that can be used to submit further executions
    /// from within the closure.
    pub fn new<T>(n_workers: NonZeroUsize, execute_task: &'static T) -> Self
    where
        M: Send + 'static,
        T: Fn(&ThreadPoolChannel<M>, M) -> TaskClosureReturnValue + Sync,
    {
        let communicator = ThreadPoolCommunicator::new(n_workers);

        let workers = (0..n_workers.get())
            .map(|worker_id| {
                let communicator = communicator.copy_for_worker(worker_id);
                Worker::spawn(communicator, execute_task)
            })
            .collect();

        Self {
            communicator,
            workers,
        }
    }

    /// Returns the number of worker threads in the thread pool (this does not
    /// include the main thread).
    pub fn n_workers(&self) -> NonZeroUsize {
        self.communicator.n_workers()
    }

    /// Instructs worker threads in the pool to execute their task with each
    /// of the given messages, then blocks until all `n_tasks` expected task
    /// executions have been settled.
    ///
    /// # Errors
    /// A [`ThreadPoolTaskErrors`] containing the [`TaskError`] of each failed
    /// task is returned if any of the executed tasks failed.
    pub fn execute_and_wait(
        &self,
        messages: impl Iterator<Item = M>,
        n_tasks: usize,
    ) -> ThreadPoolResult {
        self.execute(messages, n_tasks);
        self.wait_until_done()
    }

    /// Instructs worker threads in the pool to execute their task with each
    /// of the given messages. The `n_tasks` argument is the total number of
    /// task executions that will be settled as a result of this call,
    /// including executions submitted from within the task closure. Returns
    /// as soon as all the instructions have been sent.
    pub fn execute(&self, messages: impl Iterator<Item = M>, n_tasks: usize) {
        self.communicator
            .execution_progress()
            .add_to_pending_task_count(n_tasks);

        for message in messages {
            self.communicator
                .channel()
                .send_execute_instruction(message);
        }
    }

    /// Blocks the calling thread and returns as soon as all expected task
    /// executions have been settled.
    ///
    /// # Errors
    /// A [`ThreadPoolTaskErrors`] containing the [`TaskError`] of each failed
    /// task is returned if any of the executed tasks failed.
    pub fn wait_until_done(&self) -> ThreadPoolResult {
        self.communicator
            .execution_progress()
            .wait_for_no_pending_tasks();
        self.communicator.task_status().fetch_result()
    }

    /// Returns the number of task executions that have not been settled yet.
    pub fn pending_task_count(&self) -> usize {
        self.communicator.execution_progress().pending_task_count()
    }
}

impl<M> Drop for ThreadPool<M> {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            self.communicator
                .channel()
                .send_instruction(WorkerInstruction::Terminate);
        }

        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl TaskClosureReturnValue {
    /// Creates the return value for a closure call that settled the given
    /// number of task executions without any failure.
    pub fn success(n_settled_tasks: usize) -> Self {
        Self {
            n_settled_tasks,
            result: Ok(()),
        }
    }

    /// Creates the return value for a closure call that settled the given
    /// number of task executions, one of which (the task with the given
    /// index) failed with the given error.
    pub fn failure(n_settled_tasks: usize, task_index: TaskIndex, error: TaskError) -> Self {
        Self {
            n_settled_tasks,
            result: Err((task_index, error)),
        }
    }
}

impl ThreadPoolTaskErrors {
    fn new(errors: HashMap<TaskIndex, TaskError>) -> Self {
        assert!(!errors.is_empty());
        Self { errors }
    }

    /// Returns the number of errors present from executed tasks that failed.
    pub fn n_errors(&self) -> usize {
        self.errors.len()
    }

    /// Returns the [`TaskError`] produced by the task with the given index if
    /// the task executed and failed.
    pub fn get_error_of(&self, task_index: TaskIndex) -> Option<&TaskError> {
        self.errors.get(&task_index)
    }

    /// Consumes the container and returns all (index, error) pairs.
    pub fn into_errors(self) -> impl Iterator<Item = (TaskIndex, TaskError)> {
        self.errors.into_iter()
    }
}

impl<M> ThreadPoolChannel<M> {
    fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            owning_worker_id: None,
            sender,
            receiver,
        }
    }

    /// Returns the ID of the worker owning this instance of the
    /// [`ThreadPool`]'s channel.
    ///
    /// # Panics
    /// If called on a [`ThreadPoolChannel`] that has not been assigned to a
    /// worker thread.
    pub fn owning_worker_id(&self) -> WorkerID {
        self.owning_worker_id
            .expect("Channel is not owned by a worker thread")
    }

    /// Sends an instruction to execute the task with the given message to the
    /// queue shared between the workers. The first available worker will
    /// execute the task once with the given message.
    pub fn send_execute_instruction(&self, message: M) {
        self.send_instruction(WorkerInstruction::Execute(message));
    }

    fn send_instruction(&self, instruction: WorkerInstruction<M>) {
        // The pool keeps a receiver alive for as long as it exists
        self.sender
            .send(instruction)
            .expect("Thread pool instruction queue disconnected");
    }

    fn wait_for_next_instruction(&self) -> WorkerInstruction<M> {
        self.receiver
            .recv()
            .expect("Thread pool instruction queue disconnected")
    }

    fn copy_for_worker(&self, worker_id: WorkerID) -> Self {
        Self {
            owning_worker_id: Some(worker_id),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<M> ThreadPoolCommunicator<M> {
    fn new(n_workers: NonZeroUsize) -> Self {
        Self {
            n_workers,
            channel: ThreadPoolChannel::new(),
            execution_progress: ExecutionProgress::new(),
            task_status: TaskStatus::new(),
        }
    }

    fn n_workers(&self) -> NonZeroUsize {
        self.n_workers
    }

    fn channel(&self) -> &ThreadPoolChannel<M> {
        &self.channel
    }

    fn execution_progress(&self) -> &ExecutionProgress {
        &self.execution_progress
    }

    fn task_status(&self) -> &TaskStatus {
        &self.task_status
    }

    fn copy_for_worker(&self, worker_id: WorkerID) -> Self {
        Self {
            n_workers: self.n_workers,
            channel: self.channel.copy_for_worker(worker_id),
            execution_progress: self.execution_progress.clone(),
            task_status: self.task_status.clone(),
        }
    }
}

impl ExecutionProgress {
    fn new() -> Self {
        Self {
            pending_task_count: Arc::new(AtomicUsize::new(0)),
            no_pending_tasks_condvar: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    fn add_to_pending_task_count(&self, n_tasks: usize) {
        radium_log::trace!("Adding {} pending tasks", n_tasks);

        if n_tasks == 0 {
            return;
        }

        // Hold the flag lock so a concurrent completion cannot signal "done"
        // between the count update and the flag update
        let mut no_pending_tasks = self.no_pending_tasks_condvar.0.lock();
        let previous_count = self.pending_task_count.fetch_add(n_tasks, Ordering::AcqRel);
        if previous_count == 0 {
            *no_pending_tasks = false;
        }
    }

    fn register_settled_tasks(&self, worker_id: WorkerID, n_tasks: usize) {
        radium_log::trace!(
            "Worker {} registering {} tasks as settled",
            worker_id,
            n_tasks
        );

        if n_tasks == 0 {
            return;
        }

        let mut no_pending_tasks = self.no_pending_tasks_condvar.0.lock();
        let previous_count = self.pending_task_count.fetch_sub(n_tasks, Ordering::AcqRel);
        assert!(
            previous_count >= n_tasks,
            "Underflow when registering settled tasks"
        );

        if previous_count == n_tasks {
            radium_log::trace!("There are now no pending tasks");
            *no_pending_tasks = true;
            self.no_pending_tasks_condvar.1.notify_all();
        }
    }

    fn wait_for_no_pending_tasks(&self) {
        radium_log::with_trace_logging!("Waiting for no pending tasks"; {
            let mut no_pending_tasks = self.no_pending_tasks_condvar.0.lock();
            while !*no_pending_tasks {
                self.no_pending_tasks_condvar.1.wait(&mut no_pending_tasks);
            }
        });
    }

    fn pending_task_count(&self) -> usize {
        self.pending_task_count.load(Ordering::Acquire)
    }
}

impl TaskStatus {
    fn new() -> Self {
        Self {
            errors_of_failed_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn fetch_result(&self) -> ThreadPoolResult {
        let errors = mem::take(&mut *self.errors_of_failed_tasks.lock());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ThreadPoolTaskErrors::new(errors))
        }
    }

    fn register_error(&self, worker_id: WorkerID, task_index: TaskIndex, error: TaskError) {
        radium_log::debug!(
            "Worker {} registered error on task {}: {}",
            worker_id,
            task_index,
            &error
        );
        self.errors_of_failed_tasks.lock().insert(task_index, error);
    }
}

impl Worker {
    fn spawn<M, F>(communicator: ThreadPoolCommunicator<M>, execute_task: &'static F) -> Self
    where
        M: Send + 'static,
        F: Fn(&ThreadPoolChannel<M>, M) -> TaskClosureReturnValue + Sync,
    {
        let handle = thread::spawn(move || {
            let worker_id = communicator.channel().owning_worker_id();
            radium_log::debug!("Worker {} spawned", worker_id);

            loop {
                match communicator.channel().wait_for_next_instruction() {
                    WorkerInstruction::Execute(message) => {
                        let TaskClosureReturnValue {
                            n_settled_tasks,
                            result,
                        } = execute_task(communicator.channel(), message);

                        if let Err((task_index, error)) = result {
                            communicator
                                .task_status()
                                .register_error(worker_id, task_index, error);
                        }

                        communicator
                            .execution_progress()
                            .register_settled_tasks(worker_id, n_settled_tasks);
                    }
                    WorkerInstruction::Terminate => {
                        radium_log::debug!("Worker {} terminating", worker_id);
                        return;
                    }
                }
            }
        });
        Self { handle }
    }

    fn join(self) {
        if self.handle.join().is_err() {
            radium_log::error!("Worker thread panicked before terminating");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::iter;

    struct NoMessage;

    #[test]
    fn creating_thread_communicator_works() {
        let n_workers = 2;
        let comm = ThreadPoolCommunicator::<NoMessage>::new(NonZeroUsize::new(n_workers).unwrap());
        assert_eq!(comm.n_workers().get(), n_workers);
    }

    #[test]
    fn sending_message_with_communicator_works() {
        let comm = ThreadPoolCommunicator::new(NonZeroUsize::new(1).unwrap());
        comm.channel().send_execute_instruction(42);
        let message = comm.channel().wait_for_next_instruction();
        assert_eq!(message, WorkerInstruction::Execute(42));
    }

    #[test]
    fn keeping_track_of_pending_task_count_works() {
        let comm = ThreadPoolCommunicator::<NoMessage>::new(NonZeroUsize::new(1).unwrap());
        assert_eq!(comm.execution_progress().pending_task_count(), 0);
        comm.execution_progress().add_to_pending_task_count(2);
        assert_eq!(comm.execution_progress().pending_task_count(), 2);
        comm.execution_progress().add_to_pending_task_count(1);
        assert_eq!(comm.execution_progress().pending_task_count(), 3);

        comm.execution_progress().register_settled_tasks(0, 2);
        assert_eq!(comm.execution_progress().pending_task_count(), 1);
        comm.execution_progress().register_settled_tasks(0, 1);
        assert_eq!(comm.execution_progress().pending_task_count(), 0);

        comm.execution_progress().wait_for_no_pending_tasks(); // Should return immediately
    }

    #[test]
    #[should_panic]
    fn registering_settled_task_when_none_are_pending_fails() {
        let comm = ThreadPoolCommunicator::<NoMessage>::new(NonZeroUsize::new(2).unwrap());
        comm.execution_progress().register_settled_tasks(0, 1);
    }

    #[test]
    fn waiting_on_idle_thread_pool_returns_immediately() {
        let pool = ThreadPool::<NoMessage>::new(NonZeroUsize::new(2).unwrap(), &|_, _| {
            TaskClosureReturnValue::success(1)
        });
        assert_eq!(pool.n_workers().get(), 2);
        pool.wait_until_done().unwrap();
        pool.wait_until_done().unwrap();
    }

    #[test]
    fn executing_thread_pool_works() {
        let n_workers = 2;
        let count = Arc::new(Mutex::new(0));
        let pool = ThreadPool::new(
            NonZeroUsize::new(n_workers).unwrap(),
            &|_, (count, incr): (Arc<Mutex<usize>>, usize)| {
                *count.lock() += incr;
                TaskClosureReturnValue::success(1)
            },
        );
        pool.execute_and_wait(
            iter::repeat_with(|| (Arc::clone(&count), 3)).take(n_workers),
            n_workers,
        )
        .unwrap();
        drop(pool);
        assert_eq!(*count.lock(), n_workers * 3);
    }

    #[test]
    fn submitting_executions_from_worker_works() {
        let count = Arc::new(Mutex::new(0));
        let pool = ThreadPool::new(
            NonZeroUsize::new(3).unwrap(),
            &|channel: &ThreadPoolChannel<_>, (count, remaining): (Arc<Mutex<usize>>, usize)| {
                *count.lock() += 1;
                if remaining > 0 {
                    channel.send_execute_instruction((Arc::clone(&count), remaining - 1));
                }
                TaskClosureReturnValue::success(1)
            },
        );
        pool.execute_and_wait(iter::once((Arc::clone(&count), 4)), 5)
            .unwrap();
        assert_eq!(*count.lock(), 5);
        assert_eq!(pool.pending_task_count(), 0);
    }

    #[test]
    fn capturing_task_error_works() {
        let count = Arc::new(Mutex::new(1));
        let pool = ThreadPool::new(
            NonZeroUsize::new(2).unwrap(),
            &|_, (count, task_index): (Arc<Mutex<usize>>, TaskIndex)| {
                let mut count = count.lock();

                // The second of the two tasks will cause underflow
                match count.checked_sub(1) {
                    Some(decremented_count) => {
                        *count = decremented_count;
                        TaskClosureReturnValue::success(1)
                    }
                    None => TaskClosureReturnValue::failure(1, task_index, anyhow!("Underflow!")),
                }
            },
        );
        let result = pool.execute_and_wait(
            [(Arc::clone(&count), 0), (Arc::clone(&count), 1)].into_iter(),
            2,
        );

        let errors = result.unwrap_err();
        assert_eq!(errors.n_errors(), 1);

        match (errors.get_error_of(0), errors.get_error_of(1)) {
            (Some(err), None) | (None, Some(err)) => assert_eq!(err.to_string(), "Underflow!"),
            _ => unreachable!(),
        }

        // Errors are consumed by the wait
        pool.wait_until_done().unwrap();
    }
}
