//! Units of per-frame work.

use radium_thread::TaskError;
use std::fmt;

/// Represents a piece of work to be performed by a worker thread in a
/// [`TaskQueue`](crate::TaskQueue).
///
/// A task may be executed on any worker thread, so any state it modifies must
/// be shared through synchronized containers.
pub trait Task: Sync + Send + fmt::Debug {
    /// Returns the label of this task, used for diagnostics and for resolving
    /// dependencies declared by name.
    fn name(&self) -> &str;

    /// Performs the work of the task. This method may fail and return an
    /// error, in which case every task depending on this one is skipped.
    fn process(&self) -> Result<(), TaskError>;
}

/// A [`Task`] that must be initialized with a parameter block of a specific
/// type before it is registered for execution.
pub trait ParameterizedTask: Task {
    /// The parameters bound to the task by [`init`](Self::init).
    type Parameters;

    /// Binds the given parameters to the task.
    fn init(&mut self, parameters: Self::Parameters);
}

/// A [`Task`] that performs its work by calling a closure.
pub struct FunctionTask {
    name: String,
    function: Box<dyn Fn() -> Result<(), TaskError> + Send + Sync>,
}

impl FunctionTask {
    /// Creates a new task with the given name that will call the given
    /// closure when processed.
    pub fn new(
        name: impl Into<String>,
        function: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }

    /// Creates a task with the given name that does nothing when processed.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, || Ok(()))
    }
}

impl Task for FunctionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self) -> Result<(), TaskError> {
        (self.function)()
    }
}

impl fmt::Debug for FunctionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
