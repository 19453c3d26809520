//! Systems producing the tasks of each frame.

use anyhow::{Context, Result};
use radium_scheduling::TaskQueue;
use std::{fmt, time::Duration};

/// Timing information about the frame being generated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInfo {
    /// Index of the frame, starting at zero.
    pub frame_index: u64,
    /// Time elapsed since the previous frame started, or zero for the first
    /// frame.
    pub dt: Duration,
    /// Time elapsed since the first frame started.
    pub elapsed: Duration,
}

/// Something that contributes work to every frame by registering tasks and
/// their dependencies in the frame's [`TaskQueue`].
///
/// Tasks outlive the call to [`generate_tasks`](Self::generate_tasks), so any
/// state they share with the system must be held through synchronized
/// reference-counted containers.
pub trait System: fmt::Debug {
    fn name(&self) -> &str;

    /// Registers the tasks this system needs to run for the given frame.
    ///
    /// # Errors
    /// Returns an error if the tasks could not be registered, for instance
    /// because a dependency refers to an unknown task.
    fn generate_tasks(&mut self, task_queue: &mut TaskQueue, frame: &FrameInfo) -> Result<()>;
}

/// A [`System`] made of other systems, whose tasks are generated in the
/// order the systems were added.
#[derive(Debug)]
pub struct CouplingSystem {
    name: String,
    systems: Vec<Box<dyn System>>,
}

impl CouplingSystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            systems: Vec::new(),
        }
    }

    pub fn add_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    pub fn n_systems(&self) -> usize {
        self.systems.len()
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|system| &**system)
    }
}

impl System for CouplingSystem {
    fn name(&self) -> &str {
        &self.name
    }

    /// Generates the tasks of each subsystem in insertion order, stopping at
    /// the first subsystem that fails.
    fn generate_tasks(&mut self, task_queue: &mut TaskQueue, frame: &FrameInfo) -> Result<()> {
        for system in &mut self.systems {
            system
                .generate_tasks(task_queue, frame)
                .with_context(|| format!("Subsystem {} of {} failed", system.name(), self.name))?;
        }
        Ok(())
    }
}
