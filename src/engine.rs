//! Frame driver executing the tasks generated by systems.

use crate::{
    config::EngineConfig,
    system::{FrameInfo, System},
};
use anyhow::{Error, Result};
use radium_scheduling::{ExecutionReport, FailedTask, TaskQueue, TaskTiming};
use std::{
    io,
    time::{Duration, Instant},
};

/// Owner of the systems and of the task queue executing their tasks.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    task_queue: TaskQueue,
    systems: Vec<Box<dyn System>>,
    frame_index: u64,
    first_frame_start: Option<Instant>,
    last_frame_start: Option<Instant>,
}

/// What happened during one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Names of the tasks that completed, in dependency order.
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
    /// Names of the tasks that were not processed because a task they depend
    /// on failed.
    pub skipped: Vec<String>,
    /// Per-task timings, only recorded if enabled in the configuration.
    pub timings: Vec<TaskTiming>,
    /// Errors returned by systems while generating their tasks. The tasks
    /// they did register are still executed.
    pub system_errors: Vec<Error>,
    /// Set if the task graph could not be executed, in which case no task
    /// ran this frame.
    pub graph_error: Option<Error>,
}

impl Engine {
    /// Creates an engine without any systems.
    pub fn new(config: EngineConfig) -> Self {
        let task_queue = config.scheduling.create_task_queue();
        radium_log::info!("Created engine with {} task workers", task_queue.n_workers());
        Self {
            config,
            task_queue,
            systems: Vec::new(),
            frame_index: 0,
            first_frame_start: None,
            last_frame_start: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adds a system whose tasks will be generated every frame after those
    /// of the systems already added.
    pub fn add_system(&mut self, system: impl System + 'static) {
        radium_log::debug!("Adding system {}", system.name());
        self.systems.push(Box::new(system));
    }

    pub fn n_systems(&self) -> usize {
        self.systems.len()
    }

    /// Index of the next frame to run.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.task_queue
    }

    /// Runs one frame: every system generates its tasks, the tasks are
    /// started and waited for, and the queue is flushed for the next frame.
    ///
    /// Failing tasks and systems are recorded in the returned report and
    /// never abort the frame.
    pub fn run_frame(&mut self) -> FrameReport {
        self.run_frame_inspecting_tasks(|_| {})
    }

    /// Like [`run_frame`](Self::run_frame), but calls the given closure with
    /// the task queue after the tasks have been generated and before they
    /// are started.
    pub fn run_frame_inspecting_tasks(&mut self, inspect: impl FnOnce(&TaskQueue)) -> FrameReport {
        let frame = self.begin_frame();

        radium_log::with_timing_info_logging!("Frame {}", frame.frame_index; {
            let system_errors = self.generate_tasks(&frame);
            inspect(&self.task_queue);

            let mut report = match self.execute_tasks() {
                Ok(execution) => FrameReport::from_execution(
                    frame.frame_index,
                    execution,
                    self.config.scheduling.record_timings,
                ),
                Err(error) => {
                    radium_log::error!("Could not execute tasks of frame {}: {:#}", frame.frame_index, error);
                    FrameReport {
                        frame_index: frame.frame_index,
                        graph_error: Some(error),
                        ..FrameReport::default()
                    }
                }
            };
            report.system_errors = system_errors;
            report
        })
    }

    /// Writes the task graph of the next frame in Graphviz DOT format by
    /// running the frame and capturing its tasks before execution.
    ///
    /// # Errors
    /// Returns an error if writing fails. The frame has been run regardless.
    pub fn run_frame_writing_task_graph(
        &mut self,
        writer: &mut impl io::Write,
    ) -> Result<FrameReport> {
        let mut write_result = Ok(());
        let report = self.run_frame_inspecting_tasks(|task_queue| {
            write_result = task_queue.write_task_graph(writer);
        });
        write_result?;
        Ok(report)
    }

    fn begin_frame(&mut self) -> FrameInfo {
        let now = Instant::now();
        let first_frame_start = *self.first_frame_start.get_or_insert(now);
        let dt = self
            .last_frame_start
            .map_or(Duration::ZERO, |last| now.duration_since(last));
        self.last_frame_start = Some(now);

        let frame = FrameInfo {
            frame_index: self.frame_index,
            dt,
            elapsed: now.duration_since(first_frame_start),
        };
        self.frame_index += 1;
        frame
    }

    fn generate_tasks(&mut self, frame: &FrameInfo) -> Vec<Error> {
        let mut errors = Vec::new();
        for system in &mut self.systems {
            let result = radium_log::with_trace_logging!("Generating tasks of {}", system.name();
                system.generate_tasks(&mut self.task_queue, frame)
            );
            if let Err(error) = result {
                radium_log::error!("System {} failed to generate tasks: {:#}", system.name(), error);
                errors.push(error);
            }
        }
        errors
    }

    fn execute_tasks(&mut self) -> Result<ExecutionReport> {
        if self.config.scheduling.run_on_main_thread {
            return self.task_queue.run_tasks_in_this_thread();
        }

        let started = self.task_queue.start_tasks();
        let execution = started.map(|()| self.task_queue.wait_for_tasks());
        self.task_queue.flush_task_queue();
        execution
    }
}

impl FrameReport {
    fn from_execution(frame_index: u64, execution: ExecutionReport, record_timings: bool) -> Self {
        Self {
            frame_index,
            completed: execution.completed,
            failed: execution.failed,
            skipped: execution.skipped,
            timings: if record_timings {
                execution.timings
            } else {
                Vec::new()
            },
            system_errors: Vec::new(),
            graph_error: None,
        }
    }

    /// Whether every task completed and nothing else went wrong.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.skipped.is_empty()
            && self.system_errors.is_empty()
            && self.graph_error.is_none()
    }

    pub fn failed_task_names(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|failed| failed.name.as_str())
    }
}
