//! The Manager task - program task lifecycle and housekeeping.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handoff::Handoff;
use crate::manager::{ProgramManager, Requests};
use crate::scheduler::{Scheduler, TaskId};

/// Lifecycle state of the program task, as seen by the Manager.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// No program task exists
    #[default]
    Stopped,
    /// Program task being created
    Starting,
    /// Program task exists and is cycling through the handoff
    Running,
    /// Program task being destroyed
    Stopping,
    /// The program reported a fatal status.  No program task will be
    /// started again.
    Faulted,
}

/// Statistics sampled by the Manager's housekeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    /// Lowest free stack seen on any program task, in bytes
    pub program_free_stack: Option<usize>,
    /// Lowest free stack seen on the Manager task, in bytes
    pub manager_free_stack: Option<usize>,
    /// Most tasks seen at once
    pub peak_tasks: usize,
    /// Blocks dropped due to program overrun
    pub overruns: u32,
}

fn lowest(current: Option<usize>, sample: Option<usize>) -> Option<usize> {
    match (current, sample) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// The Manager's exclusive state.  Construct in the Manager task and call
/// [`Self::run()`].
pub struct ManagerTask<'a, S: Scheduler, H: Handoff> {
    manager: &'a ProgramManager<S, H>,
    program_task: Option<TaskId>,
    state: ProgramState,
    stats: TaskStats,
}

impl<'a, S: Scheduler, H: Handoff> ManagerTask<'a, S, H> {
    pub fn new(manager: &'a ProgramManager<S, H>) -> Self {
        Self {
            manager,
            program_task: None,
            state: ProgramState::Stopped,
            stats: TaskStats::default(),
        }
    }

    /// Manager task main loop.
    pub fn run(&mut self) -> ! {
        info!("Manager running");
        loop {
            self.step();
        }
    }

    /// One Manager wake: housekeeping, wait for requests (bounded by the
    /// housekeeping interval), housekeeping, then apply whatever was
    /// requested.
    pub fn step(&mut self) {
        self.housekeeping();
        let timeout = self.manager.config().housekeeping_interval_ms;
        if !self.manager.scheduler().wait_notify(timeout) {
            trace!("Manager woke for housekeeping");
        }
        self.housekeeping();

        let requests = self.manager.take_requests();
        self.apply(requests);
    }

    /// Apply requests, stop before start.
    pub fn apply(&mut self, requests: Requests) {
        if requests.stop {
            self.stop_program();
        }
        if requests.start {
            self.start_program();
        }
    }

    fn stop_program(&mut self) {
        let Some(task) = self.program_task.take() else {
            return;
        };

        let faulted = self.state == ProgramState::Faulted;
        self.state = ProgramState::Stopping;

        // Stops further blocks.  The exit itself was flagged when requested.
        self.manager.handoff().detach();
        self.manager.scheduler().delete(task);
        info!("Program task {task:?} destroyed");

        self.state = if faulted {
            ProgramState::Faulted
        } else {
            ProgramState::Stopped
        };
    }

    fn start_program(&mut self) {
        if let Some(fault) = self.manager.fault() {
            warn!("Not starting program, faulted with status {}", fault.code);
            self.state = ProgramState::Faulted;
            return;
        }
        if let Some(task) = self.program_task {
            debug!("Program task {task:?} already running");
            return;
        }
        if self.manager.armed().is_none() {
            warn!("Starting program task with no valid program");
        }

        self.state = ProgramState::Starting;
        let spec = self.manager.config().program_spec();
        match self.manager.scheduler().spawn(&spec) {
            Ok(task) => {
                // The program task is lower priority, so cannot run before
                // it is attached
                self.manager.handoff().attach(task);
                self.program_task = Some(task);
                self.state = ProgramState::Running;
                info!("Program task {task:?} created");
            }
            Err(e) => {
                error!("Failed to create program task: {e:?}");
                self.state = ProgramState::Stopped;
            }
        }
    }

    fn housekeeping(&mut self) {
        let scheduler = self.manager.scheduler();

        if let Some(task) = self.program_task {
            self.stats.program_free_stack = lowest(
                self.stats.program_free_stack,
                scheduler.stack_high_water_mark(task),
            );
        }
        if let Some(task) = self.manager.manager_task() {
            self.stats.manager_free_stack = lowest(
                self.stats.manager_free_stack,
                scheduler.stack_high_water_mark(task),
            );
        }
        self.stats.peak_tasks = self.stats.peak_tasks.max(scheduler.task_count());

        let overruns = self.manager.overruns();
        if overruns != self.stats.overruns {
            debug!(
                "Program overran {} blocks ({overruns} total)",
                overruns.wrapping_sub(self.stats.overruns)
            );
            self.stats.overruns = overruns;
        }

        if self.manager.fault().is_some() {
            self.state = ProgramState::Faulted;
        }
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn program_task(&self) -> Option<TaskId> {
        self.program_task
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }
}
