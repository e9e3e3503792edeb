//! The real-time task scheduler the program manager runs on.
//!
//! The scheduler itself is not implemented here.  Firmware provides a
//! [`Scheduler`] implementation over its RTOS (FreeRTOS on the reference
//! device), and the program manager drives the program task lifecycle and
//! the per-block handoff through it.
//!
//! Three priority tiers matter: the audio interrupt (highest, never blocks),
//! the Manager task, and the program task (lowest of the three).

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicUsize, Ordering};

/// Opaque handle to a scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub usize);

/// Parameters for creating a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// Task name, for RTOS diagnostics
    pub name: &'static str,

    /// Stack allocation in bytes
    pub stack_bytes: usize,

    /// Scheduler priority, higher runs first
    pub priority: u8,

    /// Function the task starts in
    pub entry: fn(),
}

/// Scheduler primitives.
///
/// Methods documented as interrupt safe must not block, allocate or take a
/// lock.  They may be called from the audio interrupt.
pub trait Scheduler {
    /// The error type returned when a task cannot be created.
    type Error: core::fmt::Debug;

    /// Create a task.  The task is runnable on return.
    fn spawn(&self, spec: &TaskSpec) -> Result<TaskId, Self::Error>;

    /// Destroy a task immediately, wherever it is in its execution.
    fn delete(&self, task: TaskId);

    /// Resume a suspended task.  Interrupt safe.
    ///
    /// Resuming a task that is not suspended must be a no-op.  Returns true
    /// if the resumed task should preempt the interrupted one.
    fn resume_from_isr(&self, task: TaskId) -> bool;

    /// Suspend the calling task until it is resumed.
    fn suspend_current(&self);

    /// Let other ready tasks of equal priority run.
    fn yield_now(&self);

    /// Wake `task` from [`Self::wait_notify()`].  Interrupt safe.
    ///
    /// Returns true if the woken task should preempt the interrupted one.
    fn notify_from_isr(&self, task: TaskId) -> bool;

    /// Block the calling task until notified or `timeout_ms` elapses.
    ///
    /// Returns true if notified.
    fn wait_notify(&self, timeout_ms: u32) -> bool;

    /// Request a context switch on interrupt exit, following an interrupt
    /// safe call that returned true.  Interrupt safe.
    fn yield_from_isr(&self, switch: bool);

    /// Minimum free stack, in bytes, ever observed for `task`.
    fn stack_high_water_mark(&self, task: TaskId) -> Option<usize>;

    /// Number of tasks currently known to the scheduler.
    fn task_count(&self) -> usize;
}

const NO_TASK: usize = usize::MAX;

/// Task handle that can be read from interrupt context.
pub(crate) struct TaskSlot {
    task: AtomicUsize,
}

impl TaskSlot {
    pub(crate) const fn new() -> Self {
        Self {
            task: AtomicUsize::new(NO_TASK),
        }
    }

    pub(crate) fn set(&self, task: TaskId) {
        debug_assert!(task.0 != NO_TASK, "task id collides with NO_TASK");
        self.task.store(task.0, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.task.store(NO_TASK, Ordering::Release);
    }

    pub(crate) fn get(&self) -> Option<TaskId> {
        match self.task.load(Ordering::Acquire) {
            NO_TASK => None,
            id => Some(TaskId(id)),
        }
    }
}
