//! Suspend/resume handoff - the interrupt resumes the program task.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, Ordering};

use crate::handoff::{Handoff, Overruns};
use crate::scheduler::{Scheduler, TaskId, TaskSlot};

/// The program task suspends itself after each block, and the audio
/// interrupt resumes it.
///
/// If the interrupt fires before the task has suspended, the resume is a
/// no-op against a running task and the block is dropped.  Nothing is
/// queued: each suspend cycle processes exactly one block.
pub struct SuspendResume {
    task: TaskSlot,
    busy: AtomicBool,
    overruns: Overruns,
}

impl SuspendResume {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            task: TaskSlot::new(),
            busy: AtomicBool::new(false),
            overruns: Overruns::new(),
        }
    }
}

impl Handoff for SuspendResume {
    fn attach(&self, task: TaskId) {
        // A new task is runnable, and processes its first block straight away
        self.busy.store(true, Ordering::Release);
        self.task.set(task);
    }

    fn detach(&self) {
        self.task.clear();
        self.busy.store(false, Ordering::Release);
    }

    fn audio_ready<S: Scheduler>(&self, scheduler: &S) {
        let Some(task) = self.task.get() else {
            return;
        };

        // The busy flag only feeds the overrun count.  The resume is always
        // issued, as the task may have cleared the flag and not yet
        // suspended, and the scheduler ignores resumes of running tasks.
        if self.busy.swap(true, Ordering::AcqRel) {
            self.overruns.inc();
        }
        let switch = scheduler.resume_from_isr(task);
        scheduler.yield_from_isr(switch);
    }

    fn program_ready<S: Scheduler>(&self, scheduler: &S) -> bool {
        self.busy.store(false, Ordering::Release);
        scheduler.suspend_current();
        true
    }

    fn overruns(&self) -> u32 {
        self.overruns.get()
    }
}
