//! Counting-signal handoff - a depth-one signal polled by the program task.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, Ordering};

use crate::handoff::{Handoff, Overruns};
use crate::scheduler::{Scheduler, TaskId, TaskSlot};

/// The audio interrupt posts a signal, and the program task takes it with a
/// non-blocking poll after each block, yielding between polls.
///
/// The signal holds at most one pending block.  A second post before the
/// task has taken the first is coalesced into it and counted as an overrun.
pub struct CountingSignal {
    task: TaskSlot,
    pending: AtomicBool,
    overruns: Overruns,
}

impl CountingSignal {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            task: TaskSlot::new(),
            pending: AtomicBool::new(false),
            overruns: Overruns::new(),
        }
    }

    /// Take the pending signal, if any, without waiting.
    pub fn try_take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Handoff for CountingSignal {
    fn attach(&self, task: TaskId) {
        self.pending.store(false, Ordering::Release);
        self.task.set(task);
    }

    fn detach(&self) {
        self.task.clear();
        self.pending.store(false, Ordering::Release);
    }

    fn audio_ready<S: Scheduler>(&self, _scheduler: &S) {
        if self.task.get().is_none() {
            return;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            self.overruns.inc();
        }
    }

    fn program_ready<S: Scheduler>(&self, scheduler: &S) -> bool {
        while !self.try_take() {
            scheduler.yield_now();
        }
        true
    }

    fn overruns(&self) -> u32 {
        self.overruns.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockScheduler;

    #[test]
    fn signal_is_ignored_without_a_task() {
        let sched = MockScheduler::new();
        let handoff = CountingSignal::new();

        handoff.audio_ready(&sched);

        assert!(!handoff.try_take());
    }

    #[test]
    fn pending_signal_is_consumed_once() {
        let sched = MockScheduler::new();
        let handoff = CountingSignal::new();
        handoff.attach(TaskId(7));

        handoff.audio_ready(&sched);
        assert!(handoff.program_ready(&sched));

        assert!(!handoff.try_take());
        assert_eq!(sched.with(|s| s.yields), 0);
    }

    #[test]
    fn excess_signals_coalesce() {
        let sched = MockScheduler::new();
        let handoff = CountingSignal::new();
        handoff.attach(TaskId(7));

        handoff.audio_ready(&sched);
        handoff.audio_ready(&sched);
        handoff.audio_ready(&sched);

        assert_eq!(handoff.overruns(), 2);
        assert!(handoff.try_take());
        assert!(!handoff.try_take());
    }

    #[test]
    fn program_waits_for_the_next_block() {
        let sched = MockScheduler::new();
        let handoff = CountingSignal::new();
        handoff.attach(TaskId(7));

        std::thread::scope(|scope| {
            let program = scope.spawn(|| handoff.program_ready(&sched));
            while sched.with(|s| s.yields) == 0 {
                std::thread::yield_now();
            }
            handoff.audio_ready(&sched);
            assert!(program.join().unwrap());
        });

        assert_eq!(handoff.overruns(), 0);
    }
}
