//! Direct-poll handoff - a shared status flag and a busy-waiting program.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::handoff::{BlockStatus, Handoff, Overruns};
use crate::scheduler::{Scheduler, TaskId};

/// The audio interrupt marks the block [`BlockStatus::Ready`], and the
/// program task spins until it sees it, marking it
/// [`BlockStatus::Processed`].
///
/// Only the interrupt writes `Ready`, only the program task writes
/// `Processed`, and only the Manager writes `Idle`.  `ExitRequested` is
/// written when the exit is requested, before the Manager runs.  Once it is
/// set neither the interrupt nor the program task overwrite it, so the
/// program task is guaranteed to observe it.
///
/// The interrupt leaves the flag alone while no program task is attached.
pub struct DirectPoll {
    status: AtomicU8,
    attached: AtomicBool,
    overruns: Overruns,
}

impl DirectPoll {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(BlockStatus::Idle as u8),
            attached: AtomicBool::new(false),
            overruns: Overruns::new(),
        }
    }

    pub fn status(&self) -> BlockStatus {
        BlockStatus::from(self.status.load(Ordering::Acquire))
    }

    fn set(&self, status: BlockStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

impl Handoff for DirectPoll {
    fn attach(&self, _task: TaskId) {
        self.set(BlockStatus::Idle);
        self.attached.store(true, Ordering::Release);
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
        self.set(BlockStatus::ExitRequested);
    }

    fn request_exit(&self) {
        self.set(BlockStatus::ExitRequested);
    }

    fn audio_ready<S: Scheduler>(&self, _scheduler: &S) {
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        let prev = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| {
                match BlockStatus::from(status) {
                    BlockStatus::ExitRequested => None,
                    _ => Some(BlockStatus::Ready as u8),
                }
            });
        if prev == Ok(BlockStatus::Ready as u8) {
            self.overruns.inc();
        }
    }

    fn program_ready<S: Scheduler>(&self, _scheduler: &S) -> bool {
        loop {
            match self.status() {
                BlockStatus::Ready => {
                    // Fails only if exit was requested since the load
                    if self
                        .status
                        .compare_exchange(
                            BlockStatus::Ready as u8,
                            BlockStatus::Processed as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                }
                BlockStatus::ExitRequested => return false,
                BlockStatus::Idle | BlockStatus::Processed => core::hint::spin_loop(),
            }
        }
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
    fn block_cycles_ready_then_processed() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();
        handoff.attach(TaskId(3));
        assert_eq!(handoff.status(), BlockStatus::Idle);

        handoff.audio_ready(&sched);
        assert_eq!(handoff.status(), BlockStatus::Ready);

        assert!(handoff.program_ready(&sched));
        assert_eq!(handoff.status(), BlockStatus::Processed);
    }

    #[test]
    fn unprocessed_block_counts_as_overrun() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();
        handoff.attach(TaskId(3));

        handoff.audio_ready(&sched);
        handoff.audio_ready(&sched);

        assert_eq!(handoff.overruns(), 1);
        assert!(handoff.program_ready(&sched));
        assert_eq!(handoff.status(), BlockStatus::Processed);
    }

    #[test]
    fn exit_request_survives_interrupts() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();
        handoff.attach(TaskId(3));

        handoff.detach();
        handoff.audio_ready(&sched);

        assert_eq!(handoff.status(), BlockStatus::ExitRequested);
        assert!(!handoff.program_ready(&sched));
    }

    #[test]
    fn exit_request_is_seen_by_a_running_program() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();
        handoff.attach(TaskId(3));
        handoff.audio_ready(&sched);
        assert!(handoff.program_ready(&sched));

        handoff.request_exit();
        handoff.audio_ready(&sched);

        assert_eq!(handoff.status(), BlockStatus::ExitRequested);
        assert!(!handoff.program_ready(&sched));
    }

    #[test]
    fn interrupts_before_attach_are_ignored() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();

        handoff.audio_ready(&sched);
        handoff.audio_ready(&sched);
        handoff.audio_ready(&sched);

        assert_eq!(handoff.overruns(), 0);
        assert_eq!(handoff.status(), BlockStatus::Idle);
    }

    #[test]
    fn program_spins_until_ready() {
        let sched = MockScheduler::new();
        let handoff = DirectPoll::new();
        handoff.attach(TaskId(3));

        std::thread::scope(|scope| {
            let program = scope.spawn(|| handoff.program_ready(&sched));
            std::thread::sleep(std::time::Duration::from_millis(5));
            handoff.audio_ready(&sched);
            assert!(program.join().unwrap());
        });
    }
}
