//! Audio block handoff between the audio interrupt and the program task.
//!
//! Once per audio block the interrupt calls [`Handoff::audio_ready()`], and
//! the program task calls [`Handoff::program_ready()`] once it has finished
//! processing a block.  All strategies behave the same from the outside: at
//! most one program invocation is in flight, and the interrupt side never
//! blocks, never queues and never waits on a lock.  If the program overruns
//! its block budget the wake for that block is dropped, and counted in
//! [`Handoff::overruns()`].  An overrun is not an error.
//!
//! Strategies:
//! - [`SuspendResume`] - the interrupt resumes the suspended program task,
//!   which suspends itself after each block.  Preferred.
//! - [`CountingSignal`] - the interrupt posts a depth-one signal that the
//!   program task polls for after each block.
//! - [`DirectPoll`] - the interrupt and the program task cooperate through a
//!   shared [`BlockStatus`] flag, with the task busy-waiting.  Only for use
//!   without a cooperative scheduler.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod direct;
pub mod signal;
pub mod suspend;

pub use direct::DirectPoll;
pub use signal::CountingSignal;
pub use suspend::SuspendResume;

use core::sync::atomic::{AtomicU32, Ordering};

use crate::scheduler::{Scheduler, TaskId};

/// Interrupt-to-task block synchronization.
pub trait Handoff {
    /// Manager: a program task has been created and is about to run.
    fn attach(&self, task: TaskId);

    /// Manager: the program task is about to be destroyed.  Also called when
    /// the program faults, after which it gets no more blocks.
    fn detach(&self);

    /// The program has been asked to exit, and will be destroyed once the
    /// Manager runs.  Interrupt safe.
    ///
    /// Only strategies where the program can observe the request need act on
    /// it.
    fn request_exit(&self) {}

    /// Interrupt: a block is ready for processing.
    ///
    /// Must be non-blocking and constant time.
    fn audio_ready<S: Scheduler>(&self, scheduler: &S);

    /// Program task: the current block has been processed.  Returns when the
    /// next block is ready.
    ///
    /// Must only be called from the program task, once per block.  Returns
    /// false if, instead of a block, the Manager has asked the program to
    /// exit.
    fn program_ready<S: Scheduler>(&self, scheduler: &S) -> bool;

    /// Number of blocks dropped because the program was still busy.
    fn overruns(&self) -> u32;
}

/// Status of the current block, as shared by [`DirectPoll`].
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    #[default]
    Idle = 0,
    Ready = 1,
    Processed = 2,
    ExitRequested = 3,
}

impl From<u8> for BlockStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => BlockStatus::Idle,
            1 => BlockStatus::Ready,
            2 => BlockStatus::Processed,
            _ => BlockStatus::ExitRequested,
        }
    }
}

struct Overruns {
    count: AtomicU32,
}

impl Overruns {
    const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}
