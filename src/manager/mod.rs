//! Program lifecycle management.
//!
//! [`ProgramManager`] is the part shared between the audio interrupt, the
//! program task, the Manager task and whatever receives host requests.
//! Every method takes `&self` and only touches atomics, so it can live in a
//! `static`:
//! - lifecycle requests ([`ProgramManager::start_program()`],
//!   [`ProgramManager::exit()`], [`ProgramManager::reset()`]) set bits and
//!   wake the Manager task, and are safe to call from interrupt context
//! - [`ProgramManager::audio_ready()`] and [`ProgramManager::program_ready()`]
//!   drive the block handoff
//! - [`ProgramManager::run_program_task()`] is the program task body
//!
//! [`ManagerTask`] is owned by the Manager task alone.  It holds the program
//! task handle and applies requests: a stop is always applied before a start
//! from the same wake, so a reset tears the program task down and recreates
//! it with no audio block in between.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod task;

pub use task::{ManagerTask, ProgramState, TaskStats};

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handoff::Handoff;
use crate::io::ExecutionRegion;
use crate::loader::{Arming, Loader, ValidatedEntry, execute_at};
use crate::scheduler::{Scheduler, TaskId, TaskSlot, TaskSpec};
use crate::{Error, Result};

/// Configuration for the Manager and program tasks.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Manager task priority.  Must be above the program task's.
    pub manager_priority: u8,
    /// Program task priority
    pub program_priority: u8,
    /// Manager task stack, in bytes
    pub manager_stack_bytes: usize,
    /// Program task stack, in bytes
    pub program_stack_bytes: usize,
    /// Longest the Manager waits for a request before running housekeeping
    pub housekeeping_interval_ms: u32,
    /// Program task trampoline, must call
    /// [`ProgramManager::run_program_task()`]
    pub program_entry: fn(),
    /// Manager task trampoline, must run a [`ManagerTask`]
    pub manager_entry: fn(),
}

impl ManagerConfig {
    /// Configuration matching the reference device.
    pub const fn new(program_entry: fn(), manager_entry: fn()) -> Self {
        Self {
            manager_priority: 4,
            program_priority: 2,
            manager_stack_bytes: 8 * 1024,
            program_stack_bytes: 16 * 1024,
            housekeeping_interval_ms: 5000,
            program_entry,
            manager_entry,
        }
    }

    /// Check the Manager can preempt the program task.
    pub fn check(&self) -> Result<()> {
        if self.manager_priority <= self.program_priority {
            error!(
                "Manager priority {} must be above program priority {}",
                self.manager_priority, self.program_priority
            );
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    pub(crate) fn manager_spec(&self) -> TaskSpec {
        TaskSpec {
            name: "Manager",
            stack_bytes: self.manager_stack_bytes,
            priority: self.manager_priority,
            entry: self.manager_entry,
        }
    }

    pub(crate) fn program_spec(&self) -> TaskSpec {
        TaskSpec {
            name: "Program",
            stack_bytes: self.program_stack_bytes,
            priority: self.program_priority,
            entry: self.program_entry,
        }
    }
}

/// A fatal status reported by the running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
}

/// Lifecycle requests waiting for the Manager.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Requests {
    pub start: bool,
    pub stop: bool,
}

impl Requests {
    const START: u32 = 0x01;
    const STOP: u32 = 0x02;

    fn from_bits(bits: u32) -> Self {
        Self {
            start: bits & Self::START != 0,
            stop: bits & Self::STOP != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.start && !self.stop
    }
}

/// State shared between the interrupt, the Manager and the program task.
pub struct ProgramManager<S: Scheduler, H: Handoff> {
    scheduler: S,
    handoff: H,
    config: ManagerConfig,
    requests: AtomicU32,
    manager_task: TaskSlot,
    armed: AtomicU32,
    faulted: AtomicBool,
    fault_code: AtomicI32,
}

impl<S: Scheduler, H: Handoff> ProgramManager<S, H> {
    pub const fn new(scheduler: S, handoff: H, config: ManagerConfig) -> Self {
        Self {
            scheduler,
            handoff,
            config,
            requests: AtomicU32::new(0),
            manager_task: TaskSlot::new(),
            armed: AtomicU32::new(0),
            faulted: AtomicBool::new(false),
            fault_code: AtomicI32::new(0),
        }
    }

    /// Create the Manager task, if it does not already exist.
    pub fn start_manager(&self) -> Result<TaskId> {
        if let Some(task) = self.manager_task.get() {
            return Ok(task);
        }
        self.config.check()?;

        let task = self
            .scheduler
            .spawn(&self.config.manager_spec())
            .map_err(|e| {
                error!("Failed to create Manager task: {e:?}");
                Error::TaskCreate
            })?;
        self.manager_task.set(task);
        info!("Manager task {task:?} created");

        // Pick up anything requested before the Manager existed
        if self.requests.load(Ordering::Acquire) != 0 {
            self.scheduler.notify_from_isr(task);
        }
        Ok(task)
    }

    /// Request the program task be started.  Interrupt safe.
    pub fn start_program(&self) {
        self.request(Requests::START);
    }

    /// Request the program task be stopped.  Interrupt safe.
    ///
    /// The handoff is told straight away, so a program polling it sees the
    /// request before the Manager destroys its task.
    pub fn exit(&self) {
        self.request(Requests::STOP);
    }

    /// Request the program task be stopped and started again.  Interrupt
    /// safe.
    pub fn reset(&self) {
        self.request(Requests::STOP | Requests::START);
    }

    fn request(&self, bits: u32) {
        if bits & Requests::STOP != 0 {
            self.handoff.request_exit();
        }
        self.requests.fetch_or(bits, Ordering::AcqRel);
        if let Some(task) = self.manager_task.get() {
            let switch = self.scheduler.notify_from_isr(task);
            self.scheduler.yield_from_isr(switch);
        }
    }

    /// Take all pending requests.
    pub(crate) fn take_requests(&self) -> Requests {
        Requests::from_bits(self.requests.swap(0, Ordering::AcqRel))
    }

    /// Requests raised but not yet applied by the Manager.
    pub fn pending_requests(&self) -> Requests {
        Requests::from_bits(self.requests.load(Ordering::Acquire))
    }

    /// Call from the audio interrupt once per block.
    pub fn audio_ready(&self) {
        self.handoff.audio_ready(&self.scheduler);
    }

    /// Call from the program, once it has processed a block.  Returns when
    /// the next block is ready, or false if the program should exit.
    pub fn program_ready(&self) -> bool {
        self.handoff.program_ready(&self.scheduler)
    }

    /// Create the loader for the region programs run from.
    ///
    /// Every load through it disarms the entry point first, so the program
    /// task never jumps into code the armed entry was not verified against.
    pub fn loader<R: ExecutionRegion>(&self, region: R) -> Loader<R, &Self> {
        Loader::with_arming(region, self)
    }

    /// Publish the entry point the next program task will run.
    ///
    /// The caller must make sure no program task is running, and should only
    /// arm entries from [`Self::loader()`].
    pub fn arm(&self, entry: Option<ValidatedEntry>) {
        let address = entry.map(|e| e.address()).unwrap_or(0);
        let previous = self.armed.swap(address, Ordering::AcqRel);
        match entry {
            Some(entry) => debug!("Armed program entry {:#010X}", entry.address()),
            None if previous != 0 => debug!("Disarmed program entry"),
            None => (),
        }
    }

    pub fn armed(&self) -> Option<ValidatedEntry> {
        ValidatedEntry::from_armed(self.armed.load(Ordering::Acquire))
    }

    /// Body of the program task.
    ///
    /// Jumps into the armed program.  If none is armed the task suspends
    /// itself and waits to be destroyed.
    pub fn run_program_task(&self) -> ! {
        match self.armed() {
            Some(entry) => execute_at(entry, &self.scheduler),
            None => {
                warn!("Program task started with no valid program");
                loop {
                    self.scheduler.suspend_current();
                }
            }
        }
    }

    /// Record a fatal status from the program.
    ///
    /// The program gets no more blocks, and the Manager will refuse to start
    /// another program task.
    pub fn record_fault(&self, code: i32) {
        self.fault_code.store(code, Ordering::Relaxed);
        self.faulted.store(true, Ordering::Release);
        self.handoff.detach();
        error!("Program reported fatal status {code}");
    }

    /// Called by the program when it hits an error or anomaly.  Never
    /// returns: the program task halts, and stays halted until the device
    /// is reset.
    pub fn program_status(&self, code: i32) -> ! {
        self.record_fault(code);
        loop {
            self.scheduler.suspend_current();
        }
    }

    pub fn fault(&self) -> Option<Fault> {
        self.faulted.load(Ordering::Acquire).then(|| Fault {
            code: self.fault_code.load(Ordering::Relaxed),
        })
    }

    pub fn manager_task(&self) -> Option<TaskId> {
        self.manager_task.get()
    }

    /// Blocks dropped because the program overran its budget.
    pub fn overruns(&self) -> u32 {
        self.handoff.overruns()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn handoff(&self) -> &H {
        &self.handoff
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

impl<S: Scheduler, H: Handoff> Arming for &ProgramManager<S, H> {
    fn disarm(&self) {
        self.arm(None);
    }
}
