//! Program manager for audio devices that run a user-supplied, dynamically
//! loaded signal-processing program.
//!
//! A program is a relocatable binary image produced by host tooling.  The
//! device copies it into a single fixed RAM region (PATCHRAM on the reference
//! hardware), sanity-checks it, and then runs it from a low priority task,
//! once per audio block, driven by the audio interrupt.  Programs can be saved
//! to and restored from fixed flash slots so they survive power cycles.
//!
//! `no_std`.  Requires `alloc` only for the async storage traits.
//!
//! ## Architecture
//!
//! - **Program image** ([`image`]) - the header contract between host tooling
//!   and the device: magic, initial stack pointer, entry point and link base
//!   address, as little-endian 32-bit words, followed by code and data.
//! - **Loader** ([`loader`]) - copies an image into the execution region,
//!   records the [`loader::ProgramHandle`] and verifies it before it is
//!   trusted.  The only jump into foreign code is
//!   [`loader::execute_at()`], which only accepts a
//!   [`loader::ValidatedEntry`].
//! - **Handoff** ([`handoff`]) - the interrupt-to-task synchronization that
//!   triggers one program invocation per audio block.  Three strategies are
//!   provided, selected at build time through the `H` type parameter of
//!   [`manager::ProgramManager`].
//! - **Manager** ([`manager`]) - owns the program task lifecycle.  Start,
//!   stop and reset requests are lock-free bit sets that may be raised from
//!   interrupt context; the Manager task applies them.
//! - **Persistence** ([`persist`]) - saves the resident image to, and restores
//!   it from, fixed-offset flash slots.
//!
//! The hardware and RTOS are reached only through traits:
//! - [`io::ExecutionRegion`] - the fixed RAM range holding the resident image
//! - [`io::Eeprom`] (and [`io::AsyncEeprom`]) - the flash block driver
//! - [`scheduler::Scheduler`] - the preemptive task scheduler
//!
//! ## Concurrency
//!
//! The audio interrupt never blocks or waits on a lock.  The execution region
//! and program handle are deliberately unlocked shared state: the caller must
//! make sure a load or save never overlaps with the program task running the
//! same region, typically by stopping the program first.
//!
//! ## Getting Started
//!
//! **Target setup**:
//! 1. Create a `static` [`manager::ProgramManager`] with your
//!    [`scheduler::Scheduler`] implementation and chosen handoff strategy.
//! 2. Create a [`io::PatchRam`] for the linker-reserved execution region and
//!    hand it to [`manager::ProgramManager::loader()`].  Every load through
//!    that loader disarms the previously armed program.
//! 3. Call [`manager::ProgramManager::start_manager()`].  The manager task
//!    trampoline must construct a [`manager::ManagerTask`] and call
//!    [`manager::ManagerTask::run()`]; the program task trampoline must call
//!    [`manager::ProgramManager::run_program_task()`].
//! 4. Load an image, arm it with [`loader::Loader::verified_entry()`] and
//!    [`manager::ProgramManager::arm()`], then request a start.
//! 5. Call [`manager::ProgramManager::audio_ready()`] from the audio
//!    interrupt once per block.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async storage driver trait and
//!   [`persist::futures::AsyncProgramStore`] (requires `alloc`).
//!
//! Compile with `--no-default-features` for firmware that only needs the
//! blocking flash driver.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod handoff;
pub mod image;
pub mod io;
pub mod loader;
pub mod manager;
pub mod persist;
pub mod scheduler;

#[cfg(test)]
mod mock;

/// Program manager errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Image link base address does not match the execution region
    InvalidLink,
    /// Image does not fit in the execution region
    ImageTooLarge,
    /// Image is shorter than its header
    ImageTooSmall,
    /// Magic sentinel missing from the resident image
    BadMagic,
    /// No entry point is armed
    NoEntryPoint,
    /// Initial stack pointer lies outside the execution region
    StackOutOfBounds,
    /// Flash slot index out of range
    InvalidSlot,
    /// Computed flash address outside the storage window
    OutOfWindow,
    /// Flash slot holds no saved program
    EmptySlot,
    /// Flash driver failure
    Storage,
    /// Scheduler could not create a task
    TaskCreate,
    /// Manager task has not been started
    NotStarted,
    /// A program reported a fatal status
    Faulted,
    /// Task priorities do not let the Manager preempt the program
    InvalidConfig,
}

/// Type to represent the result of a program manager operation
pub type Result<T> = core::result::Result<T, Error>;
