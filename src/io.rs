//! Traits for the memory and storage the program manager works against.
//!
//! This module contains the seams between the program manager and the
//! device:
//!
//! - [`ExecutionRegion`] - the single fixed RAM range a program image is
//!   copied into and executed from
//! - [`Eeprom`] - the blocking flash/EEPROM block driver used to persist
//!   program images
//! - [`AsyncEeprom`] - the async counterpart of [`Eeprom`], for drivers
//!   that complete erase and write operations asynchronously
//!
//! # Possible implementations
//!
//! - For embedded devices: [`PatchRam`] for the linker-reserved execution
//!   region, and a thin wrapper around the vendor flash HAL for [`Eeprom`]
//! - For PC-based tooling and tests: in-memory buffers
//!
//! # Address Space
//!
//! [`Eeprom`] addresses are offsets from the EEPROM base address of the
//! device, as produced by [`crate::persist::FlashLayout::slot_address()`].
//! The implementation is responsible for translating these to whatever its
//! driver expects.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
use alloc::boxed::Box;
#[cfg(feature = "async")]
use async_trait::async_trait;

use crate::image::{PATCHRAM_BASE, PATCHRAM_SIZE};

/// Execution region trait.
///
/// The region holds at most one resident program and is overwritten
/// wholesale on every load.  The implementation must own the region
/// exclusively, no other code may write to it.
pub trait ExecutionRegion {
    /// Absolute address of the first byte of the region, as seen by the
    /// program when it runs.
    fn base(&self) -> u32;

    /// Size of the region in bytes.
    fn capacity(&self) -> usize;

    /// The whole region.
    fn bytes(&self) -> &[u8];

    /// The whole region, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Returns true if `addr` lies within `[base, base + capacity)`.
    fn contains(&self, addr: u32) -> bool {
        let base = self.base() as u64;
        let addr = addr as u64;
        addr >= base && addr < base + self.capacity() as u64
    }
}

/// Blocking flash/EEPROM driver.
///
/// Each call is assumed to be atomic and fail-stop on hardware error.  The
/// program manager never retries a failed call.
pub trait Eeprom {
    /// The error type returned by driver operations.
    type Error: core::fmt::Debug;

    /// Unlock the storage for erase and write.
    fn unlock(&mut self) -> Result<(), Self::Error>;

    /// Erase the block starting at `addr`.
    fn erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Write `data` starting at `addr`.  The target must have been erased.
    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Lock the storage against further erase and write.
    fn lock(&mut self) -> Result<(), Self::Error>;

    /// Read `buf.len()` bytes starting at `addr`.
    ///
    /// On memory-mapped flash this is a plain copy and does not require the
    /// storage to be unlocked.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Async flash/EEPROM driver, with the same contract as [`Eeprom`].
#[cfg(feature = "async")]
#[async_trait(?Send)]
pub trait AsyncEeprom {
    /// The error type returned by driver operations.
    type Error: core::fmt::Debug;

    /// Unlock the storage for erase and write.
    async fn unlock(&mut self) -> Result<(), Self::Error>;

    /// Erase the block starting at `addr`.
    async fn erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Write `data` starting at `addr`.  The target must have been erased.
    async fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Lock the storage against further erase and write.
    async fn lock(&mut self) -> Result<(), Self::Error>;

    /// Read `buf.len()` bytes starting at `addr`.
    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Execution region backed by a fixed, linker-reserved RAM range.
pub struct PatchRam {
    base: u32,
    size: usize,
}

impl PatchRam {
    /// Create the reference device's execution region, [`PATCHRAM_SIZE`]
    /// bytes at [`PATCHRAM_BASE`].
    ///
    /// # Safety
    ///
    /// The range must be reserved by the linker script for this purpose,
    /// and only one `PatchRam` may exist for it at any time.
    pub const unsafe fn new() -> Self {
        unsafe { Self::with_range(PATCHRAM_BASE, PATCHRAM_SIZE) }
    }

    /// Create an execution region at an arbitrary RAM range.
    ///
    /// # Safety
    ///
    /// As for [`Self::new()`]: the range must be valid, writable RAM that
    /// nothing else uses, and only one `PatchRam` may exist for it.
    pub const unsafe fn with_range(base: u32, size: usize) -> Self {
        Self { base, size }
    }
}

impl ExecutionRegion for PatchRam {
    fn base(&self) -> u32 {
        self.base
    }

    fn capacity(&self) -> usize {
        self.size
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: The constructor's contract guarantees the range is valid
        // RAM owned by this object.
        unsafe { core::slice::from_raw_parts(self.base as *const u8, self.size) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: As above, and `&mut self` guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.base as *mut u8, self.size) }
    }
}
