//! Program loader and validator.
//!
//! [`Loader`] owns the [`ExecutionRegion`] and the [`ProgramHandle`]
//! describing whatever was last loaded into it.  Loading copies the image
//! into the region if its link base address matches the region and it fits;
//! otherwise the handle's entry point is cleared and the region is left
//! untouched.
//!
//! Loading deliberately does not check the magic sentinel.  That is left to
//! [`Loader::verify()`], which is a best-effort sanity gate and not a
//! guarantee the code is safe to run.
//!
//! The only way to jump into a loaded program is [`execute_at()`], which
//! takes a [`ValidatedEntry`].  A `ValidatedEntry` can only be obtained from
//! [`Loader::verified_entry()`].
//!
//! Whoever holds an armed entry for the region is told through [`Arming`]
//! before every load, so an entry is never left armed over code it was not
//! verified against.  Use [`crate::manager::ProgramManager::loader()`] to
//! create the loader for a managed region.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::num::NonZeroU32;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::image::{PROGRAM_MAGIC, ProgramHeader};
use crate::io::ExecutionRegion;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// The loader's view of the resident program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramHandle {
    /// Entry point, `None` if the last load was rejected
    pub entry: Option<NonZeroU32>,

    /// Initial stack pointer from the image header
    pub stack_pointer: u32,

    /// Image length in bytes
    pub length: usize,

    /// Magic word from the image header
    pub magic: u32,
}

impl ProgramHandle {
    fn from_header(header: &ProgramHeader, length: usize) -> Self {
        Self {
            entry: None,
            stack_pointer: header.stack_pointer,
            length,
            magic: header.magic,
        }
    }
}

/// An entry point that has passed verification.
///
/// Only [`Loader::verified_entry()`] creates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedEntry(NonZeroU32);

impl ValidatedEntry {
    pub fn address(&self) -> u32 {
        self.0.get()
    }

    // Rebuilds an entry previously published with `address()`.  Only the
    // manager uses this, to carry an armed entry across an atomic.
    pub(crate) fn from_armed(address: u32) -> Option<Self> {
        NonZeroU32::new(address).map(Self)
    }
}

/// Holder of an armed entry point for a loader's region.
pub trait Arming {
    /// The region is about to be reloaded.  Any armed entry is stale.
    fn disarm(&self);
}

/// A loader with nothing armed from its region.
impl Arming for () {
    fn disarm(&self) {}
}

/// Loads program images into an execution region and validates them.
pub struct Loader<R: ExecutionRegion, A: Arming = ()> {
    region: R,
    handle: ProgramHandle,
    arming: A,
}

impl<R: ExecutionRegion> Loader<R> {
    /// Create a standalone loader owning `region`.  Nothing is loaded
    /// initially.
    ///
    /// Entries from a standalone loader must not be armed anywhere, as its
    /// loads disarm nothing.
    pub fn new(region: R) -> Self {
        Self::with_arming(region, ())
    }
}

impl<R: ExecutionRegion, A: Arming> Loader<R, A> {
    /// Create a loader owning `region`, disarming `arming` before each load.
    pub fn with_arming(region: R, arming: A) -> Self {
        Self {
            region,
            handle: ProgramHandle::default(),
            arming,
        }
    }

    /// Load an image from `image` into the execution region.
    ///
    /// The caller must make sure the program is not running.  The region is
    /// overwritten unconditionally once the link and length checks pass.
    ///
    /// On failure the handle's entry point is cleared and the region is not
    /// touched.  Either way any armed entry is disarmed.
    pub fn load(&mut self, image: &[u8]) -> Result<()> {
        let header = match ProgramHeader::parse(image) {
            Ok(header) => header,
            Err(e) => {
                self.arming.disarm();
                self.handle = ProgramHandle {
                    length: image.len(),
                    ..ProgramHandle::default()
                };
                warn!("Rejected program image: {e:?}");
                return Err(e);
            }
        };

        self.load_with(&header, image.len(), |region| {
            region.copy_from_slice(image);
            Ok(())
        })
    }

    /// Load an image of `length` bytes whose header has already been read,
    /// with `fill` writing the image into the region.
    ///
    /// This lets images be copied straight from storage into the region
    /// without an intermediate buffer.  `fill` is only called once the link
    /// and length checks pass, and is given exactly `length` bytes.  If
    /// `fill` fails the entry point stays cleared.  Any armed entry is
    /// disarmed before anything else.
    pub fn load_with<F>(&mut self, header: &ProgramHeader, length: usize, fill: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        self.arming.disarm();
        self.handle = ProgramHandle::from_header(header, length);

        if header.link_base != self.region.base() {
            warn!(
                "Rejected program image: linked at {:#010X}, region at {:#010X}",
                header.link_base,
                self.region.base()
            );
            return Err(Error::InvalidLink);
        }
        if length >= self.region.capacity() {
            warn!(
                "Rejected program image: {length} bytes, region holds {}",
                self.region.capacity()
            );
            return Err(Error::ImageTooLarge);
        }

        fill(&mut self.region.bytes_mut()[..length])?;

        self.handle.entry = NonZeroU32::new(header.entry_point);
        info!(
            "Loaded program: {length} bytes, entry {:#010X}, stack {:#010X}",
            header.entry_point, header.stack_pointer
        );
        Ok(())
    }

    /// Check the loaded program.
    ///
    /// Returns true if the magic sentinel is present, the entry point is set
    /// and the stack pointer lies within the execution region.
    pub fn verify(&self) -> bool {
        self.check().is_ok()
    }

    /// As [`Self::verify()`], but reports which check failed.
    pub fn check(&self) -> Result<()> {
        if self.handle.magic != PROGRAM_MAGIC {
            return Err(Error::BadMagic);
        }
        if self.handle.entry.is_none() {
            return Err(Error::NoEntryPoint);
        }
        if !self.region.contains(self.handle.stack_pointer) {
            return Err(Error::StackOutOfBounds);
        }
        Ok(())
    }

    /// Returns the entry point if the loaded program passes [`Self::check()`]
    /// and the header resident in the region still describes it.
    ///
    /// The resident header is re-read so that an image loaded, and then
    /// partially overwritten, is not jumped into.
    pub fn verified_entry(&self) -> Result<ValidatedEntry> {
        self.check()?;
        let entry = self.handle.entry.ok_or(Error::NoEntryPoint)?;

        let resident = ProgramHeader::parse(self.region.bytes())?;
        if !resident.has_magic() {
            return Err(Error::BadMagic);
        }
        if resident.link_base != self.region.base() {
            return Err(Error::InvalidLink);
        }
        if resident.entry_point != entry.get() || resident.stack_pointer != self.handle.stack_pointer
        {
            return Err(Error::NoEntryPoint);
        }

        Ok(ValidatedEntry(entry))
    }

    pub fn handle(&self) -> &ProgramHandle {
        &self.handle
    }

    /// The bytes of the loaded image, as resident in the region.
    ///
    /// Empty if the last load was rejected.
    pub fn resident_image(&self) -> &[u8] {
        if self.handle.entry.is_some() {
            &self.region.bytes()[..self.handle.length]
        } else {
            &[]
        }
    }

    pub fn region(&self) -> &R {
        &self.region
    }
}

/// Jump into a loaded program.  Called from the program task.
///
/// The program is invoked with no arguments.  If it ever returns, the
/// calling task suspends itself forever and waits to be destroyed by the
/// Manager.
pub fn execute_at<S: Scheduler>(entry: ValidatedEntry, scheduler: &S) -> ! {
    // SAFETY: `entry` has been verified against the resident image header.
    // This is a sanity check only: the program is foreign code, and nothing
    // can guarantee it is well behaved.
    let address = entry.address() as usize as *const ();
    let program = unsafe { core::mem::transmute::<*const (), extern "C" fn()>(address) };
    program();

    warn!("Program returned");
    loop {
        scheduler.suspend_current();
    }
}
