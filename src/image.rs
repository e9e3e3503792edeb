//! Program image header.
//!
//! A program image is produced by host tooling and starts with a fixed
//! header of little-endian 32-bit words:
//!
//! | word | field                 |
//! |------|-----------------------|
//! | 0    | magic (`0xDADAC0DE`)  |
//! | 1    | initial stack pointer |
//! | 2    | entry point           |
//! | 3    | link base address     |
//!
//! Raw code and data follow the header.  The image must be linked to run
//! from the execution region's base address; it is never relocated.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result};

/// Sentinel identifying a valid program image.
pub const PROGRAM_MAGIC: u32 = 0xDADA_C0DE;

/// Base address of the execution region on the reference device.
pub const PATCHRAM_BASE: u32 = 0x2000_C000;

/// Capacity of the execution region on the reference device.
pub const PATCHRAM_SIZE: usize = 80 * 1024;

/// Program image header, as laid out at the start of every image.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Sentinel, [`PROGRAM_MAGIC`] for a valid image
    pub magic: u32,

    /// Address the program's stack starts at
    pub stack_pointer: u32,

    /// Address of the program's first instruction
    pub entry_point: u32,

    /// Address the image expects to be loaded at
    pub link_base: u32,
}

/// ProgramHeader offsets
impl ProgramHeader {
    pub const fn magic_offset() -> usize {
        core::mem::offset_of!(ProgramHeader, magic)
    }

    pub const fn stack_pointer_offset() -> usize {
        core::mem::offset_of!(ProgramHeader, stack_pointer)
    }

    pub const fn entry_point_offset() -> usize {
        core::mem::offset_of!(ProgramHeader, entry_point)
    }

    pub const fn link_base_offset() -> usize {
        core::mem::offset_of!(ProgramHeader, link_base)
    }

    /// Size of the header in bytes.
    pub const fn size() -> usize {
        core::mem::size_of::<Self>()
    }
}

impl ProgramHeader {
    /// Parse the header from the start of an image.
    ///
    /// Only the header is read.  No field is validated here, see
    /// [`crate::loader::Loader`] for the checks applied before an image is
    /// trusted.
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < Self::size() {
            return Err(Error::ImageTooSmall);
        }

        Ok(Self {
            magic: read_word(image, Self::magic_offset()),
            stack_pointer: read_word(image, Self::stack_pointer_offset()),
            entry_point: read_word(image, Self::entry_point_offset()),
            link_base: read_word(image, Self::link_base_offset()),
        })
    }

    /// Serialize the header, e.g. for building test images or host tooling.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[Self::magic_offset()..][..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[Self::stack_pointer_offset()..][..4]
            .copy_from_slice(&self.stack_pointer.to_le_bytes());
        bytes[Self::entry_point_offset()..][..4].copy_from_slice(&self.entry_point.to_le_bytes());
        bytes[Self::link_base_offset()..][..4].copy_from_slice(&self.link_base.to_le_bytes());
        bytes
    }

    pub fn has_magic(&self) -> bool {
        self.magic == PROGRAM_MAGIC
    }
}

// Caller guarantees `offset + 4 <= bytes.len()`.
fn read_word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
