//! Flash persistence for program images.
//!
//! Programs are saved to fixed-size, fixed-offset flash slots, identified by
//! a small index.  On the reference device slot 0 is the 128 KiB flash
//! sector at `0x080E_0000` (sector 11), with each further slot one sector
//! lower.  Addresses handed to the [`crate::io::Eeprom`] driver are offsets
//! from the EEPROM base address, `0x0800_4000`, and must fall within the
//! storage window.
//!
//! Each slot starts with a [`SlotHeader`] recording the image length,
//! followed by the image bytes exactly as they were resident in the
//! execution region.
//!
//! See [`ProgramStore`] for blocking drivers, and
//! [`futures::AsyncProgramStore`] for async drivers.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::AsyncProgramStore;
pub use sync::ProgramStore;

use crate::image::ProgramHeader;
use crate::{Error, Result};

/// Flash slot addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    /// Absolute address of slot 0
    pub top: u32,
    /// Size of each slot, and the step between slots
    pub block_size: u32,
    /// Absolute address the EEPROM driver's offsets are relative to
    pub eeprom_base: u32,
    /// Lowest valid driver offset
    pub window_start: u32,
    /// Highest valid driver offset
    pub window_end: u32,
    /// Number of slots
    pub slot_count: u8,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            top: 0x080E_0000,
            block_size: 128 * 1024,
            eeprom_base: 0x0800_4000,
            window_start: 0x0003_C000,
            window_end: 0x000D_C000,
            slot_count: 5,
        }
    }
}

impl FlashLayout {
    /// Driver offset of `slot`.
    ///
    /// Slots count backwards from [`Self::top`] in [`Self::block_size`]
    /// steps.
    pub fn slot_address(&self, slot: u8) -> Result<u32> {
        if slot >= self.slot_count {
            return Err(Error::InvalidSlot);
        }

        let addr = (slot as u32)
            .checked_mul(self.block_size)
            .and_then(|step| self.top.checked_sub(step))
            .and_then(|addr| addr.checked_sub(self.eeprom_base))
            .ok_or(Error::OutOfWindow)?;

        if addr < self.window_start || addr > self.window_end {
            return Err(Error::OutOfWindow);
        }
        Ok(addr)
    }
}

/// Header written at the start of every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Length of the image following the header, in bytes
    pub length: u32,
}

impl SlotHeader {
    pub const MAGIC: u32 = u32::from_le_bytes(*b"PMSL");
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&Self::MAGIC.to_le_bytes());
        bytes[4..].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// Decode a header, or `None` if the slot has never been written.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        (magic == Self::MAGIC).then_some(Self { length })
    }
}

// Helper functions

fn check_fits(layout: &FlashLayout, length: usize) -> Result<()> {
    if SlotHeader::SIZE + length > layout.block_size as usize {
        Err(Error::ImageTooLarge)
    } else {
        Ok(())
    }
}

fn check_image_length(header: &SlotHeader) -> Result<usize> {
    let length = header.length as usize;
    if length < ProgramHeader::size() {
        Err(Error::ImageTooSmall)
    } else {
        Ok(length)
    }
}

const fn image_address(slot_addr: u32) -> u32 {
    slot_addr + SlotHeader::SIZE as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_slots_step_back_from_sector_11() {
        let layout = FlashLayout::default();

        assert_eq!(layout.slot_address(0), Ok(0xD_C000));
        assert_eq!(layout.slot_address(1), Ok(0xB_C000));
        assert_eq!(layout.slot_address(4), Ok(0x5_C000));
    }

    #[test]
    fn slot_past_the_last_is_invalid() {
        let layout = FlashLayout::default();

        assert_eq!(layout.slot_address(5), Err(Error::InvalidSlot));
        assert_eq!(layout.slot_address(u8::MAX), Err(Error::InvalidSlot));
    }

    #[test]
    fn addresses_outside_the_window_are_rejected() {
        let layout = FlashLayout {
            slot_count: 8,
            ..FlashLayout::default()
        };

        // 0xDC000 - 5 * 128K = 0x3C000 is the last offset in the window
        assert_eq!(layout.slot_address(5), Ok(0x3_C000));
        assert_eq!(layout.slot_address(6), Err(Error::OutOfWindow));

        let layout = FlashLayout {
            top: 0x0800_0000,
            ..FlashLayout::default()
        };
        assert_eq!(layout.slot_address(0), Err(Error::OutOfWindow));
    }

    #[test]
    fn erased_flash_has_no_slot_header() {
        assert_eq!(SlotHeader::from_bytes(&[0xFF; 8]), None);

        let header = SlotHeader { length: 4096 };
        assert_eq!(SlotHeader::from_bytes(&header.to_bytes()), Some(header));
    }
}
