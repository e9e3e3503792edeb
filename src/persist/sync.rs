//! Program store for blocking flash drivers.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::image::ProgramHeader;
use crate::io::{Eeprom, ExecutionRegion};
use crate::loader::{Arming, Loader};
use crate::persist::{FlashLayout, SlotHeader, check_fits, check_image_length, image_address};
use crate::{Error, Result};

/// Saves and restores program images in flash slots.
///
/// The program must not be running while a program is saved or loaded.
pub struct ProgramStore<E: Eeprom> {
    eeprom: E,
    layout: FlashLayout,
}

impl<E: Eeprom> ProgramStore<E> {
    pub fn new(eeprom: E, layout: FlashLayout) -> Self {
        Self { eeprom, layout }
    }

    /// Save the program resident in `loader`'s region to `slot`.
    ///
    /// The slot index and address are checked before the driver is touched.
    /// The slot is erased and rewritten wholesale, with the slot header
    /// written last.  A save that fails part way leaves the slot empty.
    pub fn save<R: ExecutionRegion, A: Arming>(
        &mut self,
        slot: u8,
        loader: &Loader<R, A>,
    ) -> Result<()> {
        let addr = self.layout.slot_address(slot).inspect_err(|e| {
            warn!("Not saving to slot {slot}: {e:?}");
        })?;

        let image = loader.resident_image();
        if image.is_empty() {
            warn!("Not saving to slot {slot}: no program loaded");
            return Err(Error::NoEntryPoint);
        }
        check_fits(&self.layout, image.len())?;

        let header = SlotHeader {
            length: image.len() as u32,
        };

        self.eeprom.unlock().map_err(storage_error)?;
        let result = self.write_slot(addr, &header, image);
        let locked = self.eeprom.lock().map_err(storage_error);
        result.and(locked)?;

        info!("Saved {} byte program to slot {slot} at {addr:#07X}", image.len());
        Ok(())
    }

    /// Load the program saved in `slot` into `loader`'s region.
    ///
    /// The image is checked by [`Loader::load_with()`] exactly as if it had
    /// been loaded from RAM, and copied straight from flash into the region.
    pub fn load<R: ExecutionRegion, A: Arming>(
        &mut self,
        slot: u8,
        loader: &mut Loader<R, A>,
    ) -> Result<()> {
        let addr = self.layout.slot_address(slot).inspect_err(|e| {
            warn!("Not loading from slot {slot}: {e:?}");
        })?;

        let mut buf = [0u8; SlotHeader::SIZE];
        self.eeprom.read(addr, &mut buf).map_err(storage_error)?;
        let Some(slot_header) = SlotHeader::from_bytes(&buf) else {
            warn!("Slot {slot} is empty");
            return Err(Error::EmptySlot);
        };
        let length = check_image_length(&slot_header)?;

        let image_addr = image_address(addr);
        let mut buf = [0u8; ProgramHeader::size()];
        self.eeprom.read(image_addr, &mut buf).map_err(storage_error)?;
        let header = ProgramHeader::parse(&buf)?;

        let eeprom = &mut self.eeprom;
        loader.load_with(&header, length, |region| {
            eeprom.read(image_addr, region).map_err(storage_error)
        })?;

        info!("Loaded {length} byte program from slot {slot}");
        Ok(())
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    /// Release the flash driver.
    pub fn into_inner(self) -> E {
        self.eeprom
    }

    fn write_slot(&mut self, addr: u32, header: &SlotHeader, image: &[u8]) -> Result<()> {
        self.eeprom.erase(addr).map_err(storage_error)?;
        self.eeprom
            .write_block(image_address(addr), image)
            .map_err(storage_error)?;
        // Header last, so a slot only looks valid once the image is complete
        self.eeprom
            .write_block(addr, &header.to_bytes())
            .map_err(storage_error)
    }
}

fn storage_error<T: core::fmt::Debug>(e: T) -> Error {
    error!("Flash driver error: {e:?}");
    Error::Storage
}
