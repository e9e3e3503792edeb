//! Program store for async flash drivers.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use alloc::vec;

use crate::image::ProgramHeader;
use crate::io::{AsyncEeprom, ExecutionRegion};
use crate::loader::{Arming, Loader};
use crate::persist::{FlashLayout, SlotHeader, check_fits, check_image_length, image_address};
use crate::{Error, Result};

/// Saves and restores program images in flash slots, using an async driver.
///
/// Behaves exactly as [`crate::persist::ProgramStore`].  As the region
/// cannot be borrowed across an await point inside the loader, the image is
/// staged in a heap buffer before being handed to the loader.
pub struct AsyncProgramStore<E: AsyncEeprom> {
    eeprom: E,
    layout: FlashLayout,
}

impl<E: AsyncEeprom> AsyncProgramStore<E> {
    pub fn new(eeprom: E, layout: FlashLayout) -> Self {
        Self { eeprom, layout }
    }

    /// Save the program resident in `loader`'s region to `slot`.
    pub async fn save<R: ExecutionRegion, A: Arming>(
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

        self.eeprom.unlock().await.map_err(storage_error)?;
        let result = self.write_slot(addr, &header, image).await;
        let locked = self.eeprom.lock().await.map_err(storage_error);
        result.and(locked)?;

        info!("Saved {} byte program to slot {slot} at {addr:#07X}", image.len());
        Ok(())
    }

    /// Load the program saved in `slot` into `loader`'s region.
    pub async fn load<R: ExecutionRegion, A: Arming>(
        &mut self,
        slot: u8,
        loader: &mut Loader<R, A>,
    ) -> Result<()> {
        let addr = self.layout.slot_address(slot).inspect_err(|e| {
            warn!("Not loading from slot {slot}: {e:?}");
        })?;

        let mut buf = [0u8; SlotHeader::SIZE];
        self.eeprom.read(addr, &mut buf).await.map_err(storage_error)?;
        let Some(slot_header) = SlotHeader::from_bytes(&buf) else {
            warn!("Slot {slot} is empty");
            return Err(Error::EmptySlot);
        };
        let length = check_image_length(&slot_header)?;
        check_fits(&self.layout, length)?;

        let mut image = vec![0u8; length];
        self.eeprom
            .read(image_address(addr), &mut image)
            .await
            .map_err(storage_error)?;
        let header = ProgramHeader::parse(&image)?;

        loader.load_with(&header, length, |region| {
            region.copy_from_slice(&image);
            Ok(())
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

    async fn write_slot(&mut self, addr: u32, header: &SlotHeader, image: &[u8]) -> Result<()> {
        self.eeprom.erase(addr).await.map_err(storage_error)?;
        self.eeprom
            .write_block(image_address(addr), image)
            .await
            .map_err(storage_error)?;
        // Header last, so a slot only looks valid once the image is complete
        self.eeprom
            .write_block(addr, &header.to_bytes())
            .await
            .map_err(storage_error)
    }
}

fn storage_error<T: core::fmt::Debug>(e: T) -> Error {
    error!("Flash driver error: {e:?}");
    Error::Storage
}
