//! Adapter from `embedded-storage` NOR flash drivers to [`FlashMedium`]
//!
//! Chip HALs (embassy, stm32f4xx-hal, rp2040 flash, ...) expose their
//! internal flash through the `NorFlash` trait. `NorMedium` carves a
//! filesystem region out of such a driver, starting at a base offset.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::flash::{FlashError, FlashMedium, Geometry, CHUNK_SIZE};

/// Filesystem region inside a NOR flash driver
pub struct NorMedium<F> {
    flash: F,
    base: u32,
    geometry: Geometry,
}

impl<F: NorFlash> NorMedium<F> {
    /// Place a region with the given geometry at `base` inside `flash`
    ///
    /// Fails with [`FlashError::Geometry`] if the region does not fit the
    /// driver, if blocks do not line up with the driver's erase size, or
    /// if a chunk is not a whole number of write/read units.
    pub fn new(flash: F, base: u32, geometry: Geometry) -> Result<Self, FlashError> {
        let end = base as u64 + geometry.capacity() as u64;
        if geometry.blocks == 0 || end > flash.capacity() as u64 {
            return Err(FlashError::Geometry);
        }
        if base as usize % F::ERASE_SIZE != 0 || geometry.block_size() as usize % F::ERASE_SIZE != 0 {
            return Err(FlashError::Geometry);
        }
        if CHUNK_SIZE % F::WRITE_SIZE != 0 || CHUNK_SIZE % F::READ_SIZE != 0 {
            return Err(FlashError::Geometry);
        }
        Ok(Self {
            flash,
            base,
            geometry,
        })
    }

    /// Get the raw flash driver for low-level access
    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Release the flash driver
    pub fn into_inner(self) -> F {
        self.flash
    }
}

fn map_error<E: NorFlashError>(e: E) -> FlashError {
    match e.kind() {
        NorFlashErrorKind::NotAligned => FlashError::Misaligned,
        NorFlashErrorKind::OutOfBounds => FlashError::OutOfBounds,
        _ => FlashError::Flash,
    }
}

impl<F: NorFlash> FlashMedium for NorMedium<F> {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if !self.geometry.contains(offset, buf.len()) {
            return Err(FlashError::OutOfBounds);
        }
        self.flash.read(self.base + offset, buf).map_err(map_error)
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if !self.geometry.contains(offset, data.len()) {
            return Err(FlashError::OutOfBounds);
        }
        self.flash.write(self.base + offset, data).map_err(map_error)
    }

    fn erase_block(&mut self, block: u32) -> Result<(), FlashError> {
        if block >= self.geometry.blocks {
            return Err(FlashError::OutOfBounds);
        }
        let from = self.base + block * self.geometry.block_size();
        let to = from + self.geometry.block_size();
        self.flash.erase(from, to).map_err(map_error)
    }
}
