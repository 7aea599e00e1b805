//! RAM-backed flash medium
//!
//! Behaves like erased NOR flash: everything starts as 0xFF, programming
//! can only clear bits and only a block erase sets them again. Used to run
//! the filesystem on a host without real hardware.

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

use crate::flash::{is_bit_subset, FlashError, FlashMedium, Geometry, CHUNK_SIZE};

/// In-memory flash with `BLOCKS` erase blocks of `CHUNKS` chunks each
#[derive(Clone)]
pub struct RamFlash<const BLOCKS: usize, const CHUNKS: usize> {
    blocks: [[[u8; CHUNK_SIZE]; CHUNKS]; BLOCKS],
    erase_counts: [u32; BLOCKS],
}

impl<const BLOCKS: usize, const CHUNKS: usize> Default for RamFlash<BLOCKS, CHUNKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BLOCKS: usize, const CHUNKS: usize> RamFlash<BLOCKS, CHUNKS> {
    const BLOCK_SIZE: usize = CHUNKS * CHUNK_SIZE;

    /// Create a fully erased flash
    pub const fn new() -> Self {
        Self {
            blocks: [[[0xFF; CHUNK_SIZE]; CHUNKS]; BLOCKS],
            erase_counts: [0; BLOCKS],
        }
    }

    /// Number of times each block has been erased
    pub fn erase_counts(&self) -> &[u32; BLOCKS] {
        &self.erase_counts
    }

    /// Raw contents of one chunk
    pub fn chunk(&self, block: usize, slot: usize) -> &[u8; CHUNK_SIZE] {
        &self.blocks[block][slot]
    }

    fn capacity_bytes() -> usize {
        BLOCKS * Self::BLOCK_SIZE
    }

    fn locate(offset: usize) -> (usize, usize, usize) {
        let block = offset / Self::BLOCK_SIZE;
        let rest = offset % Self::BLOCK_SIZE;
        (block, rest / CHUNK_SIZE, rest % CHUNK_SIZE)
    }

    fn byte(&self, offset: usize) -> u8 {
        let (block, slot, index) = Self::locate(offset);
        self.blocks[block][slot][index]
    }

    fn in_bounds(offset: u32, len: usize) -> bool {
        (offset as usize)
            .checked_add(len)
            .is_some_and(|end| end <= Self::capacity_bytes())
    }

    fn copy_out(&self, offset: usize, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.byte(offset + i);
        }
    }

    /// Program bytes after checking every one of them only clears bits
    fn program_bytes(&mut self, offset: usize, data: &[u8]) -> bool {
        let clears_only = data
            .iter()
            .enumerate()
            .all(|(i, &new)| is_bit_subset(&[self.byte(offset + i)], &[new]));
        if !clears_only {
            return false;
        }
        for (i, &new) in data.iter().enumerate() {
            let (block, slot, index) = Self::locate(offset + i);
            self.blocks[block][slot][index] &= new;
        }
        true
    }

    fn erase_index(&mut self, block: usize) {
        self.blocks[block] = [[0xFF; CHUNK_SIZE]; CHUNKS];
        self.erase_counts[block] = self.erase_counts[block].saturating_add(1);
    }
}

impl<const BLOCKS: usize, const CHUNKS: usize> FlashMedium for RamFlash<BLOCKS, CHUNKS> {
    fn geometry(&self) -> Geometry {
        Geometry::new(BLOCKS as u32, CHUNKS as u32)
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if !Self::in_bounds(offset, buf.len()) {
            return Err(FlashError::OutOfBounds);
        }
        self.copy_out(offset as usize, buf);
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if !Self::in_bounds(offset, data.len()) {
            return Err(FlashError::OutOfBounds);
        }
        if self.program_bytes(offset as usize, data) {
            Ok(())
        } else {
            Err(FlashError::BitSet)
        }
    }

    fn erase_block(&mut self, block: u32) -> Result<(), FlashError> {
        if block as usize >= BLOCKS {
            return Err(FlashError::OutOfBounds);
        }
        self.erase_index(block as usize);
        Ok(())
    }
}

impl<const BLOCKS: usize, const CHUNKS: usize> ErrorType for RamFlash<BLOCKS, CHUNKS> {
    type Error = NorFlashErrorKind;
}

impl<const BLOCKS: usize, const CHUNKS: usize> ReadNorFlash for RamFlash<BLOCKS, CHUNKS> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        self.copy_out(offset as usize, bytes);
        Ok(())
    }

    fn capacity(&self) -> usize {
        Self::capacity_bytes()
    }
}

impl<const BLOCKS: usize, const CHUNKS: usize> NorFlash for RamFlash<BLOCKS, CHUNKS> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = CHUNKS * CHUNK_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        let first = from as usize / Self::BLOCK_SIZE;
        let last = to as usize / Self::BLOCK_SIZE;
        for block in first..last {
            self.erase_index(block);
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        if self.program_bytes(offset as usize, bytes) {
            Ok(())
        } else {
            Err(NorFlashErrorKind::Other)
        }
    }
}
