//! Flash medium abstractions
//!
//! Provides the trait the filesystem uses to talk to raw NOR flash, plus
//! the geometry describing how the medium is carved into blocks and chunks.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size of one chunk (record) in bytes
pub const CHUNK_SIZE: usize = 128;

/// Block and chunk layout of a flash medium
///
/// All blocks have the same size. Offsets handed to [`FlashMedium`] are
/// byte offsets from the start of the first block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Geometry {
    /// Number of erase blocks
    pub blocks: u32,
    /// Chunks held by each block
    pub chunks_per_block: u32,
}

impl Geometry {
    /// Create a new geometry
    pub const fn new(blocks: u32, chunks_per_block: u32) -> Self {
        Self {
            blocks,
            chunks_per_block,
        }
    }

    /// Size of one erase block in bytes
    pub const fn block_size(&self) -> u32 {
        self.chunks_per_block * CHUNK_SIZE as u32
    }

    /// Total number of chunks across all blocks
    pub const fn total_chunks(&self) -> u32 {
        self.blocks * self.chunks_per_block
    }

    /// Total size of the medium in bytes
    pub const fn capacity(&self) -> u32 {
        self.blocks * self.block_size()
    }

    /// Byte offset of a chunk
    pub const fn chunk_offset(&self, block: u32, slot: u32) -> u32 {
        block * self.block_size() + slot * CHUNK_SIZE as u32
    }

    /// Check whether `len` bytes starting at `offset` lie inside the medium
    pub fn contains(&self, offset: u32, len: usize) -> bool {
        (offset as u64) + (len as u64) <= self.capacity() as u64
    }
}

/// Errors from flash medium operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Access outside the medium
    OutOfBounds,
    /// Access not aligned to what the medium requires
    Misaligned,
    /// Program would need to flip a bit from 0 to 1
    BitSet,
    /// The underlying driver reported a failure
    Flash,
    /// The driver region cannot hold the requested geometry
    Geometry,
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            FlashError::OutOfBounds => "access out of bounds",
            FlashError::Misaligned => "misaligned access",
            FlashError::BitSet => "program would set a cleared bit",
            FlashError::Flash => "flash driver failure",
            FlashError::Geometry => "geometry does not fit the flash region",
        };
        f.write_str(msg)
    }
}

/// Raw flash medium
///
/// Implementations are blocking: each call returns once the hardware has
/// finished. Callers are responsible for masking interrupts around
/// `program` and `erase_block` when interrupt handlers may touch the
/// flash controller.
pub trait FlashMedium {
    /// Block and chunk layout of this medium
    fn geometry(&self) -> Geometry;

    /// Read `buf.len()` bytes starting at `offset`
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `offset`
    ///
    /// Programming can only clear bits. Implementations that can detect
    /// it must reject data that would require a 0 → 1 transition with
    /// [`FlashError::BitSet`].
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase a whole block, resetting every bit in it to 1
    fn erase_block(&mut self, block: u32) -> Result<(), FlashError>;
}

/// Check whether `new` can be programmed over `old` by clearing bits only
pub fn is_bit_subset(old: &[u8], new: &[u8]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(&o, &n)| o & n == n)
}
