//! Chunk store
//!
//! Lowest layer of the filesystem: linear scans over the chunks of every
//! block except the reserved one, plus the write primitives. Blocks fill
//! strictly front to back, so a scan abandons a block at its first empty
//! chunk.
//!
//! A [`Location`] is only valid until the next call to
//! [`ChunkStore::store`], which may vacuum and move chunks around.

pub mod vacuum;

use rand_core::RngCore;
use stfs_hal::{is_bit_subset, FlashMedium, Geometry};

use crate::chunk::{Chunk, RawChunk};
use crate::config::CHUNK_SIZE;
use crate::error::{Error, Result};

pub use vacuum::BlockStats;

/// Position of a chunk on the medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Location {
    pub block: u32,
    pub slot: u32,
}

/// Where a scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cursor {
    block: u32,
    slot: u32,
}

impl Cursor {
    /// Cursor at the first chunk of the first block
    pub const START: Cursor = Cursor { block: 0, slot: 0 };

    /// Cursor at `location` itself
    pub const fn at(location: Location) -> Self {
        Self {
            block: location.block,
            slot: location.slot,
        }
    }

    /// Cursor at the chunk following `location`
    pub fn after(location: Location, geometry: Geometry) -> Self {
        if location.slot + 1 >= geometry.chunks_per_block {
            Self {
                block: location.block + 1,
                slot: 0,
            }
        } else {
            Self {
                block: location.block,
                slot: location.slot + 1,
            }
        }
    }
}

/// What a scan is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Filter {
    /// A never-written chunk
    Empty,
    /// A retired chunk
    Deleted,
    /// The inode of a specific object
    InodeByOid(u32),
    /// Any inode inside a directory
    InodeByParent(u32),
    /// Data of an object; `seq: None` matches any sequence number
    Data { oid: u32, seq: Option<u16> },
}

impl Filter {
    fn matches(&self, chunk: &Chunk) -> bool {
        match (self, chunk) {
            (Filter::Empty, Chunk::Empty) => true,
            (Filter::Deleted, Chunk::Deleted) => true,
            (Filter::InodeByOid(oid), Chunk::Inode(inode)) => inode.oid == *oid,
            (Filter::InodeByParent(parent), Chunk::Inode(inode)) => inode.parent == *parent,
            (Filter::Data { oid, seq }, Chunk::Data(data)) => {
                data.oid == *oid && seq.map_or(true, |seq| data.seq == seq)
            }
            _ => false,
        }
    }
}

/// Chunk-level access to a flash medium
pub struct ChunkStore<M> {
    medium: M,
    geometry: Geometry,
    reserved: u32,
}

impl<M: FlashMedium> ChunkStore<M> {
    /// Wrap a medium; block 0 is reserved until told otherwise
    pub fn new(medium: M) -> Self {
        let geometry = medium.geometry();
        Self {
            medium,
            geometry,
            reserved: 0,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Block kept empty as the destination of the next vacuum
    pub fn reserved_block(&self) -> u32 {
        self.reserved
    }

    pub(crate) fn set_reserved_block(&mut self, block: u32) {
        self.reserved = block;
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn into_inner(self) -> M {
        self.medium
    }

    fn offset(&self, location: Location) -> u32 {
        self.geometry.chunk_offset(location.block, location.slot)
    }

    /// Read the raw bytes of a chunk
    pub fn read_raw(&mut self, location: Location) -> Result<RawChunk> {
        let mut raw = [0u8; CHUNK_SIZE];
        let offset = self.offset(location);
        self.medium.read(offset, &mut raw)?;
        Ok(raw)
    }

    /// Read and decode a chunk
    pub fn read(&mut self, location: Location) -> Result<Chunk> {
        Ok(Chunk::decode(&self.read_raw(location)?))
    }

    /// Scan forward from `cursor` for the first chunk matching `filter`
    pub fn find(&mut self, filter: Filter, cursor: Cursor) -> Result<Option<(Location, Chunk)>> {
        let mut slot = cursor.slot;
        for block in cursor.block..self.geometry.blocks {
            if block != self.reserved {
                while slot < self.geometry.chunks_per_block {
                    let location = Location { block, slot };
                    let chunk = self.read(location)?;
                    if filter.matches(&chunk) {
                        return Ok(Some((location, chunk)));
                    }
                    if chunk == Chunk::Empty {
                        // Rest of the block is empty too
                        break;
                    }
                    slot += 1;
                }
            }
            slot = 0;
        }
        Ok(None)
    }

    /// Program exactly one chunk at a chunk-aligned offset
    ///
    /// Interrupts are masked for the duration of the hardware write.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != CHUNK_SIZE {
            error!("bad chunk size: {}", bytes.len());
            return Err(Error::BadChunk);
        }
        if offset as usize % CHUNK_SIZE != 0 || !self.geometry.contains(offset, bytes.len()) {
            error!("bad chunk address: {}", offset);
            return Err(Error::BadChunk);
        }
        critical_section::with(|_| self.medium.program(offset, bytes))?;
        Ok(())
    }

    /// Encode and program a chunk at `location`
    pub fn write_chunk(&mut self, location: Location, chunk: &Chunk) -> Result<()> {
        let offset = self.offset(location);
        self.write(offset, &chunk.encode())
    }

    /// Retire the chunk at `location`
    pub fn delete(&mut self, location: Location) -> Result<()> {
        trace!("deleting chunk {} {}", location.block, location.slot);
        self.write_chunk(location, &Chunk::Deleted)
    }

    /// Rewrite the chunk at `location` in place if that only clears bits
    ///
    /// Returns `false`, leaving flash untouched, when the new contents
    /// would need a bit set.
    pub fn overwrite(&mut self, location: Location, chunk: &Chunk) -> Result<bool> {
        let old = self.read_raw(location)?;
        let new = chunk.encode();
        if !is_bit_subset(&old, &new) {
            return Ok(false);
        }
        let offset = self.offset(location);
        self.write(offset, &new)?;
        Ok(true)
    }

    /// Write a chunk into the first empty slot, vacuuming once if needed
    pub fn store<R: RngCore>(&mut self, chunk: &Chunk, rng: &mut R) -> Result<Location> {
        let location = match self.find(Filter::Empty, Cursor::START)? {
            Some((location, _)) => location,
            None => {
                debug!("no free chunk, vacuuming");
                match self.vacuum(rng) {
                    Ok(_) => {}
                    Err(Error::Vacuum) => {
                        warn!("device is full");
                        return Err(Error::Full);
                    }
                    Err(e) => return Err(e),
                }
                match self.find(Filter::Empty, Cursor::START)? {
                    Some((location, _)) => location,
                    None => {
                        warn!("no free chunk even after vacuuming");
                        return Err(Error::Full);
                    }
                }
            }
        };
        self.write_chunk(location, chunk)?;
        Ok(location)
    }

    /// Erase a block with interrupts masked
    pub fn erase(&mut self, block: u32) -> Result<()> {
        critical_section::with(|_| self.medium.erase_block(block))?;
        Ok(())
    }
}
