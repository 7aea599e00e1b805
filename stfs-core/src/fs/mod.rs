//! Filesystem context
//!
//! [`Stfs`] owns the medium, the random source, the descriptor table and
//! the allocator state. Every entry point takes `&mut self`, so calls can
//! never interleave.
//!
//! Public operations return a [`Result`] and additionally remember the
//! most recent failure, see [`Stfs::last_error`].

mod dir;
mod file;
mod oid;
mod path;

use rand_core::RngCore;
use stfs_hal::FlashMedium;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{MAX_OPEN_FILES, MIN_BLOCKS, OID_START_OFFSET};
use crate::error::{Error, Result};
use crate::store::ChunkStore;

pub use dir::{DirCursor, ReadDir};
pub use file::{Fd, OpenMode, Whence};

use file::OpenFile;

/// Chunk usage across all blocks except the reserved one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Usage {
    pub empty: u32,
    pub deleted: u32,
    pub live: u32,
    pub reserved_block: u32,
}

/// A mounted filesystem
///
/// `FILES` is the size of the descriptor table.
pub struct Stfs<M, R, const FILES: usize = MAX_OPEN_FILES> {
    store: ChunkStore<M>,
    rng: R,
    files: [Option<OpenFile>; FILES],
    oid_offset: u32,
    last_error: Option<Error>,
}

impl<M: FlashMedium, R: RngCore> Stfs<M, R> {
    /// Create a filesystem with the default descriptor table size
    ///
    /// Call [`Stfs::init`] (existing contents) or [`Stfs::format`] before
    /// any other operation.
    pub fn new(medium: M, rng: R) -> Self {
        Self::with_descriptors(medium, rng)
    }
}

impl<M: FlashMedium, R: RngCore, const FILES: usize> Stfs<M, R, FILES> {
    /// Create a filesystem with `FILES` descriptor slots
    pub fn with_descriptors(medium: M, rng: R) -> Self {
        Self {
            store: ChunkStore::new(medium),
            rng,
            files: core::array::from_fn(|_| None),
            oid_offset: OID_START_OFFSET,
            last_error: None,
        }
    }

    /// Mount the contents of the medium
    ///
    /// Picks the reserved block at random among the wholly empty blocks
    /// and drops every open descriptor without committing it.
    pub fn init(&mut self) -> Result<()> {
        let result = self.init_inner();
        self.record(result)
    }

    fn init_inner(&mut self) -> Result<()> {
        let geometry = self.store.geometry();
        if geometry.blocks < MIN_BLOCKS || geometry.chunks_per_block == 0 {
            error!(
                "unusable geometry: {} blocks of {} chunks",
                geometry.blocks, geometry.chunks_per_block
            );
            return Err(Error::BadGeometry);
        }
        for file in self.files.iter_mut() {
            *file = None;
        }
        self.oid_offset = OID_START_OFFSET;

        let mut free = 0;
        for block in 0..geometry.blocks {
            if self.is_block_empty(block)? {
                free += 1;
            }
        }
        if free == 0 {
            error!("no empty block to reserve");
            return Err(Error::NoEmptyBlock);
        }

        let mut pick = self.rng.next_u32() % free;
        for block in 0..geometry.blocks {
            if self.is_block_empty(block)? {
                if pick == 0 {
                    debug!("reserved block {}", block);
                    self.store.set_reserved_block(block);
                    return Ok(());
                }
                pick -= 1;
            }
        }
        Err(Error::NoEmptyBlock)
    }

    fn is_block_empty(&mut self, block: u32) -> Result<bool> {
        let stats = self.store.block_stats(block)?;
        Ok(stats.empty == self.store.geometry().chunks_per_block)
    }

    /// Erase the whole medium and mount the empty filesystem
    pub fn format(&mut self) -> Result<()> {
        let result = self.format_inner();
        self.record(result)
    }

    fn format_inner(&mut self) -> Result<()> {
        let geometry = self.store.geometry();
        info!("formatting {} blocks", geometry.blocks);
        for block in 0..geometry.blocks {
            self.store.erase(block)?;
        }
        self.init_inner()
    }

    /// Run one vacuum cycle now, returning the reclaimed block
    ///
    /// Vacuum normally runs by itself when no empty chunk is left.
    pub fn vacuum(&mut self) -> Result<u32> {
        let result = self.store.vacuum(&mut self.rng);
        self.record(result)
    }

    /// Count empty, deleted and live chunks
    pub fn usage(&mut self) -> Result<Usage> {
        let result = self.usage_inner();
        self.record(result)
    }

    fn usage_inner(&mut self) -> Result<Usage> {
        let reserved_block = self.store.reserved_block();
        let mut usage = Usage {
            reserved_block,
            ..Usage::default()
        };
        for block in 0..self.store.geometry().blocks {
            if block == reserved_block {
                continue;
            }
            let stats = self.store.block_stats(block)?;
            usage.empty += stats.empty;
            usage.deleted += stats.deleted;
            usage.live += stats.live;
        }
        Ok(usage)
    }

    /// Most recent error reported by any operation
    ///
    /// Successful operations leave it untouched.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn medium(&self) -> &M {
        self.store.medium()
    }

    /// Release the medium and the random source
    ///
    /// Open descriptors are dropped without being committed.
    pub fn into_parts(self) -> (M, R) {
        (self.store.into_inner(), self.rng)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(*e);
        }
        result
    }
}
