//! Garbage collection ("vacuum")
//!
//! Reclaims one block per cycle: the live chunks of a victim block are
//! copied, in order, into the reserved block, the victim is erased and
//! becomes the new reserved block.
//!
//! The victim is the block with the most empty plus deleted chunks. To
//! spread erase cycles, a block scoring within 90% of the best so far
//! also wins with a 1 in 4 chance.

use rand_core::RngCore;
use stfs_hal::FlashMedium;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{ChunkStore, Location};
use crate::chunk::Chunk;
use crate::error::{Error, Result};

/// Chunk counts of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockStats {
    pub empty: u32,
    pub deleted: u32,
    pub live: u32,
}

impl BlockStats {
    /// Chunks a vacuum of this block would free
    pub fn reclaimable(&self) -> u32 {
        self.empty + self.deleted
    }
}

impl<M: FlashMedium> ChunkStore<M> {
    /// Count empty, deleted and live chunks in a block
    pub fn block_stats(&mut self, block: u32) -> Result<BlockStats> {
        let mut stats = BlockStats::default();
        for slot in 0..self.geometry.chunks_per_block {
            match self.read(Location { block, slot })? {
                Chunk::Empty => stats.empty += 1,
                Chunk::Deleted => stats.deleted += 1,
                Chunk::Inode(_) | Chunk::Data(_) => stats.live += 1,
            }
        }
        Ok(stats)
    }

    fn pick_victim<R: RngCore>(&mut self, rng: &mut R) -> Result<Option<u32>> {
        let mut candidate = None;
        let mut best = 0;
        for block in 0..self.geometry.blocks {
            if block == self.reserved {
                continue;
            }
            let score = self.block_stats(block)?.reclaimable();
            if score > best {
                candidate = Some(block);
                best = score;
            } else if rng.next_u32() % 4 == 0 && score > best * 9 / 10 {
                trace!("lucky vacuum candidate {} ({})", block, score);
                candidate = Some(block);
                best = score;
            }
        }
        Ok(candidate)
    }

    /// Run one vacuum cycle, returning the block that was reclaimed
    pub fn vacuum<R: RngCore>(&mut self, rng: &mut R) -> Result<u32> {
        let victim = match self.pick_victim(rng)? {
            Some(block) if block < self.geometry.blocks => block,
            Some(block) => {
                error!("vacuum picked invalid block {}", block);
                return Err(Error::Vacuum);
            }
            None => {
                warn!("vacuum found no candidate, reserved {}", self.reserved);
                return Err(Error::Vacuum);
            }
        };
        info!("vacuuming block {} into {}", victim, self.reserved);

        let mut dest = 0;
        for slot in 0..self.geometry.chunks_per_block {
            let raw = self.read_raw(Location { block: victim, slot })?;
            if Chunk::decode(&raw).is_live() {
                let offset = self.geometry.chunk_offset(self.reserved, dest);
                self.write(offset, &raw)?;
                dest += 1;
            }
        }
        self.erase(victim)?;
        self.reserved = victim;
        Ok(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{data, inode, SmallStore};
    use super::*;
    use rand::rngs::mock::StepRng;
    use stfs_hal::RamFlash;

    /// Never takes the random branch
    fn strict() -> StepRng {
        StepRng::new(1, 0)
    }

    /// Always takes the random branch
    fn lucky() -> StepRng {
        StepRng::new(0, 0)
    }

    fn live_chunks(store: &mut SmallStore) -> std::vec::Vec<Chunk> {
        let mut chunks = std::vec::Vec::new();
        let geometry = store.geometry();
        for block in 0..geometry.blocks {
            if block == store.reserved_block() {
                continue;
            }
            for slot in 0..geometry.chunks_per_block {
                let chunk = store.read(Location { block, slot }).unwrap();
                if chunk.is_live() {
                    chunks.push(chunk);
                }
            }
        }
        chunks.sort_by_key(|c| c.encode());
        chunks
    }

    /// Block 0: 1 deleted; block 1: 3 deleted; block 2 reserved
    fn fragmented() -> SmallStore {
        let mut store = SmallStore::new(RamFlash::new());
        store.set_reserved_block(2);
        let mut locations = std::vec::Vec::new();
        locations.push(store.store(&inode(2, 1, b"f"), &mut strict()).unwrap());
        for seq in 0..7 {
            locations.push(store.store(&data(2, seq), &mut strict()).unwrap());
        }
        for i in [1, 4, 5, 6] {
            store.delete(locations[i]).unwrap();
        }
        store
    }

    #[test]
    fn test_block_stats() {
        let mut store = fragmented();
        assert_eq!(
            store.block_stats(0).unwrap(),
            BlockStats {
                empty: 0,
                deleted: 1,
                live: 3
            }
        );
        assert_eq!(store.block_stats(1).unwrap().reclaimable(), 3);
        assert_eq!(store.block_stats(2).unwrap().empty, 4);
    }

    #[test]
    fn test_picks_most_reclaimable_block() {
        let mut store = fragmented();
        assert_eq!(store.vacuum(&mut strict()).unwrap(), 1);
        assert_eq!(store.reserved_block(), 1);
        assert_eq!(store.block_stats(1).unwrap().empty, 4);
        // Only the single live chunk of block 1 moved
        assert_eq!(store.block_stats(2).unwrap().live, 1);
        assert_eq!(store.read(Location { block: 2, slot: 0 }).unwrap(), data(2, 6));
    }

    #[test]
    fn test_lucky_block_wins_when_close() {
        let mut store = SmallStore::new(RamFlash::new());
        store.set_reserved_block(2);
        let mut locations = std::vec::Vec::new();
        for seq in 0..8 {
            locations.push(store.store(&data(3, seq), &mut strict()).unwrap());
        }
        // Block 0 and 1 both have 2 deleted chunks: a tie
        for i in [0, 1, 4, 5] {
            store.delete(locations[i]).unwrap();
        }
        let mut deterministic = store_clone(&store);
        assert_eq!(deterministic.vacuum(&mut strict()).unwrap(), 0);
        assert_eq!(store.vacuum(&mut lucky()).unwrap(), 1);
    }

    #[test]
    fn test_lucky_rule_needs_ninety_percent() {
        let mut store = SmallStore::new(RamFlash::new());
        store.set_reserved_block(2);
        let mut locations = std::vec::Vec::new();
        for seq in 0..8 {
            locations.push(store.store(&data(3, seq), &mut strict()).unwrap());
        }
        // Block 0 scores 3, block 1 scores 1: too far behind to get lucky
        for i in [0, 1, 2, 4] {
            store.delete(locations[i]).unwrap();
        }
        assert_eq!(store.vacuum(&mut lucky()).unwrap(), 0);
    }

    #[test]
    fn test_preserves_live_chunks() {
        let mut store = fragmented();
        let before = live_chunks(&mut store);
        store.vacuum(&mut strict()).unwrap();
        assert_eq!(live_chunks(&mut store), before);

        // Exactly one block is entirely empty afterwards
        let empty_blocks = (0..3)
            .filter(|&b| store.block_stats(b).unwrap().empty == 4)
            .count();
        assert_eq!(empty_blocks, 1);
    }

    #[test]
    fn test_relocated_chunks_keep_order() {
        let mut store = SmallStore::new(RamFlash::new());
        store.set_reserved_block(2);
        let mut locations = std::vec::Vec::new();
        for seq in 0..8 {
            locations.push(store.store(&data(3, seq), &mut strict()).unwrap());
        }
        // Block 0 keeps seq 1 and 3, block 1 loses only seq 4
        for i in [0, 2, 4] {
            store.delete(locations[i]).unwrap();
        }
        assert_eq!(store.vacuum(&mut strict()).unwrap(), 0);
        assert_eq!(store.read(Location { block: 2, slot: 0 }).unwrap(), data(3, 1));
        assert_eq!(store.read(Location { block: 2, slot: 1 }).unwrap(), data(3, 3));
        assert_eq!(store.read(Location { block: 2, slot: 2 }).unwrap(), Chunk::Empty);
    }

    #[test]
    fn test_no_candidate() {
        let mut store = SmallStore::new(RamFlash::new());
        store.set_reserved_block(2);
        for seq in 0..8 {
            store.store(&data(3, seq), &mut strict()).unwrap();
        }
        assert_eq!(store.vacuum(&mut lucky()), Err(Error::Vacuum));
        assert_eq!(store.medium().erase_counts(), &[0, 0, 0]);
    }

    fn store_clone(store: &SmallStore) -> SmallStore {
        let mut clone = SmallStore::new(store.medium().clone());
        clone.set_reserved_block(store.reserved_block());
        clone
    }
}
