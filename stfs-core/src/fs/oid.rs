//! OID allocation
//!
//! Candidates come from a window starting just past a rolling offset. The
//! window is larger than the number of chunks outside the reserved block
//! plus the descriptor table, so it always contains a free OID. Moving the
//! offset on after every allocation keeps new objects away from OIDs whose
//! deleted chunks have not been erased yet.

use rand_core::RngCore;
use stfs_hal::FlashMedium;

use super::Stfs;
use crate::config::{OID_START_OFFSET, ROOT_OID};
use crate::error::{Error, Result};
use crate::store::{Cursor, Filter};

impl<M: FlashMedium, R: RngCore, const FILES: usize> Stfs<M, R, FILES> {
    /// Check that no open descriptor and no stored chunk uses `oid`
    pub(crate) fn is_oid_available(&mut self, oid: u32) -> Result<bool> {
        if oid == 0 || oid == ROOT_OID {
            return Ok(false);
        }
        if self.files.iter().flatten().any(|file| file.inode.oid == oid) {
            return Ok(false);
        }
        if self.store.find(Filter::InodeByOid(oid), Cursor::START)?.is_some() {
            return Ok(false);
        }
        let data = Filter::Data { oid, seq: None };
        Ok(self.store.find(data, Cursor::START)?.is_none())
    }

    fn oid_window(&self) -> u32 {
        let geometry = self.store.geometry();
        geometry
            .chunks_per_block
            .saturating_mul(geometry.blocks.saturating_sub(1))
            .saturating_add(FILES as u32)
            .saturating_add(3)
    }

    /// Allocate an unused OID
    pub(crate) fn new_oid(&mut self) -> Result<u32> {
        let window = self.oid_window();
        let start = match self.oid_offset.checked_add(1) {
            Some(start) if start.checked_add(window).is_some() => start,
            _ => {
                debug!("oid offset wraps around");
                self.oid_offset = OID_START_OFFSET;
                OID_START_OFFSET + 1
            }
        };

        for oid in start..start + window {
            if self.is_oid_available(oid)? {
                self.oid_offset += window;
                trace!("new oid {}", oid);
                return Ok(oid);
            }
        }
        error!("no free oid in {}..{}", start, start + window);
        Err(Error::Full)
    }
}
