//! Directory operations

use rand_core::RngCore;
use stfs_hal::FlashMedium;

use super::path::Node;
use super::Stfs;
use crate::chunk::{Chunk, Inode, Kind};
use crate::error::{Error, Result};
use crate::store::{Cursor, Filter};

/// Position of a directory listing
///
/// Copying a cursor lets a listing be restarted from that point. Entries
/// created or removed while a listing is in progress may or may not show
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirCursor {
    oid: u32,
    cursor: Cursor,
}

impl DirCursor {
    /// OID of the directory being listed
    pub fn oid(&self) -> u32 {
        self.oid
    }
}

/// Iterator over the entries of a directory, see [`Stfs::read_dir`]
pub struct ReadDir<'a, M, R, const FILES: usize> {
    fs: &'a mut Stfs<M, R, FILES>,
    dir: DirCursor,
    done: bool,
}

impl<M: FlashMedium, R: RngCore, const FILES: usize> Iterator for ReadDir<'_, M, R, FILES> {
    type Item = Result<Inode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fs.readdir(&mut self.dir) {
            Ok(Some(inode)) => Some(Ok(inode)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Drop a single trailing `/`, turning `"/"` into the root path
fn trim_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

impl<M: FlashMedium, R: RngCore, const FILES: usize> Stfs<M, R, FILES> {
    /// Start listing a directory
    pub fn opendir(&mut self, path: &str) -> Result<DirCursor> {
        let result = self.opendir_inner(path);
        self.record(result)
    }

    fn opendir_inner(&mut self, path: &str) -> Result<DirCursor> {
        let node = self.resolve(trim_trailing_slash(path))?;
        if !node.is_dir() {
            return Err(Error::NotDirectory);
        }
        Ok(DirCursor {
            oid: node.oid(),
            cursor: Cursor::START,
        })
    }

    /// Next entry of a listing, `None` once it is exhausted
    pub fn readdir(&mut self, dir: &mut DirCursor) -> Result<Option<Inode>> {
        let result = self.readdir_inner(dir);
        self.record(result)
    }

    fn readdir_inner(&mut self, dir: &mut DirCursor) -> Result<Option<Inode>> {
        match self.store.find(Filter::InodeByParent(dir.oid), dir.cursor)? {
            Some((location, Chunk::Inode(inode))) => {
                dir.cursor = Cursor::after(location, self.store.geometry());
                Ok(Some(inode))
            }
            _ => Ok(None),
        }
    }

    /// Iterate over the entries of a directory
    pub fn read_dir(&mut self, path: &str) -> Result<ReadDir<'_, M, R, FILES>> {
        let dir = self.opendir(path)?;
        Ok(ReadDir {
            fs: self,
            dir,
            done: false,
        })
    }

    /// Create a directory
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let result = self.mkdir_inner(path);
        self.record(result)
    }

    fn mkdir_inner(&mut self, path: &str) -> Result<()> {
        debug!("mkdir {}", path);
        let (parent, name) = self.check_new_entry(path)?;
        let oid = self.new_oid()?;
        let inode = Inode::new(Kind::Directory, parent, oid, name.as_bytes())?;
        self.store.store(&Chunk::Inode(inode), &mut self.rng)?;
        Ok(())
    }

    /// Remove an empty directory
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let result = self.rmdir_inner(path);
        self.record(result)
    }

    fn rmdir_inner(&mut self, path: &str) -> Result<()> {
        debug!("rmdir {}", path);
        let (location, inode) = match self.resolve(trim_trailing_slash(path))? {
            Node::Root => return Err(Error::DeleteRoot),
            Node::Entry(location, inode) => (location, inode),
        };
        if !inode.is_dir() {
            return Err(Error::NotDirectory);
        }
        if self
            .store
            .find(Filter::InodeByParent(inode.oid), Cursor::START)?
            .is_some()
        {
            return Err(Error::NotEmpty);
        }
        self.store.delete(location)
    }
}
