//! File descriptor layer
//!
//! A descriptor caches the inode of an open file. Data chunks are written
//! through immediately, but the inode (and with it the file size) only
//! reaches flash when the descriptor is closed.
//!
//! ```text
//!            open            write
//!  Closed ─────────▶ Clean ─────────▶ Dirty
//!    ▲                 │                │
//!    └─────────────────┴────────────────┘
//!                    close
//! ```

use rand_core::RngCore;
use stfs_hal::FlashMedium;

use super::path::Node;
use super::Stfs;
use crate::chunk::{Chunk, DataChunk, Inode, Kind};
use crate::config::{DATA_PER_CHUNK, MAX_FILE_SIZE, ROOT_OID};
use crate::error::{Error, Result};
use crate::store::{Cursor, Filter};

/// Index into the descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fd(pub usize);

/// How [`Stfs::open`] treats the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    /// Create a new, empty file; the path must not exist yet
    Create,
    /// Open a file that already exists
    Existing,
}

/// Reference point of [`Stfs::lseek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Whence {
    /// From the start of the file
    Set,
    /// From the current position
    Cur,
    /// From the end of the file
    End,
}

/// State of one open descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenFile {
    pub(crate) inode: Inode,
    pub(crate) pos: u32,
    pub(crate) dirty: bool,
}

/// Sequence number of the chunk holding byte `offset`
fn seq_of(offset: u32) -> u16 {
    (offset / DATA_PER_CHUNK as u32) as u16
}

fn chunk_start(seq: u16) -> u32 {
    seq as u32 * DATA_PER_CHUNK as u32
}

impl<M: FlashMedium, R: RngCore, const FILES: usize> Stfs<M, R, FILES> {
    fn file(&self, fd: Fd) -> Result<&OpenFile> {
        match self.files.get(fd.0) {
            None => Err(Error::InvalidFd),
            Some(slot) => slot.as_ref().ok_or(Error::NotOpen),
        }
    }

    fn file_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        match self.files.get_mut(fd.0) {
            None => Err(Error::InvalidFd),
            Some(slot) => slot.as_mut().ok_or(Error::NotOpen),
        }
    }

    /// Open a file, returning its descriptor
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<Fd> {
        let result = self.open_inner(path, mode);
        self.record(result)
    }

    fn open_inner(&mut self, path: &str, mode: OpenMode) -> Result<Fd> {
        debug!("open {} {:?}", path, mode);
        let slot = match self.files.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                warn!("no free descriptor");
                return Err(Error::NoDescriptors);
            }
        };

        let file = match mode {
            OpenMode::Create => {
                if self.resolve(path).is_ok() {
                    return Err(Error::Exists);
                }
                let (parent, name) = self.check_new_entry(path)?;
                let reopened = self
                    .files
                    .iter()
                    .flatten()
                    .any(|file| file.inode.parent == parent && file.inode.name() == name.as_bytes());
                if reopened {
                    return Err(Error::AlreadyOpen);
                }
                let oid = self.new_oid()?;
                let inode = Inode::new(Kind::File, parent, oid, name.as_bytes())?;
                self.store.store(&Chunk::Inode(inode.clone()), &mut self.rng)?;
                OpenFile {
                    inode,
                    pos: 0,
                    dirty: true,
                }
            }
            OpenMode::Existing => match self.resolve(path)? {
                Node::Entry(_, inode) if inode.is_file() => OpenFile {
                    inode,
                    pos: 0,
                    dirty: false,
                },
                _ => return Err(Error::IsDirectory),
            },
        };
        self.files[slot] = Some(file);
        Ok(Fd(slot))
    }

    /// Current size of an open file
    pub fn size(&mut self, fd: Fd) -> Result<u32> {
        let result = self.file(fd).map(|file| file.inode.size as u32);
        self.record(result)
    }

    /// Move the file position
    ///
    /// The position can never leave `0..=size`.
    pub fn lseek(&mut self, fd: Fd, offset: i32, whence: Whence) -> Result<u32> {
        let result = self.lseek_inner(fd, offset, whence);
        self.record(result)
    }

    fn lseek_inner(&mut self, fd: Fd, offset: i32, whence: Whence) -> Result<u32> {
        let file = self.file_mut(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.pos as i64,
            Whence::End => file.inode.size as i64,
        };
        let pos = base + offset as i64;
        if pos < 0 {
            return Err(Error::SeekBeforeStart);
        }
        if pos > file.inode.size as i64 {
            return Err(Error::SeekBeyondEnd);
        }
        file.pos = pos as u32;
        Ok(file.pos)
    }

    /// Read from the current position, returning the number of bytes read
    ///
    /// Reads stop at the end of the file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let result = self.read_inner(fd, buf);
        self.record(result)
    }

    fn read_inner(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let (oid, start, size) = {
            let file = self.file(fd)?;
            (file.inode.oid, file.pos, file.inode.size as u32)
        };
        let len = buf.len().min(size.saturating_sub(start) as usize);

        let mut done = 0;
        while done < len {
            let pos = start + done as u32;
            let seq = seq_of(pos);
            let data = match self.store.find(Filter::Data { oid, seq: Some(seq) }, Cursor::START)? {
                Some((_, Chunk::Data(data))) => data,
                _ => {
                    error!("oid {} is missing chunk {}", oid, seq);
                    return Err(Error::MissingChunk);
                }
            };
            let offset = (pos - chunk_start(seq)) as usize;
            let n = (len - done).min(DATA_PER_CHUNK - offset);
            buf[done..done + n].copy_from_slice(&data.payload[offset..offset + n]);
            done += n;
        }

        self.file_mut(fd)?.pos = start + len as u32;
        Ok(len)
    }

    /// Write at the current position, returning the number of bytes written
    ///
    /// Writes past the maximum file size are cut short. If storing a chunk
    /// fails part way, the bytes written until then are kept and the error
    /// is returned.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let result = self.write_inner(fd, buf);
        self.record(result)
    }

    fn write_inner(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let (oid, start, size) = {
            let file = self.file(fd)?;
            (file.inode.oid, file.pos, file.inode.size as u32)
        };
        if buf.is_empty() {
            return Ok(0);
        }
        if start > size {
            return Err(Error::InvalidPosition);
        }
        let room = (MAX_FILE_SIZE - start) as usize;
        if room == 0 {
            return Err(Error::TooBig);
        }
        let buf = if buf.len() > room {
            warn!("write of {} bytes clamped to {}", buf.len(), room);
            &buf[..room]
        } else {
            buf
        };
        let end = start + buf.len() as u32;

        if start < size {
            self.drop_overwritten(oid, start, end, size)?;
        }

        let mut done = 0;
        let result = loop {
            if done == buf.len() {
                break Ok(());
            }
            let pos = start + done as u32;
            match self.write_chunk_at(oid, pos, &buf[done..]) {
                Ok(n) => done += n,
                Err(e) => break Err(e),
            }
        };

        if done > 0 {
            let file = self.file_mut(fd)?;
            file.pos = start + done as u32;
            if file.pos > size {
                file.inode.size = file.pos as u16;
            }
            file.dirty = true;
        }
        result.map(|_| done)
    }

    /// Retire every data chunk lying wholly inside `start..end`
    ///
    /// Rewriting them afterwards never needs a second chunk per sequence
    /// number, which matters when the medium is almost full.
    fn drop_overwritten(&mut self, oid: u32, start: u32, end: u32, size: u32) -> Result<()> {
        let mut seq = seq_of(start);
        while chunk_start(seq) < size {
            let first = chunk_start(seq);
            let last = (first + DATA_PER_CHUNK as u32).min(size);
            if first >= end {
                break;
            }
            if first >= start && last <= end {
                if let Some((location, _)) =
                    self.store.find(Filter::Data { oid, seq: Some(seq) }, Cursor::START)?
                {
                    self.store.delete(location)?;
                }
            }
            seq += 1;
        }
        Ok(())
    }

    /// Write the part of `bytes` that falls into the chunk holding `pos`
    fn write_chunk_at(&mut self, oid: u32, pos: u32, bytes: &[u8]) -> Result<usize> {
        let seq = seq_of(pos);
        let offset = (pos - chunk_start(seq)) as usize;
        let n = bytes.len().min(DATA_PER_CHUNK - offset);

        match self.store.find(Filter::Data { oid, seq: Some(seq) }, Cursor::START)? {
            Some((location, Chunk::Data(mut data))) => {
                data.payload[offset..offset + n].copy_from_slice(&bytes[..n]);
                let chunk = Chunk::Data(data);
                if !self.store.overwrite(location, &chunk)? {
                    trace!("relocating chunk {} of oid {}", seq, oid);
                    self.store.delete(location)?;
                    self.store.store(&chunk, &mut self.rng)?;
                }
            }
            _ => {
                if offset != 0 {
                    error!("oid {} is missing chunk {}", oid, seq);
                    return Err(Error::MissingChunk);
                }
                let mut data = DataChunk::new(oid, seq);
                data.payload[..n].copy_from_slice(&bytes[..n]);
                self.store.store(&Chunk::Data(data), &mut self.rng)?;
            }
        }
        Ok(n)
    }

    /// Commit and release a descriptor
    ///
    /// The descriptor is released even when an error is returned.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let result = self.close_inner(fd);
        self.record(result)
    }

    fn close_inner(&mut self, fd: Fd) -> Result<()> {
        self.file(fd)?;
        let file = match self.files[fd.0].take() {
            Some(file) => file,
            None => return Err(Error::NotOpen),
        };
        if !file.dirty {
            return Ok(());
        }
        let inode = file.inode;

        if !self.is_reachable(inode.parent)? {
            warn!("purging dangling file {}", inode.oid);
            self.purge_data(inode.oid)?;
            if let Some((location, Chunk::Inode(orphan))) =
                self.store.find(Filter::InodeByOid(inode.oid), Cursor::START)?
            {
                if orphan.is_file() {
                    self.store.delete(location)?;
                }
            }
            return Err(Error::Dangling);
        }

        match self.store.find(Filter::InodeByOid(inode.oid), Cursor::START)? {
            Some((location, Chunk::Inode(committed))) if committed.is_file() => {
                if committed != inode {
                    trace!("committing inode {}", inode.oid);
                    self.store.delete(location)?;
                    self.store.store(&Chunk::Inode(inode), &mut self.rng)?;
                }
            }
            _ => {
                // Unlinked while open
                debug!("file {} is gone, purging its data", inode.oid);
                self.purge_data(inode.oid)?;
            }
        }
        Ok(())
    }

    /// Check that every ancestor of a directory is a live directory
    fn is_reachable(&mut self, mut oid: u32) -> Result<bool> {
        // A chain longer than the number of chunks must contain a cycle
        for _ in 0..self.store.geometry().total_chunks() {
            if oid == ROOT_OID {
                return Ok(true);
            }
            match self.store.find(Filter::InodeByOid(oid), Cursor::START)? {
                Some((_, Chunk::Inode(inode))) if inode.is_dir() => oid = inode.parent,
                _ => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Retire every data chunk of an object
    fn purge_data(&mut self, oid: u32) -> Result<u32> {
        let geometry = self.store.geometry();
        let mut cursor = Cursor::START;
        let mut count = 0;
        while let Some((location, _)) = self.store.find(Filter::Data { oid, seq: None }, cursor)? {
            self.store.delete(location)?;
            cursor = Cursor::after(location, geometry);
            count += 1;
        }
        trace!("purged {} chunks of oid {}", count, oid);
        Ok(count)
    }

    /// Shrink a file to `len` bytes
    pub fn truncate(&mut self, path: &str, len: u32) -> Result<()> {
        let result = self.truncate_inner(path, len);
        self.record(result)
    }

    fn truncate_inner(&mut self, path: &str, len: u32) -> Result<()> {
        debug!("truncate {} to {}", path, len);
        let mut inode = match self.resolve(path)? {
            Node::Entry(_, inode) if inode.is_file() => inode,
            _ => return Err(Error::IsDirectory),
        };
        let size = inode.size as u32;
        if len > size {
            return Err(Error::NoExtend);
        }
        if len == size {
            return Ok(());
        }
        let oid = inode.oid;

        // Zero the tail of the chunk the new end falls into
        let seq = seq_of(len);
        let offset = (len - chunk_start(seq)) as usize;
        if offset != 0 {
            let (location, mut data) =
                match self.store.find(Filter::Data { oid, seq: Some(seq) }, Cursor::START)? {
                    Some((location, Chunk::Data(data))) => (location, data),
                    _ => {
                        error!("oid {} is missing chunk {}", oid, seq);
                        return Err(Error::MissingChunk);
                    }
                };
            data.payload[offset..].fill(0);
            let chunk = Chunk::Data(data);
            if !self.store.overwrite(location, &chunk)? {
                self.store.delete(location)?;
                self.store.store(&chunk, &mut self.rng)?;
            }
        }

        let keep = if offset == 0 { seq } else { seq + 1 };
        if let Some((location, _)) = self.store.find(Filter::InodeByOid(oid), Cursor::START)? {
            self.store.delete(location)?;
        }
        let geometry = self.store.geometry();
        let mut cursor = Cursor::START;
        while let Some((location, chunk)) =
            self.store.find(Filter::Data { oid, seq: None }, cursor)?
        {
            if let Chunk::Data(data) = chunk {
                if data.seq >= keep {
                    self.store.delete(location)?;
                }
            }
            cursor = Cursor::after(location, geometry);
        }

        inode.size = len as u16;
        self.store.store(&Chunk::Inode(inode), &mut self.rng)?;
        Ok(())
    }

    /// Remove a file and all of its data
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let result = self.unlink_inner(path);
        self.record(result)
    }

    fn unlink_inner(&mut self, path: &str) -> Result<()> {
        debug!("unlink {}", path);
        let (location, inode) = match self.resolve(path)? {
            Node::Entry(location, inode) if inode.is_file() => (location, inode),
            _ => return Err(Error::IsDirectory),
        };
        self.store.delete(location)?;
        self.purge_data(inode.oid)?;
        Ok(())
    }
}
