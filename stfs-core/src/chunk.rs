//! Chunk (record) encoding and decoding
//!
//! Chunk format, `CHUNK_SIZE` bytes, little-endian integers:
//!
//! ```text
//! Inode                               Data
//! ┌────────┬──────────────────────┐   ┌────────┬───────────────┐
//! │ 0      │ tag 0xAA             │   │ 0      │ tag 0xCC      │
//! │ 1      │ name_len:6 kind:1 1  │   │ 1..5   │ oid           │
//! │ 2..4   │ size                 │   │ 5..7   │ seq           │
//! │ 4..8   │ parent oid           │   │ 7..128 │ payload       │
//! │ 8..12  │ oid                  │   └────────┴───────────────┘
//! │ 12..44 │ name                 │
//! │ 44..128│ reserved             │   Empty:   all 0xFF
//! └────────┴──────────────────────┘   Deleted: all 0x00
//! ```

use heapless::Vec;

use crate::config::{CHUNK_SIZE, DATA_HEADER_SIZE, DATA_PER_CHUNK, NAME_MAX};
use crate::error::{Error, Result};

/// Tag of a never-written chunk
pub const TAG_EMPTY: u8 = 0xFF;
/// Tag of a retired chunk
pub const TAG_DELETED: u8 = 0x00;
/// Tag of an inode chunk
pub const TAG_INODE: u8 = 0xAA;
/// Tag of a data chunk
pub const TAG_DATA: u8 = 0xCC;

/// Size of the unused tail of an inode chunk
pub const INODE_RESERVED_SIZE: usize = CHUNK_SIZE - INODE_NAME_OFFSET - NAME_MAX;

const INODE_NAME_OFFSET: usize = 12;
const NAME_LEN_MASK: u8 = 0x3F;
const KIND_FILE_BIT: u8 = 0x40;
const FLAGS_RESERVED_BIT: u8 = 0x80;

/// Raw bytes of one chunk
pub type RawChunk = [u8; CHUNK_SIZE];

/// Object type stored in an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    Directory,
    File,
}

/// File or directory metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Directory or file
    pub kind: Kind,
    /// File size in bytes, 0 for directories
    pub size: u16,
    /// OID of the containing directory
    pub parent: u32,
    /// OID of this object
    pub oid: u32,
    name: Vec<u8, NAME_MAX>,
    reserved: [u8; INODE_RESERVED_SIZE],
}

impl Inode {
    /// Create an inode with an empty reserved area
    pub fn new(kind: Kind, parent: u32, oid: u32, name: &[u8]) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::NameSize);
        }
        let name = Vec::from_slice(name).map_err(|_| Error::NameSize)?;
        Ok(Self {
            kind,
            size: 0,
            parent,
            oid,
            name,
            reserved: [0xFF; INODE_RESERVED_SIZE],
        })
    }

    /// Name bytes, without padding
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.kind == Kind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == Kind::File
    }

    fn encode_into(&self, raw: &mut RawChunk) {
        let kind = match self.kind {
            Kind::File => KIND_FILE_BIT,
            Kind::Directory => 0,
        };
        raw[0] = TAG_INODE;
        raw[1] = FLAGS_RESERVED_BIT | kind | (self.name.len() as u8 & NAME_LEN_MASK);
        raw[2..4].copy_from_slice(&self.size.to_le_bytes());
        raw[4..8].copy_from_slice(&self.parent.to_le_bytes());
        raw[8..12].copy_from_slice(&self.oid.to_le_bytes());
        let name_end = INODE_NAME_OFFSET + self.name.len();
        raw[INODE_NAME_OFFSET..name_end].copy_from_slice(&self.name);
        raw[name_end..INODE_NAME_OFFSET + NAME_MAX].fill(0xFF);
        raw[INODE_NAME_OFFSET + NAME_MAX..].copy_from_slice(&self.reserved);
    }

    fn decode(raw: &RawChunk) -> Option<Self> {
        let name_len = (raw[1] & NAME_LEN_MASK) as usize;
        if name_len == 0 || name_len > NAME_MAX {
            return None;
        }
        let kind = if raw[1] & KIND_FILE_BIT != 0 {
            Kind::File
        } else {
            Kind::Directory
        };
        let name = Vec::from_slice(&raw[INODE_NAME_OFFSET..INODE_NAME_OFFSET + name_len]).ok()?;
        let mut reserved = [0u8; INODE_RESERVED_SIZE];
        reserved.copy_from_slice(&raw[INODE_NAME_OFFSET + NAME_MAX..]);
        Some(Self {
            kind,
            size: u16::from_le_bytes([raw[2], raw[3]]),
            parent: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            oid: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            name,
            reserved,
        })
    }
}

/// A slice of file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// OID of the owning file
    pub oid: u32,
    /// Position of this chunk within the file, in chunks
    pub seq: u16,
    /// Content; bytes past the end of the file are unspecified
    pub payload: [u8; DATA_PER_CHUNK],
}

impl DataChunk {
    /// Create a data chunk with an erased payload
    pub fn new(oid: u32, seq: u16) -> Self {
        Self {
            oid,
            seq,
            payload: [0xFF; DATA_PER_CHUNK],
        }
    }

    fn encode_into(&self, raw: &mut RawChunk) {
        raw[0] = TAG_DATA;
        raw[1..5].copy_from_slice(&self.oid.to_le_bytes());
        raw[5..7].copy_from_slice(&self.seq.to_le_bytes());
        raw[DATA_HEADER_SIZE..].copy_from_slice(&self.payload);
    }

    fn decode(raw: &RawChunk) -> Self {
        let mut payload = [0u8; DATA_PER_CHUNK];
        payload.copy_from_slice(&raw[DATA_HEADER_SIZE..]);
        Self {
            oid: u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]),
            seq: u16::from_le_bytes([raw[5], raw[6]]),
            payload,
        }
    }
}

/// One record on flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Never written since the last erase
    Empty,
    /// Written, then retired
    Deleted,
    Inode(Inode),
    Data(DataChunk),
}

impl Chunk {
    /// Decode raw flash bytes
    ///
    /// Chunks with an unknown tag or a corrupt inode header are reported
    /// as `Deleted`: they are garbage that only vacuum can reclaim.
    pub fn decode(raw: &RawChunk) -> Self {
        match raw[0] {
            TAG_EMPTY => Chunk::Empty,
            TAG_INODE => Inode::decode(raw).map_or(Chunk::Deleted, Chunk::Inode),
            TAG_DATA => Chunk::Data(DataChunk::decode(raw)),
            _ => Chunk::Deleted,
        }
    }

    /// Encode into raw flash bytes
    pub fn encode(&self) -> RawChunk {
        let mut raw = [0xFF; CHUNK_SIZE];
        match self {
            Chunk::Empty => {}
            Chunk::Deleted => raw.fill(TAG_DELETED),
            Chunk::Inode(inode) => inode.encode_into(&mut raw),
            Chunk::Data(data) => data.encode_into(&mut raw),
        }
        raw
    }

    /// Inode or data chunk that vacuum must keep
    pub fn is_live(&self) -> bool {
        matches!(self, Chunk::Inode(_) | Chunk::Data(_))
    }
}
