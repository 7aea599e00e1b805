//! Filesystem limits and layout constants
//!
//! The on-flash format depends on these values; changing any of them
//! makes existing flash contents unreadable.

pub use stfs_hal::CHUNK_SIZE;

/// Maximum length of a file or directory name in bytes
pub const NAME_MAX: usize = 32;

/// Bytes of header in front of the payload of a data chunk
pub const DATA_HEADER_SIZE: usize = 7;

/// Payload bytes carried by one data chunk
pub const DATA_PER_CHUNK: usize = CHUNK_SIZE - DATA_HEADER_SIZE;

/// Largest file size representable in an inode
pub const MAX_FILE_SIZE: u32 = u16::MAX as u32;

/// Default number of concurrently open files
pub const MAX_OPEN_FILES: usize = 8;

/// OID of the virtual root directory
pub const ROOT_OID: u32 = 1;

/// Initial value of the rolling OID offset
pub const OID_START_OFFSET: u32 = 1;

/// Fewest blocks a medium may have: one for data, one reserved for vacuum
pub const MIN_BLOCKS: u32 = 2;
