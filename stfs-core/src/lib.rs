//! Log-structured flash filesystem for embedded security tokens
//!
//! STFS stores directories and files on raw NOR flash as a log of
//! fixed-size chunks. Nothing is updated in place unless the update only
//! clears bits; everything else is retired and written anew, and a
//! garbage collector ("vacuum") reclaims whole blocks.
//!
//! - Chunk codec (inode and data records)
//! - Chunk store with linear scans and the vacuum cycle
//! - OID allocator and path resolver
//! - Directory operations and the file descriptor layer
//!
//! All hardware access goes through [`stfs_hal::FlashMedium`].
//!
//! ```ignore
//! let mut fs = Stfs::new(RamFlash::<4, 16>::new(), rng);
//! fs.format()?;
//! fs.mkdir("/docs")?;
//! let fd = fs.open("/docs/a.txt", OpenMode::Create)?;
//! fs.write(fd, b"hello")?;
//! fs.close(fd)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod chunk;
pub mod config;
pub mod error;
pub mod fs;
pub mod store;

#[cfg(test)]
mod tests;

pub use chunk::{Inode, Kind};
pub use error::{Error, Result};
pub use fs::{DirCursor, Fd, OpenMode, ReadDir, Stfs, Usage, Whence};
