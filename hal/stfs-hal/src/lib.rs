//! STFS Hardware Abstraction Layer
//!
//! This crate defines the flash medium contract the filesystem is written
//! against. A medium is a linear array of equally sized erase blocks, each
//! holding a whole number of fixed-size chunks. Programming may only clear
//! bits; a bit returns to 1 only when its whole block is erased.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  stfs-core (filesystem)                 │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  stfs-hal (this crate - FlashMedium)    │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  NorMedium    │       │   RamFlash    │
//! │ (any NorFlash)│       │ (host tests)  │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Types
//!
//! - [`flash::FlashMedium`] - Byte-addressed read/program/erase interface
//! - [`flash::Geometry`] - Block and chunk layout of a medium
//! - [`nor::NorMedium`] - Adapter over `embedded_storage` NOR flash drivers
//! - [`ram::RamFlash`] - RAM-backed medium enforcing NOR semantics

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod flash;
pub mod nor;
pub mod ram;

// Re-export key types at crate root for convenience
pub use flash::{is_bit_subset, FlashError, FlashMedium, Geometry, CHUNK_SIZE};
pub use nor::NorMedium;
pub use ram::RamFlash;
