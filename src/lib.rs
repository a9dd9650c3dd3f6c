//! Block device over an array of identical non-volatile memory chips.
//!
//! The chips of an array are presented as one linear byte range. EEPROM,
//! FRAM and SPI RAM arrays are used directly through [`AddressSpace`].
//! Flash arrays, which must be erased a sector at a time before they are
//! written, go through the write-back [`SectorCache`]. Both implement
//! [`Storage`], which adds ranged access and the block interface expected by
//! filesystems.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod address_space;
mod chip;
mod error;
mod ram;
mod sector_cache;
mod storage;
mod util;

#[cfg(test)]
mod tests_util;

pub use address_space::AddressSpace;
pub use chip::{wait_ready, wait_ready_default, Chip, Geometry};
pub use error::ErrorKind;
pub use ram::{ChipOp, ChipStats, RamChip, SimDelay};
pub use sector_cache::SectorCache;
pub use storage::{ControlOp, Storage};
pub use util::Slice;

/// Virtual block size is `1 << DEFAULT_BLOCK_BITS` bytes.
pub const DEFAULT_BLOCK_BITS: u32 = 9;

/// Byte value of erased memory unless a geometry says otherwise.
pub const ERASED_VALUE: u8 = 0xFF;

/// Chunk size used when checking whether a sector is erased.
pub const EMPTY_PROBE_CHUNK: usize = 32;

/// How long a chip may stay busy before an operation gives up.
pub const READY_TIMEOUT_MS: u32 = 1000;
