//! Morpheus Virtual Disk
//!
//! Presents a disk image that lives scattered across a real partition as a
//! single read-only block device with 2048-byte sectors.
//!
//! # Architecture
//!
//! ```text
//!                 read(lba, buf)
//!                       │
//!              ┌────────▼────────┐
//!              │  OverflowFixup  │  lba += 2097152 for a relocated run
//!              └────────┬────────┘
//!          inside image │ beyond image
//!        ┌──────────────┴──────────────┐
//! ┌──────▼──────┐              ┌───────▼───────┐
//! │ ChunkMapper │◄─────────────┤  ExtentRemap  │  memory / remapped sectors
//! └──────┬──────┘  remap runs  └───────────────┘
//! ┌──────▼──────┐
//! │  Overrides  │  byte-range patches
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vdisk::{ImageChainBuilder, ImageChunk, MountConfig, OverflowFixup, VirtualDisk};
//!
//! let chain = ImageChainBuilder::new(512, iso_size)
//!     .chunk(ImageChunk::new(0, last_sector, partition_lba))
//!     .build()?;
//!
//! let config = MountConfig::default();
//! let mut disk = VirtualDisk::from_chain(raw_block_io, chain, &config)?;
//! let mut fixup = OverflowFixup::new(config.fix_sector_overflow);
//!
//! // Anything that speaks gpt_disk_io::BlockIo can now read the image
//! let mut dev = disk.bind(&mut fixup);
//! dev.read_blocks(Lba(16), &mut sector)?;
//! ```

#![no_std]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

pub mod attach;
pub mod chain;
pub mod device;
pub mod error;
pub mod fixup;
pub mod identity;
pub mod logger;
pub mod mapper;
pub mod overrides;
pub mod redirect;
pub mod remap;

pub use chain::{ImageChain, ImageChainBuilder, ImageChunk, OverrideChunk, VirtualExtent};
pub use device::{BoundDisk, Detached, MemDisk, Media, MountConfig, VirtualDisk};
pub use error::{ChainError, DeviceError};
pub use fixup::{DirentOverride, FixupState, OverflowFixup};
pub use identity::DevicePath;
pub use redirect::{FileReplace, ReplacedFile};

/// Virtual sector size (always 2048 bytes, whatever the backing device uses)
pub const SECTOR_SIZE: usize = 2048;

/// First sector number an ISO9660 directory record can no longer address
/// once the image grows past 4 GiB
pub const SECTOR_OVERFLOW: u64 = 2_097_152;

/// Convert a virtual sector number to a byte offset
#[inline]
pub const fn sector_to_byte(sector: u64) -> u64 {
    sector * SECTOR_SIZE as u64
}

/// Number of virtual sectors needed to hold `bytes`
#[inline]
pub const fn sectors_for_bytes(bytes: u64) -> u64 {
    (bytes + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64
}
