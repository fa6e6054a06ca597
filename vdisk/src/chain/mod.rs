//! Image chain tables
//!
//! Describes where every byte of the virtual disk comes from:
//!
//! - **chunks** map runs of image sectors onto runs of physical sectors
//! - **overrides** patch byte ranges after the physical read
//! - **extents** add sectors past the end of the image, served from memory
//!   or remapped onto another part of the image
//!
//! The tables are assembled once with [`ImageChainBuilder`] and never
//! change afterwards.

mod builder;

pub use builder::ImageChainBuilder;

use alloc::vec::Vec;

use crate::{sector_to_byte, sectors_for_bytes, SECTOR_SIZE};

/// A run of image sectors stored contiguously on the backing device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageChunk {
    /// First image sector (2048-byte units)
    pub image_start_sector: u64,
    /// Last image sector, inclusive
    pub image_end_sector: u64,
    /// Physical sector of `image_start_sector` (device sector units)
    pub disk_start_sector: u64,
}

impl ImageChunk {
    /// Create a chunk covering `image_start_sector..=image_end_sector`
    pub const fn new(image_start_sector: u64, image_end_sector: u64, disk_start_sector: u64) -> Self {
        Self {
            image_start_sector,
            image_end_sector,
            disk_start_sector,
        }
    }

    /// Does this chunk map `sector`?
    #[inline]
    pub const fn contains(&self, sector: u64) -> bool {
        sector >= self.image_start_sector && sector <= self.image_end_sector
    }

    /// Number of image sectors in the chunk
    pub const fn sector_count(&self) -> u64 {
        self.image_end_sector - self.image_start_sector + 1
    }
}

/// A byte-range patch laid over the physical image data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideChunk {
    /// Byte offset inside the image
    pub image_byte_offset: u64,
    /// Patch bytes (owned copy)
    pub data: Vec<u8>,
}

impl OverrideChunk {
    /// Register a patch, copying `data`
    pub fn new(image_byte_offset: u64, data: &[u8]) -> Self {
        Self {
            image_byte_offset,
            data: data.to_vec(),
        }
    }

    /// Patch length in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// One past the last patched byte
    #[inline]
    pub fn end(&self) -> u64 {
        self.image_byte_offset + self.size()
    }
}

/// Sectors appended after the nominal image
///
/// `[mem_sector_start, mem_sector_end)` is served from the chain's memory
/// region, `[remap_sector_start, remap_sector_end)` from image sectors
/// starting at `origin_sector_start`. Either range may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualExtent {
    /// First memory-backed sector
    pub mem_sector_start: u64,
    /// One past the last memory-backed sector
    pub mem_sector_end: u64,
    /// Offset of the first memory sector inside the memory region
    pub mem_byte_offset: u64,
    /// First remapped sector
    pub remap_sector_start: u64,
    /// One past the last remapped sector
    pub remap_sector_end: u64,
    /// Image sector `remap_sector_start` stands for
    pub origin_sector_start: u64,
}

impl VirtualExtent {
    /// Extent served entirely from memory
    pub const fn memory(start: u64, end: u64, mem_byte_offset: u64) -> Self {
        Self {
            mem_sector_start: start,
            mem_sector_end: end,
            mem_byte_offset,
            remap_sector_start: 0,
            remap_sector_end: 0,
            origin_sector_start: 0,
        }
    }

    /// Extent that mirrors image sectors starting at `origin`
    pub const fn remap(start: u64, end: u64, origin: u64) -> Self {
        Self {
            mem_sector_start: 0,
            mem_sector_end: 0,
            mem_byte_offset: 0,
            remap_sector_start: start,
            remap_sector_end: end,
            origin_sector_start: origin,
        }
    }

    /// Memory head followed by a remapped body
    pub const fn split(
        mem_start: u64,
        mem_end: u64,
        mem_byte_offset: u64,
        remap_end: u64,
        origin: u64,
    ) -> Self {
        Self {
            mem_sector_start: mem_start,
            mem_sector_end: mem_end,
            mem_byte_offset,
            remap_sector_start: mem_end,
            remap_sector_end: remap_end,
            origin_sector_start: origin,
        }
    }

    /// Is `sector` served from memory?
    #[inline]
    pub const fn in_memory(&self, sector: u64) -> bool {
        sector >= self.mem_sector_start && sector < self.mem_sector_end
    }

    /// Is `sector` remapped?
    #[inline]
    pub const fn in_remap(&self, sector: u64) -> bool {
        sector >= self.remap_sector_start && sector < self.remap_sector_end
    }

    /// Byte offset inside the memory region for a memory-backed `sector`
    #[inline]
    pub const fn memory_offset(&self, sector: u64) -> u64 {
        self.mem_byte_offset + sector_to_byte(sector - self.mem_sector_start)
    }

    /// Image sector a remapped `sector` stands for
    #[inline]
    pub const fn origin_of(&self, sector: u64) -> u64 {
        self.origin_sector_start + (sector - self.remap_sector_start)
    }

    /// Memory sector count
    pub const fn mem_sectors(&self) -> u64 {
        self.mem_sector_end.saturating_sub(self.mem_sector_start)
    }

    /// Remapped sector count
    pub const fn remap_sectors(&self) -> u64 {
        self.remap_sector_end.saturating_sub(self.remap_sector_start)
    }
}

/// Immutable description of one mounted image
#[derive(Debug, Clone)]
pub struct ImageChain {
    pub(crate) disk_sector_size: u32,
    pub(crate) real_image_size: u64,
    pub(crate) virtual_image_size: u64,
    pub(crate) chunks: Vec<ImageChunk>,
    pub(crate) overrides: Vec<OverrideChunk>,
    pub(crate) extents: Vec<VirtualExtent>,
    pub(crate) memory: Vec<u8>,
}

impl ImageChain {
    /// Sector size of the backing device
    pub fn disk_sector_size(&self) -> u32 {
        self.disk_sector_size
    }

    /// Backing device sectors per virtual sector
    pub fn disk_sectors_per_sector(&self) -> u64 {
        SECTOR_SIZE as u64 / self.disk_sector_size as u64
    }

    /// Size of the image as stored on disk
    pub fn real_image_size(&self) -> u64 {
        self.real_image_size
    }

    /// Sectors of the nominal image (last one may be partial)
    pub fn image_sectors(&self) -> u64 {
        sectors_for_bytes(self.real_image_size)
    }

    /// Size presented to the boot environment
    pub fn virtual_image_size(&self) -> u64 {
        self.virtual_image_size
    }

    /// Chunk table, in registration order
    pub fn chunks(&self) -> &[ImageChunk] {
        &self.chunks
    }

    /// Override table, in registration order
    pub fn overrides(&self) -> &[OverrideChunk] {
        &self.overrides
    }

    /// Virtual extent table, in registration order
    pub fn extents(&self) -> &[VirtualExtent] {
        &self.extents
    }

    /// Memory region backing memory extents
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// First sector and sector count of extent `id`
    ///
    /// Used by file-open redirection to size the replacement file.
    pub fn extent_span(&self, id: usize) -> Option<(u64, u64)> {
        let extent = self.extents.get(id)?;
        Some((
            extent.mem_sector_start,
            extent.mem_sectors() + extent.remap_sectors(),
        ))
    }
}
