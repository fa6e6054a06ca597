//! Image chain assembly and validation

use alloc::vec::Vec;

use super::{ImageChain, ImageChunk, OverrideChunk, VirtualExtent};
use crate::error::ChainError;
use crate::{sectors_for_bytes, SECTOR_SIZE};

/// Collects the chain tables and checks them once before mount
///
/// # Usage
///
/// ```ignore
/// let chain = ImageChainBuilder::new(512, iso_size)
///     .chunk(ImageChunk::new(0, 999, 34816))
///     .chunk(ImageChunk::new(1000, last, 901120))
///     .override_bytes(dirent_offset, &patched_record)
///     .build()?;
/// ```
pub struct ImageChainBuilder {
    disk_sector_size: u32,
    real_image_size: u64,
    virtual_image_size: Option<u64>,
    chunks: Vec<ImageChunk>,
    overrides: Vec<OverrideChunk>,
    extents: Vec<VirtualExtent>,
    memory: Vec<u8>,
}

impl ImageChainBuilder {
    /// Start a chain for an image of `real_image_size` bytes on a device
    /// with `disk_sector_size`-byte sectors
    pub fn new(disk_sector_size: u32, real_image_size: u64) -> Self {
        Self {
            disk_sector_size,
            real_image_size,
            virtual_image_size: None,
            chunks: Vec::new(),
            overrides: Vec::new(),
            extents: Vec::new(),
            memory: Vec::new(),
        }
    }

    /// Append a chunk
    pub fn chunk(mut self, chunk: ImageChunk) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// Append a prebuilt override
    pub fn override_chunk(mut self, chunk: OverrideChunk) -> Self {
        self.overrides.push(chunk);
        self
    }

    /// Append an override patching `data` at `image_byte_offset`
    pub fn override_bytes(self, image_byte_offset: u64, data: &[u8]) -> Self {
        self.override_chunk(OverrideChunk::new(image_byte_offset, data))
    }

    /// Append a virtual extent
    pub fn extent(mut self, extent: VirtualExtent) -> Self {
        self.extents.push(extent);
        self
    }

    /// Memory region backing memory extents
    pub fn memory(mut self, memory: Vec<u8>) -> Self {
        self.memory = memory;
        self
    }

    /// Size to present instead of the computed one
    pub fn virtual_image_size(mut self, bytes: u64) -> Self {
        self.virtual_image_size = Some(bytes);
        self
    }

    /// Validate the tables and freeze them
    pub fn build(self) -> Result<ImageChain, ChainError> {
        if !matches!(self.disk_sector_size, 512 | 1024 | 2048) {
            return Err(ChainError::UnsupportedSectorSize);
        }
        if self.real_image_size == 0 {
            return Err(ChainError::EmptyImage);
        }

        let image_sectors = sectors_for_bytes(self.real_image_size);

        check_chunks(&self.chunks, image_sectors)?;
        check_overrides(&self.overrides)?;
        let extents_end = check_extents(&self.extents, image_sectors, self.memory.len() as u64)?;

        let content_size = image_sectors
            .max(extents_end)
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(ChainError::InvalidExtent)?;
        let virtual_image_size = match self.virtual_image_size {
            Some(size) if size % SECTOR_SIZE as u64 != 0 => {
                return Err(ChainError::UnalignedVirtualSize)
            }
            Some(size) if size < content_size => return Err(ChainError::VirtualSizeTooSmall),
            Some(size) => size,
            None => content_size,
        };

        log::debug!(
            "image chain: {} bytes, {} chunks, {} overrides, {} extents, virtual {} bytes",
            self.real_image_size,
            self.chunks.len(),
            self.overrides.len(),
            self.extents.len(),
            virtual_image_size
        );

        Ok(ImageChain {
            disk_sector_size: self.disk_sector_size,
            real_image_size: self.real_image_size,
            virtual_image_size,
            chunks: self.chunks,
            overrides: self.overrides,
            extents: self.extents,
            memory: self.memory,
        })
    }
}

/// Chunks must be disjoint and leave no image sector unmapped
fn check_chunks(chunks: &[ImageChunk], image_sectors: u64) -> Result<(), ChainError> {
    if chunks.iter().any(|c| c.image_end_sector < c.image_start_sector) {
        return Err(ChainError::InvalidChunk);
    }

    let mut sorted: Vec<(u64, u64)> = chunks
        .iter()
        .map(|c| -> Result<(u64, u64), ChainError> {
            let end = c.image_end_sector.checked_add(1).ok_or(ChainError::InvalidChunk)?;
            Ok((c.image_start_sector, end))
        })
        .collect::<Result<_, _>>()?;
    sorted.sort_unstable();

    let mut covered = 0u64;
    for (start, end) in sorted {
        if start < covered {
            return Err(ChainError::OverlappingChunks);
        }
        if start > covered && covered < image_sectors {
            return Err(ChainError::UncoveredSector);
        }
        covered = end;
    }

    if covered < image_sectors {
        return Err(ChainError::UncoveredSector);
    }
    Ok(())
}

/// Overlapping patches have no defined winner, so they are refused
fn check_overrides(overrides: &[OverrideChunk]) -> Result<(), ChainError> {
    let mut ranges: Vec<(u64, u64)> = overrides
        .iter()
        .filter(|o| o.size() > 0)
        .map(|o| (o.image_byte_offset, o.end()))
        .collect();
    ranges.sort_unstable();

    if ranges.windows(2).any(|w| w[1].0 < w[0].1) {
        return Err(ChainError::OverlappingOverrides);
    }
    Ok(())
}

/// Returns one past the highest sector any extent claims
fn check_extents(
    extents: &[VirtualExtent],
    image_sectors: u64,
    memory_len: u64,
) -> Result<u64, ChainError> {
    let mut ranges: Vec<(u64, u64)> = Vec::with_capacity(extents.len() * 2);

    for extent in extents {
        if extent.mem_sector_end < extent.mem_sector_start
            || extent.remap_sector_end < extent.remap_sector_start
        {
            return Err(ChainError::InvalidExtent);
        }

        if extent.mem_sectors() > 0 {
            let mem_end = extent
                .mem_sectors()
                .checked_mul(SECTOR_SIZE as u64)
                .and_then(|len| extent.mem_byte_offset.checked_add(len))
                .ok_or(ChainError::ExtentOutOfBounds)?;
            if mem_end > memory_len {
                return Err(ChainError::ExtentOutOfBounds);
            }
            ranges.push((extent.mem_sector_start, extent.mem_sector_end));
        }

        if extent.remap_sectors() > 0 {
            let origin_end = extent
                .origin_sector_start
                .checked_add(extent.remap_sectors())
                .ok_or(ChainError::RemapOutOfImage)?;
            if origin_end > image_sectors {
                return Err(ChainError::RemapOutOfImage);
            }
            ranges.push((extent.remap_sector_start, extent.remap_sector_end));
        }
    }

    ranges.sort_unstable();

    if ranges.first().is_some_and(|r| r.0 < image_sectors) {
        return Err(ChainError::ExtentInsideImage);
    }
    if ranges.windows(2).any(|w| w[1].0 < w[0].1) {
        return Err(ChainError::OverlappingExtents);
    }

    Ok(ranges.iter().map(|r| r.1).max().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn base() -> ImageChainBuilder {
        ImageChainBuilder::new(512, 100 * 2048).chunk(ImageChunk::new(0, 99, 2048))
    }

    #[test]
    fn test_minimal_chain() {
        let chain = base().build().unwrap();
        assert_eq!(chain.image_sectors(), 100);
        assert_eq!(chain.virtual_image_size(), 100 * 2048);
        assert_eq!(chain.disk_sectors_per_sector(), 4);
    }

    #[test]
    fn test_rejects_bad_sector_size() {
        let err = ImageChainBuilder::new(4096, 2048)
            .chunk(ImageChunk::new(0, 0, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::UnsupportedSectorSize);
    }

    #[test]
    fn test_rejects_empty_image() {
        let err = ImageChainBuilder::new(512, 0).build().unwrap_err();
        assert_eq!(err, ChainError::EmptyImage);
    }

    #[test]
    fn test_fragmented_chunks_any_order() {
        let chain = ImageChainBuilder::new(512, 100 * 2048)
            .chunk(ImageChunk::new(50, 99, 9000))
            .chunk(ImageChunk::new(0, 49, 100))
            .build();
        assert!(chain.is_ok());
    }

    #[test]
    fn test_rejects_chunk_gap() {
        let err = ImageChainBuilder::new(512, 100 * 2048)
            .chunk(ImageChunk::new(0, 40, 100))
            .chunk(ImageChunk::new(42, 99, 9000))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::UncoveredSector);
    }

    #[test]
    fn test_rejects_short_coverage() {
        // Partial last sector still needs a chunk
        let err = ImageChainBuilder::new(512, 100 * 2048 + 1)
            .chunk(ImageChunk::new(0, 99, 100))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::UncoveredSector);
    }

    #[test]
    fn test_rejects_chunk_overlap() {
        let err = base()
            .chunk(ImageChunk::new(99, 120, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::OverlappingChunks);
    }

    #[test]
    fn test_rejects_inverted_chunk() {
        let err = base().chunk(ImageChunk::new(120, 110, 0)).build().unwrap_err();
        assert_eq!(err, ChainError::InvalidChunk);
    }

    #[test]
    fn test_override_overlap() {
        let touching = base()
            .override_bytes(0, &[1; 16])
            .override_bytes(16, &[2; 16])
            .build();
        assert!(touching.is_ok());

        let err = base()
            .override_bytes(0, &[1; 16])
            .override_bytes(15, &[2; 16])
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::OverlappingOverrides);
    }

    #[test]
    fn test_extent_checks() {
        let err = base()
            .extent(VirtualExtent::memory(99, 101, 0))
            .memory(vec![0; 4096])
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::ExtentInsideImage);

        let err = base()
            .extent(VirtualExtent::memory(100, 102, 0))
            .memory(vec![0; 4095])
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::ExtentOutOfBounds);

        let err = base()
            .extent(VirtualExtent::remap(100, 110, 95))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::RemapOutOfImage);

        let err = base()
            .extent(VirtualExtent::remap(100, 110, 0))
            .extent(VirtualExtent::remap(109, 112, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::OverlappingExtents);
    }

    #[test]
    fn test_virtual_size() {
        let chain = base()
            .extent(VirtualExtent::remap(100, 130, 0))
            .build()
            .unwrap();
        assert_eq!(chain.virtual_image_size(), 130 * 2048);

        let chain = base().virtual_image_size(200 * 2048).build().unwrap();
        assert_eq!(chain.virtual_image_size(), 200 * 2048);

        let err = base()
            .extent(VirtualExtent::remap(100, 130, 0))
            .virtual_image_size(120 * 2048)
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::VirtualSizeTooSmall);

        let err = base().virtual_image_size(200 * 2048 + 1).build().unwrap_err();
        assert_eq!(err, ChainError::UnalignedVirtualSize);
    }

    #[test]
    fn test_huge_tables_rejected_without_overflow() {
        let err = base()
            .chunk(ImageChunk::new(200, u64::MAX, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::InvalidChunk);

        let err = base()
            .extent(VirtualExtent::memory(100, 102, u64::MAX - 10))
            .memory(vec![0; 4096])
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::ExtentOutOfBounds);

        let err = base()
            .extent(VirtualExtent::memory(100, u64::MAX, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::ExtentOutOfBounds);

        let err = base()
            .extent(VirtualExtent::remap(100, 110, u64::MAX - 3))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::RemapOutOfImage);

        let err = base()
            .extent(VirtualExtent::remap(1 << 62, (1 << 62) + 1, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainError::InvalidExtent);
    }
}
