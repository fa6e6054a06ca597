//! Virtual Extent Remapper
//!
//! Serves reads that reach past the end of the nominal image. Every sector
//! of the request is looked up in the extent table on its own:
//!
//! - memory sectors are copied straight out of the chain's memory region
//! - remapped sectors are collected into runs of consecutive image sectors,
//!   and each run costs one image read
//! - sectors still inside the image are read as themselves
//! - anything else reads as zeros
//!
//! Overrides land on memory and zero-filled sectors too, at their virtual
//! position. Remapped runs get theirs at the origin position.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

use crate::chain::{ImageChain, VirtualExtent};
use crate::error::DeviceError;
use crate::fixup::OverflowFixup;
use crate::overrides::apply_overrides;
use crate::{sector_to_byte, SECTOR_SIZE};

/// How one sector of the current request gets its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectorFlag {
    /// No extent claims the sector
    #[default]
    Unset,
    /// Already copied from memory
    Memory,
    /// Comes from this image sector
    Remap(u64),
}

/// Per-request scratch area for sector flags
///
/// Grows to the largest request seen and never shrinks.
#[derive(Debug, Default)]
pub struct SectorFlagBuffer {
    flags: Vec<SectorFlag>,
}

impl SectorFlagBuffer {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self { flags: Vec::new() }
    }

    /// Number of flags the buffer currently holds
    pub fn capacity(&self) -> usize {
        self.flags.len()
    }

    /// Reset and return `count` flags, growing first if needed
    pub fn prepare(&mut self, count: usize) -> Result<&mut [SectorFlag], TryReserveError> {
        if count > self.flags.len() {
            let mut grown = Vec::new();
            grown.try_reserve_exact(count)?;
            grown.resize(count, SectorFlag::Unset);
            self.flags = grown;
        }

        let flags = &mut self.flags[..count];
        flags.fill(SectorFlag::Unset);
        Ok(flags)
    }
}

/// First extent (table order) claiming `sector`
fn find_extent(extents: &[VirtualExtent], sector: u64) -> Option<&VirtualExtent> {
    extents
        .iter()
        .find(|e| e.in_memory(sector) || e.in_remap(sector))
}

/// Decide where `sector` comes from, copying memory sectors into `dst`
fn resolve_sector(chain: &ImageChain, sector: u64, dst: &mut [u8]) -> SectorFlag {
    match find_extent(chain.extents(), sector) {
        Some(extent) if extent.in_memory(sector) => {
            let offset = extent.memory_offset(sector) as usize;
            dst.copy_from_slice(&chain.memory()[offset..offset + SECTOR_SIZE]);
            SectorFlag::Memory
        }
        Some(extent) => SectorFlag::Remap(extent.origin_of(sector)),
        None if sector < chain.image_sectors() => SectorFlag::Remap(sector),
        None => {
            log::trace!("sector {} not claimed by any extent, zero-filled", sector);
            dst.fill(0);
            SectorFlag::Unset
        }
    }
}

/// Fill `buffer` with virtual sectors starting at `start_sector`
///
/// `read_image(sector, buf, fixup)` performs the image read for each
/// coalesced run.
pub fn read_virtual_sectors<E, F>(
    chain: &ImageChain,
    scratch: &mut SectorFlagBuffer,
    fixup: &mut OverflowFixup,
    start_sector: u64,
    buffer: &mut [u8],
    mut read_image: F,
) -> Result<(), DeviceError<E>>
where
    F: FnMut(u64, &mut [u8], &mut OverflowFixup) -> Result<(), DeviceError<E>>,
{
    let count = buffer.len() / SECTOR_SIZE;
    let flags = scratch.prepare(count).map_err(|_| {
        log::error!("cannot grow sector flag buffer to {} entries", count);
        DeviceError::OutOfResources
    })?;

    for (j, (flag, dst)) in flags
        .iter_mut()
        .zip(buffer.chunks_exact_mut(SECTOR_SIZE))
        .enumerate()
    {
        let sector = start_sector + j as u64;
        *flag = resolve_sector(chain, sector, dst);

        if !matches!(flag, SectorFlag::Remap(_)) {
            apply_overrides(chain.overrides(), sector_to_byte(sector), dst, |ov| {
                fixup.observe(ov)
            });
        }
    }

    // (first buffer sector, first image sector, length)
    let mut run: Option<(usize, u64, usize)> = None;

    for (j, flag) in flags.iter().enumerate() {
        let SectorFlag::Remap(target) = *flag else {
            if let Some(pending) = run.take() {
                flush(buffer, pending, fixup, &mut read_image)?;
            }
            continue;
        };

        if let Some((_, run_target, len)) = run.as_mut() {
            if *run_target + *len as u64 == target {
                *len += 1;
                continue;
            }
        }

        if let Some(pending) = run.take() {
            flush(buffer, pending, fixup, &mut read_image)?;
        }
        run = Some((j, target, 1));
    }

    if let Some(pending) = run {
        flush(buffer, pending, fixup, &mut read_image)?;
    }

    Ok(())
}

fn flush<E, F>(
    buffer: &mut [u8],
    (index, target, len): (usize, u64, usize),
    fixup: &mut OverflowFixup,
    read_image: &mut F,
) -> Result<(), DeviceError<E>>
where
    F: FnMut(u64, &mut [u8], &mut OverflowFixup) -> Result<(), DeviceError<E>>,
{
    let start = index * SECTOR_SIZE;
    read_image(target, &mut buffer[start..start + len * SECTOR_SIZE], fixup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ImageChainBuilder, ImageChunk};
    use alloc::vec;

    #[test]
    fn test_flag_buffer_grows_only() {
        let mut scratch = SectorFlagBuffer::new();
        assert_eq!(scratch.capacity(), 0);

        scratch.prepare(8).unwrap()[3] = SectorFlag::Memory;
        assert_eq!(scratch.capacity(), 8);

        let flags = scratch.prepare(4).unwrap();
        assert_eq!(flags.len(), 4);
        assert!(flags.iter().all(|f| *f == SectorFlag::Unset));
        assert_eq!(scratch.capacity(), 8);

        scratch.prepare(16).unwrap();
        assert_eq!(scratch.capacity(), 16);
    }

    fn chain() -> ImageChain {
        let mut memory = vec![0u8; 2 * 2048];
        memory[..2048].fill(0xA0);
        memory[2048..].fill(0xA1);

        ImageChainBuilder::new(2048, 10 * 2048)
            .chunk(ImageChunk::new(0, 9, 0))
            .extent(VirtualExtent::split(10, 12, 0, 15, 4))
            .extent(VirtualExtent::remap(20, 22, 0))
            .memory(memory)
            .build()
            .unwrap()
    }

    /// Runs issued for `sectors` sectors at `start`; each run fills its
    /// buffer with the low byte of its target
    fn read_runs(chain: &ImageChain, start: u64, sectors: usize) -> (Vec<(u64, usize)>, Vec<u8>) {
        let mut scratch = SectorFlagBuffer::new();
        let mut fixup = OverflowFixup::new(false);
        let mut buffer = vec![0xEEu8; sectors * 2048];
        let mut runs = vec![];

        read_virtual_sectors::<(), _>(chain, &mut scratch, &mut fixup, start, &mut buffer, |sector, buf, _| {
            runs.push((sector, buf.len() / 2048));
            buf.fill(sector as u8);
            Ok(())
        })
        .unwrap();

        (runs, buffer)
    }

    fn two_remaps(first: VirtualExtent, second: VirtualExtent) -> ImageChain {
        ImageChainBuilder::new(2048, 10 * 2048)
            .chunk(ImageChunk::new(0, 9, 0))
            .extent(first)
            .extent(second)
            .build()
            .unwrap()
    }

    #[test]
    fn test_memory_then_remap_run() {
        let (runs, buffer) = read_runs(&chain(), 10, 5);

        assert_eq!(runs, vec![(4, 3)]);
        assert!(buffer[..2048].iter().all(|&b| b == 0xA0));
        assert!(buffer[2048..4096].iter().all(|&b| b == 0xA1));
        assert!(buffer[4096..].iter().all(|&b| b == 4));
    }

    #[test]
    fn test_unclaimed_sectors_zero_and_break_runs() {
        // 13..14 remap, 15..19 unclaimed, 20..21 remap
        let (runs, buffer) = read_runs(&chain(), 13, 9);

        assert_eq!(runs, vec![(5, 2), (0, 2)]);
        assert!(buffer[2 * 2048..7 * 2048].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_boundary_crossing_reads_image_head() {
        let (runs, buffer) = read_runs(&chain(), 8, 3);

        assert_eq!(runs, vec![(8, 2)]);
        assert!(buffer[4096..].iter().all(|&b| b == 0xA0));
    }

    #[test]
    fn test_adjacent_extents_with_distant_targets_split() {
        let chain = two_remaps(VirtualExtent::remap(10, 12, 5), VirtualExtent::remap(12, 14, 0));
        let (runs, _) = read_runs(&chain, 10, 4);

        assert_eq!(runs, vec![(5, 2), (0, 2)]);
    }

    #[test]
    fn test_adjacent_extents_with_adjacent_targets_coalesce() {
        let chain = two_remaps(VirtualExtent::remap(10, 12, 0), VirtualExtent::remap(12, 14, 2));
        let (runs, _) = read_runs(&chain, 10, 4);

        assert_eq!(runs, vec![(0, 4)]);
    }

    #[test]
    fn test_overrides_reach_tail_and_memory_sectors() {
        let chain = ImageChainBuilder::new(2048, 10 * 2048)
            .chunk(ImageChunk::new(0, 9, 0))
            .extent(VirtualExtent::memory(10, 11, 0))
            .memory(vec![0xA0; 2048])
            .override_bytes(10 * 2048 + 8, b"MEM")
            .override_bytes(11 * 2048 + 16, b"TAIL")
            .virtual_image_size(12 * 2048)
            .build()
            .unwrap();

        let (runs, buffer) = read_runs(&chain, 10, 2);

        assert!(runs.is_empty());
        assert_eq!(&buffer[8..11], b"MEM");
        assert_eq!(buffer[11], 0xA0);
        assert_eq!(&buffer[2048 + 16..2048 + 20], b"TAIL");
        assert!(buffer[2048..2048 + 16].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_run_error_propagates() {
        let chain = chain();
        let mut scratch = SectorFlagBuffer::new();
        let mut fixup = OverflowFixup::new(false);
        let mut buffer = vec![0u8; 2 * 2048];

        let err = read_virtual_sectors(&chain, &mut scratch, &mut fixup, 20, &mut buffer, |_, _, _| {
            Err(DeviceError::Io("boom"))
        })
        .unwrap_err();

        assert_eq!(err, DeviceError::Io("boom"));
    }
}
