//! Chunk Mapper
//!
//! Translates image sectors to physical sectors of the backing device and
//! reads them, one device read per contiguous run. A request crossing a
//! chunk boundary turns into several reads issued in increasing image
//! sector order.

use core::mem;

use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

use crate::chain::{ImageChain, ImageChunk};
use crate::error::{ChainError, DeviceError};
use crate::SECTOR_SIZE;

/// First chunk (table order) mapping `sector`
pub fn find_chunk(chain: &ImageChain, sector: u64) -> Option<&ImageChunk> {
    chain.chunks().iter().find(|c| c.contains(sector))
}

/// Physical sector holding image `sector`
pub fn map_sector(chain: &ImageChain, sector: u64) -> Option<u64> {
    let chunk = find_chunk(chain, sector)?;
    Some(physical_sector(chain, chunk, sector))
}

#[inline]
fn physical_sector(chain: &ImageChain, chunk: &ImageChunk, sector: u64) -> u64 {
    (sector - chunk.image_start_sector) * chain.disk_sectors_per_sector() + chunk.disk_start_sector
}

/// Fill `buffer` with image sectors starting at `start_sector`
///
/// `buffer.len()` must be a multiple of [`SECTOR_SIZE`]. Sectors past the
/// end of the image are zero-filled without touching the device. On error
/// the buffer contents are unspecified.
pub fn read_image_sectors<B: BlockIo>(
    chain: &ImageChain,
    raw: &mut B,
    start_sector: u64,
    buffer: &mut [u8],
) -> Result<(), DeviceError<B::Error>> {
    let image_sectors = chain.image_sectors();
    let mut sector = start_sector;
    let mut remaining = buffer;

    while !remaining.is_empty() {
        if sector >= image_sectors {
            remaining.fill(0);
            break;
        }

        let chunk = find_chunk(chain, sector).ok_or(ChainError::UncoveredSector)?;
        let disk_lba = physical_sector(chain, chunk, sector);

        let left_in_chunk = chunk.image_end_sector + 1 - sector;
        let left_in_image = image_sectors - sector;
        let wanted = (remaining.len() / SECTOR_SIZE) as u64;
        let run = wanted.min(left_in_chunk).min(left_in_image);

        let (head, tail) = mem::take(&mut remaining).split_at_mut(run as usize * SECTOR_SIZE);
        raw.read_blocks(Lba(disk_lba), head).map_err(|e| {
            log::error!(
                "raw disk read failed at lba {} ({} sectors): {}",
                disk_lba,
                run,
                e
            );
            DeviceError::Io(e)
        })?;

        remaining = tail;
        sector += run;
    }

    Ok(())
}
