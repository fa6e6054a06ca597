//! Common test utilities and mock block devices

#![allow(dead_code)]

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use std::io;
use vdisk::ImageChunk;

pub const SECTOR: usize = 2048;

/// Fill a 2048-byte image sector: sector number (LE) in the first 8 bytes,
/// low byte of the sector number everywhere else
pub fn stamp(sector: u64, dst: &mut [u8]) {
    dst.fill(sector as u8);
    dst[..8].copy_from_slice(&sector.to_le_bytes());
}

/// Sector number stamped into a 2048-byte block
pub fn stamp_of(block: &[u8]) -> u64 {
    u64::from_le_bytes(block[..8].try_into().unwrap())
}

/// Image of `sectors` stamped sectors
pub fn stamped_image(sectors: u64) -> Vec<u8> {
    let mut image = vec![0u8; sectors as usize * SECTOR];
    for (i, sector) in image.chunks_exact_mut(SECTOR).enumerate() {
        stamp(i as u64, sector);
    }
    image
}

/// In-memory block device that records every read
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    pub data: Vec<u8>,
    pub block_size: usize,
    /// (lba, bytes) of every read issued
    pub reads: Vec<(u64, usize)>,
    /// Reads covering this LBA fail
    pub fail_lba: Option<u64>,
}

impl MemoryBlockDevice {
    /// Create a new memory block device from raw data
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        Self {
            data,
            block_size,
            reads: Vec::new(),
            fail_lba: None,
        }
    }

    /// Lay `image` out on a device of `disk_blocks` blocks as `chunks` describe
    pub fn scatter(image: &[u8], chunks: &[ImageChunk], block_size: usize, disk_blocks: usize) -> Self {
        let mut data = vec![0xCCu8; disk_blocks * block_size];
        let per_sector = SECTOR / block_size;

        for chunk in chunks {
            for sector in chunk.image_start_sector..=chunk.image_end_sector {
                let src = sector as usize * SECTOR;
                if src >= image.len() {
                    break;
                }
                let len = SECTOR.min(image.len() - src);
                let dst = (chunk.disk_start_sector as usize
                    + (sector - chunk.image_start_sector) as usize * per_sector)
                    * block_size;
                data[dst..dst + len].copy_from_slice(&image[src..src + len]);
            }
        }

        Self::new(data, block_size)
    }
}

impl BlockIo for MemoryBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(self.block_size as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok((self.data.len() / self.block_size) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.reads.push((start_lba.0, dst.len()));

        let blocks = (dst.len() / self.block_size) as u64;
        if let Some(bad) = self.fail_lba {
            if bad >= start_lba.0 && bad < start_lba.0 + blocks {
                return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
            }
        }

        let offset = start_lba.0 as usize * self.block_size;
        if offset + dst.len() > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read beyond end of device",
            ));
        }
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        panic!("the virtual disk must never write to its backing device");
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Unbounded 2048-byte device whose block N holds `stamp(N)`
///
/// Stands in for a disk too large to keep in memory.
#[derive(Debug, Default)]
pub struct PatternBlockDevice {
    pub reads: Vec<(u64, usize)>,
}

impl BlockIo for PatternBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(SECTOR as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok(u64::MAX / SECTOR as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.reads.push((start_lba.0, dst.len()));
        for (i, block) in dst.chunks_exact_mut(SECTOR).enumerate() {
            stamp(start_lba.0 + i as u64, block);
        }
        Ok(())
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        panic!("the virtual disk must never write to its backing device");
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
