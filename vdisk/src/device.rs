//! Block Device Translator
//!
//! The block device handed to the boot environment. Reads go through the
//! overflow fixup, then either the chunk mapper and overrides (inside the
//! image) or the extent remapper (past it). Writes are always refused.
//!
//! # Usage
//!
//! ```ignore
//! let config = MountConfig { media_id: 1, fix_sector_overflow: true };
//! let mut disk = VirtualDisk::from_chain(raw, chain, &config)?;
//! let mut fixup = OverflowFixup::new(config.fix_sector_overflow);
//!
//! disk.read_blocks(&mut fixup, 16, &mut pvd)?;
//!
//! // Or hand it to anything that takes a gpt_disk_io::BlockIo
//! let volume = iso9660::mount(&mut disk.bind(&mut fixup), 0)?;
//! ```

use alloc::vec::Vec;
use core::convert::Infallible;

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};

use crate::chain::ImageChain;
use crate::error::{ChainError, DeviceError};
use crate::fixup::OverflowFixup;
use crate::mapper::read_image_sectors;
use crate::overrides::apply_overrides;
use crate::remap::{read_virtual_sectors, SectorFlagBuffer};
use crate::{sector_to_byte, sectors_for_bytes, SECTOR_SIZE};

/// Mount-time settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountConfig {
    /// Media ID reported in the media descriptor
    pub media_id: u32,
    /// Redirect reads of directory records relocated past 4 GiB
    pub fix_sector_overflow: bool,
}

/// Static media descriptor (mirrors `EFI_BLOCK_IO_MEDIA`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Media {
    pub media_id: u32,
    pub removable_media: bool,
    pub media_present: bool,
    pub logical_partition: bool,
    pub read_only: bool,
    pub write_caching: bool,
    pub block_size: u32,
    pub io_align: u32,
    pub last_block: u64,
    pub logical_blocks_per_physical_block: u32,
}

impl Media {
    fn new(media_id: u32, size_bytes: u64) -> Self {
        Self {
            media_id,
            removable_media: false,
            media_present: true,
            logical_partition: false,
            read_only: true,
            write_caching: false,
            block_size: SECTOR_SIZE as u32,
            io_align: 0,
            last_block: sectors_for_bytes(size_bytes) - 1,
            logical_blocks_per_physical_block: 1,
        }
    }

    /// Total number of 2048-byte blocks
    pub fn num_blocks(&self) -> u64 {
        self.last_block + 1
    }
}

/// Placeholder backing device for memdisk mounts
///
/// Uninhabited: a memdisk never has a raw device, so none of these can run.
#[derive(Debug, Clone, Copy)]
pub enum Detached {}

impl BlockIo for Detached {
    type Error = Infallible;

    fn block_size(&self) -> BlockSize {
        match *self {}
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        match *self {}
    }

    fn read_blocks(&mut self, _start_lba: Lba, _dst: &mut [u8]) -> Result<(), Self::Error> {
        match *self {}
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        match *self {}
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match *self {}
    }
}

/// Memdisk-only virtual disk
pub type MemDisk = VirtualDisk<Detached>;

enum Backing<B> {
    /// Image scattered over the raw device
    Chain {
        raw: B,
        chain: ImageChain,
        scratch: SectorFlagBuffer,
    },
    /// Whole disk in one memory region
    Memory(Vec<u8>),
}

/// Read-only virtual disk with 2048-byte sectors
pub struct VirtualDisk<B> {
    backing: Backing<B>,
    media: Media,
}

impl MemDisk {
    /// Serve the whole disk from `image`, one copy per read
    pub fn memdisk(image: Vec<u8>, config: &MountConfig) -> Result<Self, ChainError> {
        if image.is_empty() {
            return Err(ChainError::EmptyImage);
        }

        let media = Media::new(config.media_id, image.len() as u64);
        log::debug!("memdisk mounted: {} bytes, last block {}", image.len(), media.last_block);

        Ok(Self {
            backing: Backing::Memory(image),
            media,
        })
    }
}

impl<B: BlockIo> VirtualDisk<B> {
    /// Mount `chain` on top of the raw device `raw`
    pub fn from_chain(
        raw: B,
        chain: ImageChain,
        config: &MountConfig,
    ) -> Result<Self, DeviceError<B::Error>> {
        if raw.block_size().to_u64() != chain.disk_sector_size() as u64 {
            log::error!(
                "raw device has {}-byte sectors, chain expects {}",
                raw.block_size().to_u64(),
                chain.disk_sector_size()
            );
            return Err(ChainError::SectorSizeMismatch.into());
        }

        let media = Media::new(config.media_id, chain.virtual_image_size());
        log::debug!(
            "virtual disk mounted: image {} bytes, last block {}, overflow fixup {}",
            chain.real_image_size(),
            media.last_block,
            config.fix_sector_overflow
        );

        Ok(Self {
            backing: Backing::Chain {
                raw,
                chain,
                scratch: SectorFlagBuffer::new(),
            },
            media,
        })
    }

    /// Media descriptor
    pub fn media(&self) -> &Media {
        &self.media
    }

    /// Is the whole disk served from memory?
    pub fn is_memdisk(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    /// Chain tables, unless this is a memdisk
    pub fn chain(&self) -> Option<&ImageChain> {
        match &self.backing {
            Backing::Chain { chain, .. } => Some(chain),
            Backing::Memory(_) => None,
        }
    }

    /// Raw device under the chain, unless this is a memdisk
    pub fn raw(&self) -> Option<&B> {
        match &self.backing {
            Backing::Chain { raw, .. } => Some(raw),
            Backing::Memory(_) => None,
        }
    }

    /// Flags currently held by the sector flag scratch buffer
    pub fn scratch_capacity(&self) -> usize {
        match &self.backing {
            Backing::Chain { scratch, .. } => scratch.capacity(),
            Backing::Memory(_) => 0,
        }
    }

    /// Reset the device (nothing to do)
    pub fn reset(&mut self, _extended_verification: bool) -> Result<(), DeviceError<B::Error>> {
        Ok(())
    }

    /// Read `buffer.len() / 2048` sectors starting at `lba`
    pub fn read_blocks(
        &mut self,
        fixup: &mut OverflowFixup,
        lba: u64,
        buffer: &mut [u8],
    ) -> Result<(), DeviceError<B::Error>> {
        if buffer.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::BadBufferSize);
        }

        let count = (buffer.len() / SECTOR_SIZE) as u64;
        if count == 0 {
            return Ok(());
        }

        match lba.checked_add(count) {
            Some(end) if end <= self.media.num_blocks() => {}
            _ => {
                log::debug!(
                    "read of {} sectors at {} past last block {}",
                    count,
                    lba,
                    self.media.last_block
                );
                return Err(DeviceError::OutOfRange);
            }
        }

        match &mut self.backing {
            Backing::Memory(image) => {
                read_memdisk(image, lba, buffer);
                Ok(())
            }
            Backing::Chain {
                raw,
                chain,
                scratch,
            } => {
                let chain = &*chain;

                let sector = if fixup.is_active() {
                    fixup.adjust(lba, count, chain.overrides())
                } else {
                    lba
                };

                log::trace!("read sector {} count {}", sector, count);

                let end = sector_to_byte(sector) + buffer.len() as u64;
                if end <= chain.real_image_size() {
                    return read_image(chain, raw, fixup, sector, buffer);
                }

                read_virtual_sectors(chain, scratch, fixup, sector, buffer, |origin, buf, fixup| {
                    read_image(chain, raw, fixup, origin, buf)
                })
            }
        }
    }

    /// Writes are refused, nothing is touched
    pub fn write_blocks(&mut self, _lba: u64, _buffer: &[u8]) -> Result<(), DeviceError<B::Error>> {
        log::debug!("write to read-only virtual disk refused");
        Err(DeviceError::WriteProtected)
    }

    /// Flush (nothing to do)
    pub fn flush_blocks(&mut self) -> Result<(), DeviceError<B::Error>> {
        Ok(())
    }

    /// Pair the disk with its fixup state as a `gpt_disk_io::BlockIo`
    pub fn bind<'a>(&'a mut self, fixup: &'a mut OverflowFixup) -> BoundDisk<'a, B> {
        BoundDisk { disk: self, fixup }
    }
}

/// Image sectors through the chunk mapper, then the overrides on top
fn read_image<B: BlockIo>(
    chain: &ImageChain,
    raw: &mut B,
    fixup: &mut OverflowFixup,
    sector: u64,
    buffer: &mut [u8],
) -> Result<(), DeviceError<B::Error>> {
    read_image_sectors(chain, raw, sector, buffer)?;
    apply_overrides(chain.overrides(), sector_to_byte(sector), buffer, |ov| {
        fixup.observe(ov)
    });
    Ok(())
}

/// Bulk copy; a trailing partial sector reads as zero padded
fn read_memdisk(image: &[u8], lba: u64, buffer: &mut [u8]) {
    let start = (sector_to_byte(lba) as usize).min(image.len());
    let available = (image.len() - start).min(buffer.len());

    buffer[..available].copy_from_slice(&image[start..start + available]);
    buffer[available..].fill(0);
}

/// A virtual disk together with its fixup state
///
/// Exists so consumers that only know `gpt_disk_io::BlockIo` can read the
/// disk without the fixup state becoming global.
pub struct BoundDisk<'a, B> {
    disk: &'a mut VirtualDisk<B>,
    fixup: &'a mut OverflowFixup,
}

impl<'a, B: BlockIo> BoundDisk<'a, B> {
    /// Media descriptor of the bound disk
    pub fn media(&self) -> &Media {
        self.disk.media()
    }
}

impl<'a, B: BlockIo> BlockIo for BoundDisk<'a, B> {
    type Error = DeviceError<B::Error>;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(SECTOR_SIZE as u32).unwrap_or(BlockSize::BS_512)
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok(self.disk.media().num_blocks())
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.disk.read_blocks(self.fixup, start_lba.0, dst)
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> Result<(), Self::Error> {
        self.disk.write_blocks(start_lba.0, src)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.disk.flush_blocks()
    }
}
