//! File-open redirection
//!
//! The image builder can ask for up to four file names to be swapped for a
//! file assembled in a virtual extent. The request arrives as a packed table:
//!
//! ```text
//! offset  size  field
//! 0       4     magic (0x1258BEEF, little-endian)
//! 4       1024  4 x 256-byte NUL-terminated names
//! 1028    4     virtual_id (index into the extent table)
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::chain::ImageChain;
use crate::sector_to_byte;

/// Magic marking a valid table
pub const FILE_REPLACE_MAGIC: u32 = 0x1258_BEEF;

/// Names per table
pub const MAX_OLD_NAMES: usize = 4;

/// Width of one name slot
pub const NAME_SLOT_SIZE: usize = 256;

/// Size of the packed table
pub const FILE_REPLACE_SIZE: usize = 4 + MAX_OLD_NAMES * NAME_SLOT_SIZE + 4;

/// Parsed redirection table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReplace {
    /// Names to redirect (empty slots dropped)
    pub old_names: Vec<String>,
    /// Extent holding the replacement file
    pub virtual_id: u32,
}

/// Where a redirected file lives on the virtual disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacedFile {
    /// First virtual sector
    pub sector_start: u64,
    /// Sector count
    pub sectors: u64,
    /// File size reported to the opener
    pub size_bytes: u64,
}

impl FileReplace {
    /// Parse the packed table; `None` on short input or wrong magic
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FILE_REPLACE_SIZE {
            return None;
        }

        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != FILE_REPLACE_MAGIC {
            return None;
        }

        let old_names = data[4..4 + MAX_OLD_NAMES * NAME_SLOT_SIZE]
            .chunks_exact(NAME_SLOT_SIZE)
            .filter_map(slot_name)
            .collect();

        let id = &data[FILE_REPLACE_SIZE - 4..FILE_REPLACE_SIZE];
        Some(Self {
            old_names,
            virtual_id: u32::from_le_bytes([id[0], id[1], id[2], id[3]]),
        })
    }

    /// Resolve `name` against the table
    ///
    /// Names compare exactly. A `virtual_id` outside the extent table
    /// disables the whole table.
    pub fn lookup(&self, name: &str, chain: &ImageChain) -> Option<ReplacedFile> {
        if !self.old_names.iter().any(|n| n == name) {
            return None;
        }

        let Some((sector_start, sectors)) = chain.extent_span(self.virtual_id as usize) else {
            log::debug!(
                "file replace: virtual id {} out of range ({} extents)",
                self.virtual_id,
                chain.extents().len()
            );
            return None;
        };

        let file = ReplacedFile {
            sector_start,
            sectors,
            size_bytes: sector_to_byte(sectors),
        };
        log::debug!(
            "file replace: {} -> sector {} ({} sectors, {} bytes)",
            name,
            file.sector_start,
            file.sectors,
            file.size_bytes
        );
        Some(file)
    }
}

/// Name stored in one slot, up to the first NUL
fn slot_name(slot: &[u8]) -> Option<String> {
    let len = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    if len == 0 {
        return None;
    }
    core::str::from_utf8(&slot[..len]).ok().map(String::from)
}
