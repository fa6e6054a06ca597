//! ISO9660 directory-record sector overflow fixup
//!
//! Some PE loaders keep directory-record extent locations in a field that
//! wraps at [`SECTOR_OVERFLOW`] sectors (4 GiB). When the image builder moves
//! a file past that point it patches the record with an override carrying the
//! true location; the loader then asks for `first_sector - SECTOR_OVERFLOW`.
//! This state machine notices the patched record going by and shifts the
//! following run of reads back to where the data really is.
//!
//! ```text
//!          record with first_sector >= 2097152 applied
//!   Idle ─────────────────────────────────────────────► Armed
//!    ▲  ◄── read names a record's first_sector directly ──┘ │
//!    │                                                       │ read at first_sector - 2097152
//!    │              run complete                             ▼
//!    └──────────────────────────────────────────────── Running
//! ```

use crate::chain::OverrideChunk;
use crate::{sectors_for_bytes, SECTOR_OVERFLOW};

/// Size of a directory-record override
pub const DIRENT_OVERRIDE_SIZE: usize = 16;

/// Extent location and data length of a patched directory record
///
/// Layout matches bytes 2..18 of an ISO9660 directory record: both-endian
/// extent LBA followed by both-endian data length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentOverride {
    /// Extent location (little-endian half)
    pub first_sector: u32,
    /// Data length in bytes (little-endian half)
    pub size: u32,
}

impl DirentOverride {
    /// Parse a 16-byte override payload
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != DIRENT_OVERRIDE_SIZE {
            return None;
        }
        Some(Self {
            first_sector: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Encode as both-endian record fields
    pub fn to_bytes(&self) -> [u8; DIRENT_OVERRIDE_SIZE] {
        let mut out = [0u8; DIRENT_OVERRIDE_SIZE];
        out[0..4].copy_from_slice(&self.first_sector.to_le_bytes());
        out[4..8].copy_from_slice(&self.first_sector.to_be_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    /// Sectors the extent occupies
    pub fn sectors(&self) -> u64 {
        sectors_for_bytes(self.size as u64)
    }

    /// Does the record point past the overflow threshold?
    pub fn overflows(&self) -> bool {
        self.first_sector as u64 >= SECTOR_OVERFLOW
    }
}

/// Every override that looks like a directory record
fn dirent_records(overrides: &[OverrideChunk]) -> impl Iterator<Item = DirentOverride> + '_ {
    overrides.iter().filter_map(|ov| DirentOverride::parse(&ov.data))
}

/// Fixup machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupState {
    /// Reads pass through untouched
    Idle,
    /// An overflowing record was served; waiting for the first read of its run
    Armed,
    /// Redirecting a run
    Running {
        /// Sectors redirected so far
        current: u64,
        /// Sectors in the run
        total: u64,
    },
}

/// Per-image overflow fixup state
///
/// Owned by whoever mounts the image and handed to every read, so one image
/// has exactly one machine.
#[derive(Debug, Clone)]
pub struct OverflowFixup {
    enabled: bool,
    state: FixupState,
}

impl OverflowFixup {
    /// Create an idle machine; a disabled one never arms
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: FixupState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> FixupState {
        self.state
    }

    /// Whether detection is switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Does the next read need to go through [`adjust`](Self::adjust)?
    pub fn is_active(&self) -> bool {
        !matches!(self.state, FixupState::Idle)
    }

    /// Detection hook, called for every override applied to a read
    pub fn observe(&mut self, ov: &OverrideChunk) {
        if !self.enabled || matches!(self.state, FixupState::Running { .. }) {
            return;
        }

        if let Some(record) = DirentOverride::parse(&ov.data) {
            if record.overflows() {
                log::debug!(
                    "sector overflow fixup armed: record at byte {} -> sector {} ({} bytes)",
                    ov.image_byte_offset,
                    record.first_sector,
                    record.size
                );
                self.state = FixupState::Armed;
            }
        }
    }

    /// Translate the start sector of a read of `count` sectors
    pub fn adjust(&mut self, sector: u64, count: u64, overrides: &[OverrideChunk]) -> u64 {
        match self.state {
            FixupState::Idle => sector,
            FixupState::Running { current, total } => {
                let current = current + count;
                self.state = if current >= total {
                    log::debug!("sector overflow fixup: run of {} sectors done", total);
                    FixupState::Idle
                } else {
                    FixupState::Running { current, total }
                };
                self.redirect(sector)
            }
            FixupState::Armed => {
                if dirent_records(overrides).any(|r| r.first_sector as u64 == sector) {
                    log::debug!("sector overflow fixup: direct read of sector {}", sector);
                    self.state = FixupState::Idle;
                    return sector;
                }

                let wrapped = sector + SECTOR_OVERFLOW;
                let Some(record) = dirent_records(overrides).find(|r| r.first_sector as u64 == wrapped)
                else {
                    return sector;
                };

                let total = record.sectors();
                self.state = if count >= total {
                    FixupState::Idle
                } else {
                    FixupState::Running {
                        current: count,
                        total,
                    }
                };
                log::debug!(
                    "sector overflow fixup: redirecting {} sectors from {} to {}",
                    total,
                    sector,
                    wrapped
                );
                self.redirect(sector)
            }
        }
    }

    #[inline]
    fn redirect(&self, sector: u64) -> u64 {
        #[cfg(feature = "fixup_debug")]
        log::trace!("sector overflow fixup: {} -> {}", sector, sector + SECTOR_OVERFLOW);
        sector + SECTOR_OVERFLOW
    }
}
