//! Virtual disk error types
//!
//! Same shape as `IsoError`: plain enums with a `const fn as_str()`.
//! `DeviceError` additionally carries the backing device's own error so a
//! failed physical read reaches the caller unchanged.

use core::fmt;

/// Rejected image chain tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    /// Underlying sector size is not 512, 1024 or 2048
    UnsupportedSectorSize,
    /// Chain and raw device disagree on the sector size
    SectorSizeMismatch,
    /// Real image size is zero
    EmptyImage,
    /// Chunk with end sector before start sector
    InvalidChunk,
    /// Two chunks map the same image sector
    OverlappingChunks,
    /// An image sector is not mapped by any chunk
    UncoveredSector,
    /// Two overrides patch the same byte
    OverlappingOverrides,
    /// Extent range with end before start
    InvalidExtent,
    /// Two extent ranges claim the same virtual sector
    OverlappingExtents,
    /// Extent range starts inside the nominal image
    ExtentInsideImage,
    /// Memory extent reaches past the memory region
    ExtentOutOfBounds,
    /// Remap origin reaches past the nominal image
    RemapOutOfImage,
    /// Explicit virtual size smaller than the content it must hold
    VirtualSizeTooSmall,
    /// Explicit virtual size is not a whole number of sectors
    UnalignedVirtualSize,
}

impl ChainError {
    /// Get a human-readable description of the error
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedSectorSize => "Unsupported underlying sector size",
            Self::SectorSizeMismatch => "Chain sector size does not match device",
            Self::EmptyImage => "Image size is zero",
            Self::InvalidChunk => "Chunk end precedes chunk start",
            Self::OverlappingChunks => "Image chunks overlap",
            Self::UncoveredSector => "Image sector not covered by any chunk",
            Self::OverlappingOverrides => "Override ranges overlap",
            Self::InvalidExtent => "Virtual extent range is inverted",
            Self::OverlappingExtents => "Virtual extents overlap",
            Self::ExtentInsideImage => "Virtual extent starts inside the image",
            Self::ExtentOutOfBounds => "Memory extent beyond memory region",
            Self::RemapOutOfImage => "Remap origin beyond the image",
            Self::VirtualSizeTooSmall => "Virtual size smaller than its content",
            Self::UnalignedVirtualSize => "Virtual size not a multiple of 2048",
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the virtual block device
///
/// `E` is the error type of the backing `BlockIo` (or of the firmware host
/// for driver attachment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError<E> {
    /// Backing read failed, error passed through untouched
    Io(E),
    /// Sector flag scratch buffer could not grow
    OutOfResources,
    /// Any write attempt
    WriteProtected,
    /// No driver matched the requested name
    NotFound,
    /// Buffer length is not a multiple of the sector size
    BadBufferSize,
    /// Requested sectors lie past the last block of the device
    OutOfRange,
    /// Image chain rejected at mount
    InvalidChain(ChainError),
}

impl<E> DeviceError<E> {
    /// Get a human-readable description of the error
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Io(_) => "Block I/O operation failed",
            Self::OutOfResources => "Out of resources",
            Self::WriteProtected => "Device is write protected",
            Self::NotFound => "Driver not found",
            Self::BadBufferSize => "Buffer size not a multiple of 2048",
            Self::OutOfRange => "Read beyond last block",
            Self::InvalidChain(e) => e.as_str(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for DeviceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{}: {}", self.as_str(), e),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl<E> From<ChainError> for DeviceError<E> {
    fn from(e: ChainError) -> Self {
        Self::InvalidChain(e)
    }
}
