//! Device identity
//!
//! The virtual disk shows up in the firmware device tree as a single
//! hardware vendor node followed by an end node:
//!
//! ```text
//! ┌──────┬─────────┬────────┬──────────┬──────────────────┐┌──────┬──────┬────────┐
//! │ 0x01 │ 0x04    │ len LE │ GUID(16) │ UTF-16LE name\0  ││ 0x7F │ 0xFF │ 4, 0   │
//! └──────┴─────────┴────────┴──────────┴──────────────────┘└──────┴──────┴────────┘
//!   hardware, vendor                                          end of entire path
//! ```
//!
//! Other code recognizes the disk by comparing the first
//! [`compare_len`](DevicePath::compare_len) bytes of a path.

use alloc::vec::Vec;

use uguid::{guid, Guid};

/// Hardware device path type
pub const TYPE_HARDWARE: u8 = 0x01;
/// Vendor-defined hardware subtype
pub const SUBTYPE_VENDOR: u8 = 0x04;
/// End-of-path type
pub const TYPE_END: u8 = 0x7F;
/// End of the entire path
pub const SUBTYPE_END_ENTIRE: u8 = 0xFF;

/// Node header plus vendor GUID
pub const VENDOR_NODE_HEADER_SIZE: usize = 4 + 16;
const END_NODE_SIZE: usize = 4;

/// GUID identifying the virtual disk's vendor node
pub const VDISK_DEVICE_PATH_GUID: Guid = guid!("7c5a1e8b-4d2f-4f0a-9b3e-6d8c2a41f9e5");

/// Name carried in the vendor node
pub const VDISK_DEVICE_PATH_NAME: &str = "morpheus_vdisk";

/// Encoded device path of the virtual disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePath {
    bytes: Vec<u8>,
    compare_len: usize,
}

impl DevicePath {
    /// Build the vendor node for `guid` and `name`, then the end node
    ///
    /// Returns `None` if the node would not fit a 16-bit length.
    pub fn vendor(guid: Guid, name: &str) -> Option<Self> {
        let mut name_bytes: Vec<u8> = name
            .encode_utf16()
            .chain(core::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect();

        let node_len = VENDOR_NODE_HEADER_SIZE + name_bytes.len();
        let node_len_le = u16::try_from(node_len).ok()?.to_le_bytes();

        let mut bytes = Vec::with_capacity(node_len + END_NODE_SIZE);
        bytes.extend_from_slice(&[TYPE_HARDWARE, SUBTYPE_VENDOR]);
        bytes.extend_from_slice(&node_len_le);
        bytes.extend_from_slice(&guid.to_bytes());
        bytes.append(&mut name_bytes);
        bytes.extend_from_slice(&[TYPE_END, SUBTYPE_END_ENTIRE, END_NODE_SIZE as u8, 0]);

        Some(Self {
            bytes,
            compare_len: node_len,
        })
    }

    /// Path of the virtual disk
    pub fn vdisk() -> Self {
        match Self::vendor(VDISK_DEVICE_PATH_GUID, VDISK_DEVICE_PATH_NAME) {
            Some(path) => path,
            None => unreachable!("vdisk device path name fits a node"),
        }
    }

    /// Encoded path including the end node
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes that identify the disk (the whole vendor node)
    pub fn compare_len(&self) -> usize {
        self.compare_len
    }

    /// Does `other` start with this disk's vendor node?
    pub fn matches(&self, other: &[u8]) -> bool {
        other.len() >= self.compare_len && other[..self.compare_len] == self.bytes[..self.compare_len]
    }
}
