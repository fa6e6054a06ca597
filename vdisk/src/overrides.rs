//! Override Engine
//!
//! Lays registered byte-range patches over freshly read image data. Runs
//! after the physical read so a patch always wins over the bytes on disk,
//! and also over zero-filled sectors past the end of the image.

use crate::chain::OverrideChunk;

/// Patch `buffer`, which holds image bytes starting at `read_start`
///
/// `on_applied` sees every override that touched the buffer, in table order.
pub fn apply_overrides<F>(
    overrides: &[OverrideChunk],
    read_start: u64,
    buffer: &mut [u8],
    mut on_applied: F,
) where
    F: FnMut(&OverrideChunk),
{
    let read_end = read_start + buffer.len() as u64;

    for ov in overrides {
        let ov_start = ov.image_byte_offset;
        let ov_end = ov.end();

        if ov_start == ov_end || ov_start >= read_end || read_start >= ov_end {
            continue;
        }

        let lo = ov_start.max(read_start);
        let hi = ov_end.min(read_end);

        let dst = (lo - read_start) as usize..(hi - read_start) as usize;
        let src = (lo - ov_start) as usize..(hi - ov_start) as usize;
        buffer[dst].copy_from_slice(&ov.data[src]);

        on_applied(ov);
    }
}
