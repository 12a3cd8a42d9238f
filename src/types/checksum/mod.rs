#![forbid(unsafe_code)]

use crc32fast::Hasher;

/// Checksum of a journaled page image, bound to the page it belongs to so a
/// frame replayed at the wrong offset is rejected.
pub fn page_crc32(page: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Checksum of a fixed-size header, computed as if its own 4-byte checksum
/// field at `crc_range` held zeroes.
pub fn header_crc32(header: &[u8], crc_range: std::ops::Range<usize>) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&header[..crc_range.start]);
    hasher.update(&[0u8; 4][..crc_range.len()]);
    hasher.update(&header[crc_range.end..]);
    hasher.finalize()
}
