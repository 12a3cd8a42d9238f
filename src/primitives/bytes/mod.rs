#![forbid(unsafe_code)]
//! Big-endian integer helpers and byte-pattern utilities shared by the
//! record formats.

pub mod ord {
    //! Order-preserving big-endian encoders.
    //!
    //! All helpers panic when the slice is too short; callers size their
    //! buffers from fixed record layouts.

    const U32_LEN: usize = core::mem::size_of::<u32>();
    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Writes `v` big-endian into the first four bytes of `dst`.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        assert!(dst.len() >= U32_LEN, "destination too small");
        dst[..U32_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32 from the first four bytes of `src`.
    pub fn get_u32_be(src: &[u8]) -> u32 {
        assert!(src.len() >= U32_LEN, "u32 source shorter than 4 bytes");
        let mut bytes = [0u8; U32_LEN];
        bytes.copy_from_slice(&src[..U32_LEN]);
        u32::from_be_bytes(bytes)
    }

    /// Writes `v` big-endian into the first eight bytes of `dst`.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u64 from the first eight bytes of `src`.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        assert!(src.len() >= U64_LEN, "u64 source shorter than 8 bytes");
        let mut bytes = [0u8; U64_LEN];
        bytes.copy_from_slice(&src[..U64_LEN]);
        u64::from_be_bytes(bytes)
    }

    /// Writes a signed id as its two's complement big-endian bytes.
    pub fn put_i32_be(dst: &mut [u8], v: i32) {
        put_u32_be(dst, v as u32);
    }

    /// Reads a signed id written by [`put_i32_be`].
    pub fn get_i32_be(src: &[u8]) -> i32 {
        get_u32_be(src) as i32
    }
}

/// Returns true when every bit selected by `mask` has the value `pattern`
/// holds at the same position.
pub fn matches_pattern(value: &[u8], mask: &[u8], pattern: &[u8]) -> bool {
    value
        .iter()
        .zip(mask)
        .zip(pattern)
        .all(|((v, m), p)| v & m == p & m)
}
