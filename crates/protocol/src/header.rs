//! Low-level layout constants and scalar read/write helpers shared by every
//! record's codec implementation.

/// Every record on the wire begins with an 8-byte-aligned, fixed-size
/// header of this length; `WRITE`, `SPILL`, and `OBJECT` records append a
/// variable-length payload immediately after it.
pub const HEADER_LEN: usize = 320;

/// Number of bytes in the header reserved for the common `type`/`payload_len`
/// prefix before the per-kind union area begins.
pub const PREFIX_LEN: usize = 8;

/// Sentinel written into [`crate::record::BeginRecord::magic`] on a stream
/// produced on this host's native endianness. A receiver that reads the
/// byte-reversed pattern knows every subsequent scalar field needs
/// swapping.
pub const STREAM_MAGIC: u64 = 0x2f5b_0787_4361_5265;

/// Rounds `len` up to the next multiple of 8, the alignment every record
/// and its trailing payload must satisfy.
#[must_use]
pub const fn round_up_8(len: usize) -> usize {
    (len + 7) & !7
}

pub(crate) fn read_u64(buf: &[u8], offset: usize, swap: bool) -> u64 {
    let bytes: [u8; 8] = buf[offset..offset + 8].try_into().expect("8-byte slice");
    let value = u64::from_le_bytes(bytes);
    if swap {
        value.swap_bytes()
    } else {
        value
    }
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32(buf: &[u8], offset: usize, swap: bool) -> u32 {
    let bytes: [u8; 4] = buf[offset..offset + 4].try_into().expect("4-byte slice");
    let value = u32::from_le_bytes(bytes);
    if swap {
        value.swap_bytes()
    } else {
        value
    }
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_8_rounds_correctly() {
        assert_eq!(round_up_8(0), 0);
        assert_eq!(round_up_8(1), 8);
        assert_eq!(round_up_8(8), 8);
        assert_eq!(round_up_8(9), 16);
    }

    #[test]
    fn u64_roundtrip_with_swap() {
        let mut buf = [0u8; 8];
        write_u64(&mut buf, 0, 0x0102_0304_0506_0708);
        assert_eq!(read_u64(&buf, 0, false), 0x0102_0304_0506_0708);
        assert_eq!(read_u64(&buf, 0, true), 0x0807_0605_0403_0201);
    }
}
