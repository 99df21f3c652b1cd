//! Bit manipulation and byte-order helpers.
//!
//! The transcoding functions [`convert_2byte`] and [`convert_4byte`] move
//! field bytes between the canonical big-endian order and one of the four
//! wire orders described by [`Endian`]. Each conversion is its own inverse.
//!
//! | Endian | 2 bytes `[a b]` | 4 bytes `[a b c d]` |
//! |--------|-----------------|---------------------|
//! | `BE`   | `[a b]` | `[a b c d]` |
//! | `LE`   | `[b a]` | `[d c b a]` |
//! | `BEBS` | `[b a]` | `[b a d c]` |
//! | `LEBS` | `[a b]` | `[c d a b]` |
//!
//! # Example
//!
//! ```
//! use pipeline_interlock::Endian;
//! use pipeline_interlock::utils::{convert_4byte, format_bytes};
//!
//! let wire = convert_4byte([0x11, 0x22, 0x33, 0x44], Endian::LEBS);
//! assert_eq!(wire, [0x33, 0x44, 0x11, 0x22]);
//! assert_eq!(convert_4byte(wire, Endian::LEBS), [0x11, 0x22, 0x33, 0x44]);
//! assert_eq!(format_bytes(&wire), "33 44 11 22");
//! ```

use crate::datatype::Endian;

/// Mask selecting bit `bit` (0-7) of a byte.
#[inline]
pub fn bit_mask(bit: u8) -> u8 {
    1 << (bit & 7)
}

/// Gets a single bit from a byte using a precomputed mask.
#[inline]
pub fn get_masked(byte: u8, mask: u8) -> bool {
    byte & mask != 0
}

/// Sets or clears the bits of `mask` in `byte`.
///
/// # Example
///
/// ```
/// use pipeline_interlock::utils::set_masked;
///
/// assert_eq!(set_masked(0b0000_0001, 0b1000_0000, true), 0b1000_0001);
/// assert_eq!(set_masked(0b1000_0001, 0b0000_0001, false), 0b1000_0000);
/// ```
#[inline]
pub fn set_masked(byte: u8, mask: u8, state: bool) -> u8 {
    if state {
        byte | mask
    } else {
        byte & !mask
    }
}

/// Converts a 2-byte field between canonical big-endian and `endian`.
#[inline]
pub fn convert_2byte(bytes: [u8; 2], endian: Endian) -> [u8; 2] {
    let [a, b] = bytes;
    match endian {
        Endian::BE | Endian::LEBS => [a, b],
        Endian::LE | Endian::BEBS => [b, a],
    }
}

/// Converts a 4-byte field between canonical big-endian and `endian`.
#[inline]
pub fn convert_4byte(bytes: [u8; 4], endian: Endian) -> [u8; 4] {
    let [a, b, c, d] = bytes;
    match endian {
        Endian::BE => [a, b, c, d],
        Endian::LE => [d, c, b, a],
        Endian::BEBS => [b, a, d, c],
        Endian::LEBS => [c, d, a, b],
    }
}

/// Formats bytes as space-separated upper-case hex.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats a 16-bit word as hexadecimal.
pub fn format_hex(value: u16) -> String {
    format!("0x{:04X}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Endian; 4] = [Endian::BE, Endian::LE, Endian::BEBS, Endian::LEBS];

    #[test]
    fn test_bit_mask() {
        assert_eq!(bit_mask(0), 0x01);
        assert_eq!(bit_mask(7), 0x80);
    }

    #[test]
    fn test_masked_roundtrip_all_bits() {
        for bit in 0..8 {
            let mask = bit_mask(bit);
            for byte in [0x00u8, 0xFF, 0xA5] {
                let set = set_masked(byte, mask, true);
                assert!(get_masked(set, mask));
                assert_eq!(set & !mask, byte & !mask);
                let cleared = set_masked(byte, mask, false);
                assert!(!get_masked(cleared, mask));
                assert_eq!(cleared & !mask, byte & !mask);
            }
        }
    }

    #[test]
    fn test_convert_2byte_table() {
        assert_eq!(convert_2byte([1, 2], Endian::BE), [1, 2]);
        assert_eq!(convert_2byte([1, 2], Endian::LE), [2, 1]);
        assert_eq!(convert_2byte([1, 2], Endian::BEBS), [2, 1]);
        assert_eq!(convert_2byte([1, 2], Endian::LEBS), [1, 2]);
    }

    #[test]
    fn test_convert_4byte_table() {
        assert_eq!(convert_4byte([1, 2, 3, 4], Endian::BE), [1, 2, 3, 4]);
        assert_eq!(convert_4byte([1, 2, 3, 4], Endian::LE), [4, 3, 2, 1]);
        assert_eq!(convert_4byte([1, 2, 3, 4], Endian::BEBS), [2, 1, 4, 3]);
        assert_eq!(convert_4byte([1, 2, 3, 4], Endian::LEBS), [3, 4, 1, 2]);
    }

    #[test]
    fn test_conversions_are_involutions() {
        let samples2 = [[0x00, 0x00], [0x12, 0x34], [0xFF, 0x01]];
        let samples4 = [[0u8; 4], [0x12, 0x34, 0x56, 0x78], [0xDE, 0xAD, 0xBE, 0xEF]];
        for endian in ALL {
            for s in samples2 {
                assert_eq!(convert_2byte(convert_2byte(s, endian), endian), s, "{endian}");
            }
            for s in samples4 {
                assert_eq!(convert_4byte(convert_4byte(s, endian), endian), s, "{endian}");
            }
        }
    }

    #[test]
    fn test_le_matches_native_little_endian() {
        let v: u32 = 0x1234_5678;
        assert_eq!(convert_4byte(v.to_be_bytes(), Endian::LE), v.to_le_bytes());
        let w: u16 = 0xBEEF;
        assert_eq!(convert_2byte(w.to_be_bytes(), Endian::LE), w.to_le_bytes());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(&[0x01, 0xAB]), "01 AB");
        assert_eq!(format_bytes(&[]), "");
        assert_eq!(format_hex(0x00FF), "0x00FF");
    }
}
