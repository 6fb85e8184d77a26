//! Common Utilities
//!
//! Bit vector, CRC and slot timing helpers shared across the uplink PHY.
//! Bit vectors hold one bit per byte (0 or 1), MSB first.

use crate::types::SubcarrierSpacing;
use bytes::{BufMut, Bytes, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// CRC generator polynomials from TS 38.212 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolynomial {
    /// gCRC24A, transport blocks larger than 3824 bits
    Crc24A,
    /// gCRC24B, code blocks of a segmented transport block
    Crc24B,
    /// gCRC16, small transport blocks
    Crc16,
}

impl CrcPolynomial {
    /// Generator including the leading term
    fn generator(&self) -> u32 {
        match self {
            CrcPolynomial::Crc24A => 0x1864CFB,
            CrcPolynomial::Crc24B => 0x1800063,
            CrcPolynomial::Crc16 => 0x11021,
        }
    }

    /// Number of parity bits
    pub fn len(&self) -> usize {
        match self {
            CrcPolynomial::Crc24A | CrcPolynomial::Crc24B => 24,
            CrcPolynomial::Crc16 => 16,
        }
    }
}

/// Calculate the CRC of a bit vector
pub fn crc_bits(bits: &[u8], poly: CrcPolynomial) -> u32 {
    let width = poly.len() as u32;
    let mask = (1u32 << width) - 1;
    let generator = poly.generator() & mask;
    let mut crc: u32 = 0;

    for &bit in bits {
        let feedback = ((crc >> (width - 1)) ^ bit as u32) & 1;
        crc = (crc << 1) & mask;
        if feedback != 0 {
            crc ^= generator;
        }
    }

    crc
}

/// Append the CRC parity bits to a bit vector
pub fn attach_crc(bits: &mut Vec<u8>, poly: CrcPolynomial) {
    let crc = crc_bits(bits, poly);
    for i in (0..poly.len()).rev() {
        bits.push(((crc >> i) & 1) as u8);
    }
}

/// Check a bit vector whose trailing bits carry its CRC
pub fn check_crc(bits_with_crc: &[u8], poly: CrcPolynomial) -> bool {
    if bits_with_crc.len() < poly.len() {
        return false;
    }

    let (payload, parity) = bits_with_crc.split_at(bits_with_crc.len() - poly.len());
    let received = parity
        .iter()
        .fold(0u32, |acc, &bit| (acc << 1) | (bit & 1) as u32);

    crc_bits(payload, poly) == received
}

/// Pack bits into bytes (MSB first)
pub fn pack_bits(bits: &[u8]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            byte |= (bit & 1) << (7 - i);
        }
        bytes.put_u8(byte);
    }

    bytes.freeze()
}

/// Unpack bytes into bits (MSB first)
pub fn unpack_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }

    bits
}

/// Time utilities for slot/frame calculations
pub mod time {
    use super::SubcarrierSpacing;

    /// Slot duration in microseconds
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,
            SubcarrierSpacing::Scs30 => 500,
            SubcarrierSpacing::Scs60 => 250,
            SubcarrierSpacing::Scs120 => 125,
            SubcarrierSpacing::Scs240 => 62,     // 62.5 us, rounded down
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_crc_detects_corruption() {
        let mut bits = unpack_bits(b"Hello");
        attach_crc(&mut bits, CrcPolynomial::Crc24A);
        assert_eq!(bits.len(), 40 + 24);
        assert!(check_crc(&bits, CrcPolynomial::Crc24A));

        bits[3] ^= 1;
        assert!(!check_crc(&bits, CrcPolynomial::Crc24A));
    }

    #[test]
    fn test_crc_polynomials_differ() {
        let bits = unpack_bits(&[0xA5, 0x5A, 0xFF]);
        let a = crc_bits(&bits, CrcPolynomial::Crc24A);
        let b = crc_bits(&bits, CrcPolynomial::Crc24B);
        assert_ne!(a, b);
        assert_eq!(a & 0xFFFFFF, a);
        assert!(crc_bits(&bits, CrcPolynomial::Crc16) <= 0xFFFF);
    }

    #[test]
    fn test_crc_too_short() {
        assert!(!check_crc(&[1, 0, 1], CrcPolynomial::Crc16));
    }

    #[test]
    fn test_bit_packing() {
        let bits = vec![1, 0, 1, 0, 1, 0, 1, 0];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA); // 10101010

        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..8], bits[..]);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs15), 1000);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs30), 500);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs240), 62);
    }
}
