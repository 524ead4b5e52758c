//! Ogg CRC-32 checksum
//!
//! Ogg pages carry a CRC-32 with parameters that differ from the common
//! (reflected) IEEE variant: polynomial 0x04C11DB7, MSB-first, zero initial
//! value, and no final XOR. The checksum covers the entire page with the
//! checksum field itself set to zero.

/// Generator polynomial for the Ogg page checksum
const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Lookup table, one entry per byte value
static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ POLYNOMIAL
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// Feed `data` into a running checksum and return the new value.
pub fn update(crc: u32, data: &[u8]) -> u32 {
    let mut crc = crc;
    for &byte in data {
        crc = (crc << 8) ^ TABLE[(((crc >> 24) as u8) ^ byte) as usize];
    }
    crc
}

/// Checksum a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    update(0, data)
}
