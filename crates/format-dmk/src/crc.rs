//! CRC-16/CCITT as computed by the WD1793 floppy controller.
//!
//! Polynomial 0x1021, seed 0xFFFF, bits shifted in MSB-first. The
//! pre-folded constants cover the address-mark prefixes the controller
//! clocks through before the bytes a caller normally sees.

pub const CRC_RESET: u16 = 0xFFFF;

/// CRC after the two-byte 0xA1 0xA1 sync run.
pub const CRC_RESET_A1_A1: u16 = 0x968B;

/// CRC after the full double-density 0xA1 0xA1 0xA1 sync run.
pub const CRC_RESET_A1_A1_A1: u16 = 0xCDB4;

/// CRC after 0xA1 0xA1 0xA1 0xFE, i.e. a double-density IDAM.
pub const CRC_RESET_A1_A1_A1_FE: u16 = 0xB230;

/// CRC after a bare 0xFE, i.e. a single-density IDAM.
pub const CRC_RESET_FE: u16 = 0xEF21;

#[must_use]
pub fn step(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ (u16::from(byte) << 8);
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ 0x1021;
        } else {
            crc <<= 1;
        }
    }
    crc
}

#[must_use]
pub fn over(mut crc: u16, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc = step(crc, b);
    }
    crc
}
