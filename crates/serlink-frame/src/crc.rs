//! CRC-8/ATM: polynomial 0x07, initial value 0, no reflection, no final XOR.

/// Generator polynomial (x^8 + x^2 + x + 1).
pub const CRC8_POLY: u8 = 0x07;

/// CRC8 of `data`.
pub fn crc8(data: &[u8]) -> u8 {
    crc8_update(0, data)
}

/// Continue a running CRC8 over more bytes.
pub fn crc8_update(mut crc: u8, data: &[u8]) -> u8 {
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}
