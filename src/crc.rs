//! CRC7 as used by the SD command line and the CID/CSD registers

/// CRC7 lookup table. Entries are kept shifted left by one so the table can
/// be indexed with `crc ^ byte` directly.
pub static CRC7_TABLE: [u8; 256] = crc7_table();

const fn crc7_table() -> [u8; 256] {
    // x^7 + x^3 + 1 (0x89) shifted into the top seven bits
    const POLY: u8 = 0x12;

    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC7 of `bytes`, returned in bits 7:1 like it sits on the wire
pub fn crc7(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |crc, byte| CRC7_TABLE[(crc ^ byte) as usize])
}

/// CRC7 of the first 15 bytes of a CID or CSD given as response words,
/// most significant word first
pub fn crc7_of_register(words: &[u32; 4]) -> u8 {
    let mut bytes = [0u8; 16];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }

    crc7(&bytes[..15])
}
