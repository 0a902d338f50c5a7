//! Participant and message-ID checksums.
//!
//! JAM keys names and MSGIDs by the standard CRC-32 of the ASCII-lowercased
//! string, bit-inverted after the standard CRC-32 is finalized. Only `A..=Z` are
//! folded; every other byte, including non-ASCII UTF-8 sequences, is hashed as-is.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum stored for an absent MSGID or REPLYID.
pub const NO_CRC: u32 = 0xFFFF_FFFF;

/// Case-folded, bit-inverted CRC-32 of `s`.
pub fn checksum_of(s: &str) -> u32 {
    checksum_of_bytes(s.as_bytes())
}

/// Byte-level variant of [`checksum_of`].
pub fn checksum_of_bytes(bytes: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    for chunk in bytes.chunks(256) {
        let mut folded = [0u8; 256];
        for (dst, src) in folded.iter_mut().zip(chunk) {
            *dst = src.to_ascii_lowercase();
        }
        digest.update(&folded[..chunk.len()]);
    }
    !digest.finalize()
}

/// Checksum for an optional identifier, [`NO_CRC`] when absent or empty.
pub fn optional_checksum(s: Option<&str>) -> u32 {
    match s {
        Some(v) if !v.is_empty() => checksum_of(v),
        _ => NO_CRC,
    }
}
