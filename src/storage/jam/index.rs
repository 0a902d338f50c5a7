//! Fixed-size records of the `.jdx` index and `.jlr` last-read stores.

use super::crc::checksum_of;
use super::le_u32;

/// Size of one index record.
pub const INDEX_RECORD_SIZE: usize = 8;

/// Size of one last-read record.
pub const LAST_READ_SIZE: usize = 16;

/// One slot of the index: participant checksum plus header offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub to_crc: u32,
    pub header_offset: u32,
}

impl IndexRecord {
    /// The all-ones pair marking a removed slot.
    pub const SENTINEL: IndexRecord = IndexRecord {
        to_crc: 0xFFFF_FFFF,
        header_offset: 0xFFFF_FFFF,
    };

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// Byte position of slot `number` (1-based) in the index store.
    pub fn position(number: u32) -> u64 {
        u64::from(number.saturating_sub(1)) * INDEX_RECORD_SIZE as u64
    }

    pub fn encode(&self) -> [u8; INDEX_RECORD_SIZE] {
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.to_crc.to_le_bytes());
        buf[4..8].copy_from_slice(&self.header_offset.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; INDEX_RECORD_SIZE]) -> Self {
        Self {
            to_crc: le_u32(buf, 0),
            header_offset: le_u32(buf, 4),
        }
    }
}

/// Per-user reading position. Pointers are message numbers of the base they were stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LastRead {
    pub user_crc: u32,
    pub user_id: u32,
    pub last_read: u32,
    pub high_read: u32,
}

impl LastRead {
    /// Fresh record for a user who has read nothing yet.
    pub fn for_user(name: &str, user_id: u32) -> Self {
        Self {
            user_crc: checksum_of(name),
            user_id,
            last_read: 0,
            high_read: 0,
        }
    }

    pub fn is_for(&self, user_crc: u32, user_id: u32) -> bool {
        self.user_crc == user_crc && self.user_id == user_id
    }

    /// Advance both pointers after reading `number`.
    pub fn mark(&mut self, number: u32) {
        self.last_read = number;
        self.high_read = self.high_read.max(number);
    }

    pub fn encode(&self) -> [u8; LAST_READ_SIZE] {
        let mut buf = [0u8; LAST_READ_SIZE];
        buf[0..4].copy_from_slice(&self.user_crc.to_le_bytes());
        buf[4..8].copy_from_slice(&self.user_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.last_read.to_le_bytes());
        buf[12..16].copy_from_slice(&self.high_read.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; LAST_READ_SIZE]) -> Self {
        Self {
            user_crc: le_u32(buf, 0),
            user_id: le_u32(buf, 4),
            last_read: le_u32(buf, 8),
            high_read: le_u32(buf, 12),
        }
    }
}
