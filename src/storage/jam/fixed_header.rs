//! The 1024-byte base header at the start of every `.jhr` file.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ signature     [u8; 4] = b"JAM\0"     │
//! │ date_created  u32 (unix seconds)     │
//! │ mod_counter   u32                    │
//! │ active_msgs   u32                    │
//! │ password_crc  u32                    │
//! │ base_msg_num  u32                    │
//! │ reserved      [u8; 1000]             │
//! └──────────────────────────────────────┘
//! ```

use super::errors::JamError;
use super::{le_u32, SIGNATURE};

/// Size of the fixed header in bytes.
pub const FIXED_HEADER_SIZE: usize = 1024;

/// In-memory mirror of the base header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHeader {
    pub date_created: u32,
    pub mod_counter: u32,
    pub active_msgs: u32,
    pub password_crc: u32,
    pub base_msg_num: u32,
}

impl FixedHeader {
    /// Header for a freshly created, empty base.
    pub fn new(date_created: u32) -> Self {
        Self {
            date_created,
            mod_counter: 0,
            active_msgs: 0,
            password_crc: 0,
            base_msg_num: 1,
        }
    }

    pub fn encode(&self) -> [u8; FIXED_HEADER_SIZE] {
        let mut buf = [0u8; FIXED_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SIGNATURE);
        buf[4..8].copy_from_slice(&self.date_created.to_le_bytes());
        buf[8..12].copy_from_slice(&self.mod_counter.to_le_bytes());
        buf[12..16].copy_from_slice(&self.active_msgs.to_le_bytes());
        buf[16..20].copy_from_slice(&self.password_crc.to_le_bytes());
        buf[20..24].copy_from_slice(&self.base_msg_num.to_le_bytes());
        buf
    }

    /// Decode from the first bytes of a header store. Truncated input is corruption.
    pub fn decode(buf: &[u8]) -> Result<Self, JamError> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(JamError::Corrupt(format!(
                "fixed header truncated to {} bytes",
                buf.len()
            )));
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buf[0..4]);
        if found != SIGNATURE {
            return Err(JamError::InvalidSignature {
                what: "fixed header",
                found,
            });
        }
        Ok(Self {
            date_created: le_u32(buf, 4),
            mod_counter: le_u32(buf, 8),
            active_msgs: le_u32(buf, 12),
            password_crc: le_u32(buf, 16),
            base_msg_num: le_u32(buf, 20),
        })
    }

    /// Record a mutation.
    pub fn touch(&mut self) {
        self.mod_counter = self.mod_counter.wrapping_add(1);
    }
}
