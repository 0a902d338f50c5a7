//! Per-message header records stored back-to-back after the fixed header.

use std::ops::{BitOr, BitOrAssign};

use super::errors::JamError;
use super::subfield::{decode_subfields, encode_subfields, Subfield, SubfieldKind};
use super::{le_u16, le_u32, SIGNATURE};

/// Size of the fixed part of a message header; subfields follow.
pub const MESSAGE_HEADER_SIZE: usize = 76;

/// Header revision written by this engine.
pub const REVISION: u16 = 1;

/// The primary 32-bit attribute bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(pub u32);

impl Attributes {
    pub const LOCAL: Attributes = Attributes(0x0000_0001);
    pub const IN_TRANSIT: Attributes = Attributes(0x0000_0002);
    pub const PRIVATE: Attributes = Attributes(0x0000_0004);
    pub const READ: Attributes = Attributes(0x0000_0008);
    pub const SENT: Attributes = Attributes(0x0000_0010);
    pub const KILL_SENT: Attributes = Attributes(0x0000_0020);
    pub const ARCHIVE_SENT: Attributes = Attributes(0x0000_0040);
    pub const HOLD: Attributes = Attributes(0x0000_0080);
    pub const CRASH: Attributes = Attributes(0x0000_0100);
    pub const IMMEDIATE: Attributes = Attributes(0x0000_0200);
    pub const DIRECT: Attributes = Attributes(0x0000_0400);
    pub const GATE: Attributes = Attributes(0x0000_0800);
    pub const FILE_REQUEST: Attributes = Attributes(0x0000_1000);
    pub const FILE_ATTACH: Attributes = Attributes(0x0000_2000);
    pub const TRUNC_FILE: Attributes = Attributes(0x0000_4000);
    pub const KILL_FILE: Attributes = Attributes(0x0000_8000);
    pub const RECEIPT_REQ: Attributes = Attributes(0x0001_0000);
    pub const CONFIRM_REQ: Attributes = Attributes(0x0002_0000);
    pub const ORPHAN: Attributes = Attributes(0x0004_0000);
    pub const ENCRYPT: Attributes = Attributes(0x0008_0000);
    pub const COMPRESS: Attributes = Attributes(0x0010_0000);
    pub const ESCAPED: Attributes = Attributes(0x0020_0000);
    pub const FORCED_PICKUP: Attributes = Attributes(0x0040_0000);
    pub const TYPE_LOCAL: Attributes = Attributes(0x0080_0000);
    pub const TYPE_ECHO: Attributes = Attributes(0x0100_0000);
    pub const TYPE_NET: Attributes = Attributes(0x0200_0000);
    pub const NO_DISPLAY: Attributes = Attributes(0x2000_0000);
    pub const LOCKED: Attributes = Attributes(0x4000_0000);
    pub const DELETED: Attributes = Attributes(0x8000_0000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Attributes) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Attributes) {
        self.0 &= !other.0;
    }
}

impl BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for Attributes {
    fn bitor_assign(&mut self, rhs: Attributes) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub revision: u16,
    pub reserved: u16,
    pub times_read: u32,
    pub msgid_crc: u32,
    pub reply_crc: u32,
    pub reply_to: u32,
    pub reply_1st: u32,
    pub reply_next: u32,
    pub date_written: u32,
    pub date_received: u32,
    pub date_processed: u32,
    pub message_number: u32,
    pub attribute: Attributes,
    pub attribute2: u32,
    pub offset: u32,
    pub txt_len: u32,
    pub password_crc: u32,
    pub cost: u32,
    pub subfields: Vec<Subfield>,
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            revision: REVISION,
            reserved: 0,
            times_read: 0,
            msgid_crc: super::crc::NO_CRC,
            reply_crc: super::crc::NO_CRC,
            reply_to: 0,
            reply_1st: 0,
            reply_next: 0,
            date_written: 0,
            date_received: 0,
            date_processed: 0,
            message_number: 0,
            attribute: Attributes::default(),
            attribute2: 0,
            offset: 0,
            txt_len: 0,
            password_crc: 0,
            cost: 0,
            subfields: Vec::new(),
        }
    }
}

impl MessageHeader {
    pub fn is_deleted(&self) -> bool {
        self.attribute.contains(Attributes::DELETED)
    }

    /// First subfield of `kind`, if any.
    pub fn first(&self, kind: SubfieldKind) -> Option<&Subfield> {
        self.subfields.iter().find(|sf| sf.kind == kind)
    }

    /// Every subfield of `kind`, in stored order.
    pub fn all(&self, kind: SubfieldKind) -> impl Iterator<Item = &Subfield> + '_ {
        self.subfields.iter().filter(move |sf| sf.kind == kind)
    }

    pub fn first_text(&self, kind: SubfieldKind) -> Option<String> {
        self.first(kind).map(Subfield::as_text)
    }

    pub fn all_text(&self, kind: SubfieldKind) -> Vec<String> {
        self.all(kind).map(Subfield::as_text).collect()
    }

    /// Full on-disk record: fixed block with a computed `subfield_len`, then the subfields.
    pub fn encode(&self) -> Result<Vec<u8>, JamError> {
        let subfields = encode_subfields(&self.subfields)?;
        let subfield_len =
            u32::try_from(subfields.len()).map_err(|_| JamError::TooLarge("subfield block"))?;
        let mut out = Vec::with_capacity(MESSAGE_HEADER_SIZE + subfields.len());
        out.extend_from_slice(&self.encode_fixed(subfield_len));
        out.extend_from_slice(&subfields);
        Ok(out)
    }

    /// Only the fixed block, for in-place rewrites that keep the stored subfields.
    pub fn encode_fixed(&self, subfield_len: u32) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SIGNATURE);
        buf[4..6].copy_from_slice(&self.revision.to_le_bytes());
        buf[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        let words = [
            subfield_len,
            self.times_read,
            self.msgid_crc,
            self.reply_crc,
            self.reply_to,
            self.reply_1st,
            self.reply_next,
            self.date_written,
            self.date_received,
            self.date_processed,
            self.message_number,
            self.attribute.bits(),
            self.attribute2,
            self.offset,
            self.txt_len,
            self.password_crc,
            self.cost,
        ];
        for (i, word) in words.iter().enumerate() {
            let at = 8 + i * 4;
            buf[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decode the fixed block; returns the header (without subfields) and its `subfield_len`.
    pub fn decode_fixed(buf: &[u8]) -> Result<(Self, u32), JamError> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(JamError::Corrupt(format!(
                "message header truncated to {} bytes",
                buf.len()
            )));
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buf[0..4]);
        if found != SIGNATURE {
            return Err(JamError::InvalidSignature {
                what: "message header",
                found,
            });
        }
        let word = |i: usize| le_u32(buf, 8 + i * 4);
        let header = Self {
            revision: le_u16(buf, 4),
            reserved: le_u16(buf, 6),
            times_read: word(1),
            msgid_crc: word(2),
            reply_crc: word(3),
            reply_to: word(4),
            reply_1st: word(5),
            reply_next: word(6),
            date_written: word(7),
            date_received: word(8),
            date_processed: word(9),
            message_number: word(10),
            attribute: Attributes(word(11)),
            attribute2: word(12),
            offset: word(13),
            txt_len: word(14),
            password_crc: word(15),
            cost: word(16),
            subfields: Vec::new(),
        };
        Ok((header, word(0)))
    }

    /// Decode a complete record; `buf` must hold exactly the fixed block and subfield block.
    pub fn decode(buf: &[u8]) -> Result<Self, JamError> {
        let (mut header, subfield_len) = Self::decode_fixed(buf)?;
        let block = &buf[MESSAGE_HEADER_SIZE..];
        if block.len() != subfield_len as usize {
            return Err(JamError::Corrupt(format!(
                "subfield_len {subfield_len} disagrees with {} trailing bytes",
                block.len()
            )));
        }
        header.subfields = decode_subfields(block)?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MessageHeader {
        MessageHeader {
            times_read: 3,
            reply_to: 2,
            date_written: 1_700_000_000,
            message_number: 5,
            attribute: Attributes::LOCAL | Attributes::PRIVATE,
            offset: 128,
            txt_len: 5,
            subfields: vec![
                Subfield::text(SubfieldKind::SenderName, "Alice"),
                Subfield::text(SubfieldKind::Trace, "hop one"),
                Subfield::text(SubfieldKind::Trace, "hop two"),
            ],
            ..MessageHeader::default()
        }
    }

    #[test]
    fn encoded_subfield_len_matches_block() {
        let bytes = sample().encode().unwrap();
        let declared = le_u32(&bytes, 8) as usize;
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + declared);
        assert_eq!(declared, (8 + 5) + (8 + 7) * 2);
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn field_offsets() {
        let bytes = sample().encode().unwrap();
        assert_eq!(&bytes[0..4], b"JAM\0");
        assert_eq!(le_u16(&bytes, 4), REVISION);
        assert_eq!(le_u32(&bytes, 12), 3); // times_read
        assert_eq!(le_u32(&bytes, 48), 5); // message_number
        assert_eq!(le_u32(&bytes, 52), 0x5); // attribute
        assert_eq!(le_u32(&bytes, 60), 128); // offset
        assert_eq!(le_u32(&bytes, 64), 5); // txt_len
    }

    #[test]
    fn repeated_subfields_are_kept_in_order() {
        let header = sample();
        assert_eq!(header.first_text(SubfieldKind::SenderName).as_deref(), Some("Alice"));
        assert_eq!(header.all_text(SubfieldKind::Trace), vec!["hop one", "hop two"]);
        assert!(header.first(SubfieldKind::Subject).is_none());
    }

    #[test]
    fn mismatched_subfield_len_is_corrupt() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(matches!(MessageHeader::decode(&bytes), Err(JamError::Corrupt(_))));
    }

    #[test]
    fn attribute_helpers() {
        let mut attrs = Attributes::TYPE_ECHO;
        attrs |= Attributes::DELETED;
        assert!(attrs.contains(Attributes::DELETED));
        attrs.remove(Attributes::DELETED);
        assert_eq!(attrs, Attributes::TYPE_ECHO);
        assert_eq!(Attributes::DELETED.bits(), 0x8000_0000);
    }
}
