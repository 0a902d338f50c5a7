//! Typed, length-prefixed values trailing each message header.

use super::errors::JamError;
use super::{le_u16, le_u32};

/// Bytes preceding each subfield payload: lo_id u16, hi_id u16, data_len u32.
pub const SUBFIELD_HEADER_SIZE: usize = 8;

/// Subfield type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubfieldKind {
    OrigAddress,
    DestAddress,
    SenderName,
    ReceiverName,
    MsgId,
    ReplyId,
    Subject,
    Pid,
    Trace,
    EnclosedFile,
    EnclosedFileWithAlias,
    EnclosedFileRequest,
    EnclosedFileWildcard,
    EnclosedIndirectFile,
    EmbeddedData,
    FtsKludge,
    SeenBy2D,
    Path2D,
    Flags,
    TzUtcInfo,
    /// Any code this engine does not interpret; preserved verbatim.
    Unknown(u16),
}

impl SubfieldKind {
    pub fn code(self) -> u16 {
        match self {
            SubfieldKind::OrigAddress => 0,
            SubfieldKind::DestAddress => 1,
            SubfieldKind::SenderName => 2,
            SubfieldKind::ReceiverName => 3,
            SubfieldKind::MsgId => 4,
            SubfieldKind::ReplyId => 5,
            SubfieldKind::Subject => 6,
            SubfieldKind::Pid => 7,
            SubfieldKind::Trace => 8,
            SubfieldKind::EnclosedFile => 9,
            SubfieldKind::EnclosedFileWithAlias => 10,
            SubfieldKind::EnclosedFileRequest => 11,
            SubfieldKind::EnclosedFileWildcard => 12,
            SubfieldKind::EnclosedIndirectFile => 13,
            SubfieldKind::EmbeddedData => 1000,
            SubfieldKind::FtsKludge => 2000,
            SubfieldKind::SeenBy2D => 2001,
            SubfieldKind::Path2D => 2002,
            SubfieldKind::Flags => 2003,
            SubfieldKind::TzUtcInfo => 2004,
            SubfieldKind::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => SubfieldKind::OrigAddress,
            1 => SubfieldKind::DestAddress,
            2 => SubfieldKind::SenderName,
            3 => SubfieldKind::ReceiverName,
            4 => SubfieldKind::MsgId,
            5 => SubfieldKind::ReplyId,
            6 => SubfieldKind::Subject,
            7 => SubfieldKind::Pid,
            8 => SubfieldKind::Trace,
            9 => SubfieldKind::EnclosedFile,
            10 => SubfieldKind::EnclosedFileWithAlias,
            11 => SubfieldKind::EnclosedFileRequest,
            12 => SubfieldKind::EnclosedFileWildcard,
            13 => SubfieldKind::EnclosedIndirectFile,
            1000 => SubfieldKind::EmbeddedData,
            2000 => SubfieldKind::FtsKludge,
            2001 => SubfieldKind::SeenBy2D,
            2002 => SubfieldKind::Path2D,
            2003 => SubfieldKind::Flags,
            2004 => SubfieldKind::TzUtcInfo,
            other => SubfieldKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub kind: SubfieldKind,
    /// The high id word; zero in every base written by this engine.
    pub reserved: u16,
    pub data: Vec<u8>,
}

impl Subfield {
    pub fn new(kind: SubfieldKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            reserved: 0,
            data: data.into(),
        }
    }

    pub fn text(kind: SubfieldKind, value: &str) -> Self {
        Self::new(kind, value.as_bytes())
    }

    /// Payload as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn encoded_len(&self) -> usize {
        SUBFIELD_HEADER_SIZE + self.data.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), JamError> {
        let len = u32::try_from(self.data.len()).map_err(|_| JamError::TooLarge("subfield"))?;
        out.extend_from_slice(&self.kind.code().to_le_bytes());
        out.extend_from_slice(&self.reserved.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Serialize a subfield sequence; the result length is the header's `subfield_len`.
pub fn encode_subfields(subfields: &[Subfield]) -> Result<Vec<u8>, JamError> {
    let total: usize = subfields.iter().map(Subfield::encoded_len).sum();
    let mut out = Vec::with_capacity(total);
    for sf in subfields {
        sf.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Consume `buf` entirely as a subfield sequence.
pub fn decode_subfields(buf: &[u8]) -> Result<Vec<Subfield>, JamError> {
    let mut subfields = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        if buf.len() - pos < SUBFIELD_HEADER_SIZE {
            return Err(JamError::Corrupt(format!(
                "subfield header truncated at byte {pos} of {}",
                buf.len()
            )));
        }
        let code = le_u16(buf, pos);
        let reserved = le_u16(buf, pos + 2);
        let len = le_u32(buf, pos + 4) as usize;
        let start = pos + SUBFIELD_HEADER_SIZE;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                JamError::Corrupt(format!(
                    "subfield of {len} bytes at byte {pos} overruns block of {}",
                    buf.len()
                ))
            })?;
        subfields.push(Subfield {
            kind: SubfieldKind::from_code(code),
            reserved,
            data: buf[start..end].to_vec(),
        });
        pos = end;
    }
    Ok(subfields)
}
