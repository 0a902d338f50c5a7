//! # JAM Message Base Engine
//!
//! A message area is four cooperating files sharing one base path:
//!
//! ```text
//! conf1.jhr  ← 1024-byte fixed header, then variable-length message headers
//! conf1.jdt  ← message bodies, addressed by header offset/length
//! conf1.jdx  ← 8-byte index records, slot n at byte (n-1)*8
//! conf1.jlr  ← 16-byte last-read records, one per subscribed user
//! ```
//!
//! Two more files appear next to them: `conf1.jlk` carries the advisory lock
//! and `conf1.jpk` exists only while a pack is being committed.
//!
//! All integers are little-endian. Messages are soft-deleted by setting the
//! deleted attribute and overwriting the index slot with an all-ones sentinel;
//! [`JamBase::pack`] discards them and renumbers the survivors.
//!
//! ```rust,no_run
//! use jambbs::storage::jam::{JamBase, Message};
//!
//! fn main() -> Result<(), jambbs::storage::jam::JamError> {
//!     let mut base = JamBase::open("data/messages/general")?;
//!     let number = base.write_message(&Message::new("Alice", "Bob", "Hi", "hello"))?;
//!     let msg = base.read_message(number)?;
//!     assert_eq!(msg.subject, "Hi");
//!     Ok(())
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub mod base;
pub mod crc;
pub mod errors;
pub mod fixed_header;
pub mod header;
pub mod index;
pub mod lock;
pub mod maintenance;
pub mod message;
pub mod subfield;

pub use base::{CorruptionPolicy, ExclusiveGuard, JamBase, JamBaseBuilder};
pub use crc::checksum_of;
pub use errors::JamError;
pub use fixed_header::FixedHeader;
pub use header::{Attributes, MessageHeader};
pub use index::{IndexRecord, LastRead};
pub use maintenance::{BaseStatistics, IntegrityIssue, IntegrityReport, PackReport};
pub use message::Message;
pub use subfield::{Subfield, SubfieldKind};

/// Signature opening the fixed header and every message header.
pub const SIGNATURE: [u8; 4] = *b"JAM\0";

pub const EXT_HEADER: &str = "jhr";
pub const EXT_TEXT: &str = "jdt";
pub const EXT_INDEX: &str = "jdx";
pub const EXT_LAST_READ: &str = "jlr";
pub const EXT_LOCK: &str = "jlk";
pub const EXT_PACK_MARKER: &str = "jpk";

/// The four data files, in the order they are created and replaced.
pub const DATA_EXTENSIONS: [&str; 4] = [EXT_HEADER, EXT_TEXT, EXT_INDEX, EXT_LAST_READ];

/// `base` with `.ext` appended. Base names may contain dots, so this never replaces an extension.
pub fn file_path(base: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
