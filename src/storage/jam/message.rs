//! The logical message assembled from a header, its subfields and the body text.

use chrono::{DateTime, TimeZone, Utc};

use super::crc::{checksum_of, optional_checksum};
use super::errors::JamError;
use super::header::{Attributes, MessageHeader};
use super::subfield::{Subfield, SubfieldKind};

/// A message as seen by callers. Never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Slot number in the base; 0 until written.
    pub number: u32,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub date_written: DateTime<Utc>,
    pub date_received: Option<DateTime<Utc>>,
    pub date_processed: Option<DateTime<Utc>>,
    pub orig_address: Option<String>,
    pub dest_address: Option<String>,
    pub msg_id: Option<String>,
    pub reply_id: Option<String>,
    pub pid: Option<String>,
    pub flags: Option<String>,
    pub tz_utc: Option<String>,
    pub trace: Vec<String>,
    pub seen_by: Vec<String>,
    pub path: Vec<String>,
    pub kludges: Vec<String>,
    /// Subfields with no named field above (attachments, embedded data, unknown codes).
    pub extra: Vec<Subfield>,
    pub reply_to: u32,
    pub reply_1st: u32,
    pub reply_next: u32,
    pub attributes: Attributes,
    pub attribute2: u32,
    pub times_read: u32,
    pub cost: u32,
    pub password_crc: u32,
}

impl Message {
    /// A local message stamped with the current time (whole seconds).
    pub fn new(from: &str, to: &str, subject: &str, text: &str) -> Self {
        Self {
            number: 0,
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
            date_written: from_unix(unix_seconds(Utc::now())),
            date_received: None,
            date_processed: None,
            orig_address: None,
            dest_address: None,
            msg_id: None,
            reply_id: None,
            pid: None,
            flags: None,
            tz_utc: None,
            trace: Vec::new(),
            seen_by: Vec::new(),
            path: Vec::new(),
            kludges: Vec::new(),
            extra: Vec::new(),
            reply_to: 0,
            reply_1st: 0,
            reply_next: 0,
            attributes: Attributes::LOCAL | Attributes::TYPE_LOCAL,
            attribute2: 0,
            times_read: 0,
            cost: 0,
            password_crc: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.attributes.contains(Attributes::DELETED)
    }

    pub fn is_private(&self) -> bool {
        self.attributes.contains(Attributes::PRIVATE)
    }

    pub fn is_local(&self) -> bool {
        self.attributes.contains(Attributes::LOCAL)
    }

    pub fn is_echo(&self) -> bool {
        self.attributes.contains(Attributes::TYPE_ECHO)
    }

    pub fn is_netmail(&self) -> bool {
        self.attributes.contains(Attributes::TYPE_NET)
    }

    /// Checksum written to the index for this message's receiver.
    pub fn to_crc(&self) -> u32 {
        checksum_of(&self.to)
    }

    /// Build the subfield sequence in canonical order.
    pub fn subfields(&self) -> Vec<Subfield> {
        fn push_opt(out: &mut Vec<Subfield>, kind: SubfieldKind, value: &Option<String>) {
            if let Some(v) = value {
                out.push(Subfield::text(kind, v));
            }
        }

        let mut out = Vec::new();
        push_opt(&mut out, SubfieldKind::OrigAddress, &self.orig_address);
        push_opt(&mut out, SubfieldKind::DestAddress, &self.dest_address);
        out.push(Subfield::text(SubfieldKind::SenderName, &self.from));
        out.push(Subfield::text(SubfieldKind::ReceiverName, &self.to));
        push_opt(&mut out, SubfieldKind::MsgId, &self.msg_id);
        push_opt(&mut out, SubfieldKind::ReplyId, &self.reply_id);
        out.push(Subfield::text(SubfieldKind::Subject, &self.subject));
        push_opt(&mut out, SubfieldKind::Pid, &self.pid);
        for (kind, lines) in [
            (SubfieldKind::Trace, &self.trace),
            (SubfieldKind::FtsKludge, &self.kludges),
            (SubfieldKind::SeenBy2D, &self.seen_by),
            (SubfieldKind::Path2D, &self.path),
        ] {
            out.extend(lines.iter().map(|l| Subfield::text(kind, l)));
        }
        push_opt(&mut out, SubfieldKind::Flags, &self.flags);
        push_opt(&mut out, SubfieldKind::TzUtcInfo, &self.tz_utc);
        out.extend(self.extra.iter().cloned());
        out
    }

    /// Header for a new record. Offsets, text length and the message number are
    /// filled in by the base when the record is appended.
    pub fn to_header(&self) -> Result<MessageHeader, JamError> {
        let mut attribute = self.attributes;
        attribute.remove(Attributes::DELETED);
        Ok(MessageHeader {
            times_read: self.times_read,
            msgid_crc: optional_checksum(self.msg_id.as_deref()),
            reply_crc: optional_checksum(self.reply_id.as_deref()),
            reply_to: self.reply_to,
            reply_1st: self.reply_1st,
            reply_next: self.reply_next,
            date_written: to_unix(self.date_written, "date_written")?,
            date_received: match self.date_received {
                Some(d) => to_unix(d, "date_received")?,
                None => 0,
            },
            date_processed: match self.date_processed {
                Some(d) => to_unix(d, "date_processed")?,
                None => 0,
            },
            attribute,
            attribute2: self.attribute2,
            password_crc: self.password_crc,
            cost: self.cost,
            subfields: self.subfields(),
            ..MessageHeader::default()
        })
    }

    /// Rejoin a stored header and its body.
    pub fn from_parts(number: u32, header: &MessageHeader, text: &[u8]) -> Self {
        let mut msg = Self {
            number,
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            text: String::from_utf8_lossy(text).into_owned(),
            date_written: from_unix(header.date_written),
            date_received: optional_date(header.date_received),
            date_processed: optional_date(header.date_processed),
            orig_address: None,
            dest_address: None,
            msg_id: None,
            reply_id: None,
            pid: None,
            flags: None,
            tz_utc: None,
            trace: Vec::new(),
            seen_by: Vec::new(),
            path: Vec::new(),
            kludges: Vec::new(),
            extra: Vec::new(),
            reply_to: header.reply_to,
            reply_1st: header.reply_1st,
            reply_next: header.reply_next,
            attributes: header.attribute,
            attribute2: header.attribute2,
            times_read: header.times_read,
            cost: header.cost,
            password_crc: header.password_crc,
        };
        let (mut from, mut to, mut subject) = (None, None, None);
        for sf in &header.subfields {
            // Singular fields keep the first occurrence, even an empty one; later duplicates
            // ride along in `extra`.
            let slot = match sf.kind {
                SubfieldKind::SenderName => Some(&mut from),
                SubfieldKind::ReceiverName => Some(&mut to),
                SubfieldKind::Subject => Some(&mut subject),
                SubfieldKind::OrigAddress => Some(&mut msg.orig_address),
                SubfieldKind::DestAddress => Some(&mut msg.dest_address),
                SubfieldKind::MsgId => Some(&mut msg.msg_id),
                SubfieldKind::ReplyId => Some(&mut msg.reply_id),
                SubfieldKind::Pid => Some(&mut msg.pid),
                SubfieldKind::Flags => Some(&mut msg.flags),
                SubfieldKind::TzUtcInfo => Some(&mut msg.tz_utc),
                _ => None,
            };
            if let Some(slot) = slot {
                if slot.is_none() {
                    *slot = Some(sf.as_text());
                } else {
                    msg.extra.push(sf.clone());
                }
                continue;
            }
            match sf.kind {
                SubfieldKind::Trace => msg.trace.push(sf.as_text()),
                SubfieldKind::SeenBy2D => msg.seen_by.push(sf.as_text()),
                SubfieldKind::Path2D => msg.path.push(sf.as_text()),
                SubfieldKind::FtsKludge => msg.kludges.push(sf.as_text()),
                _ => msg.extra.push(sf.clone()),
            }
        }
        msg.from = from.unwrap_or_default();
        msg.to = to.unwrap_or_default();
        msg.subject = subject.unwrap_or_default();
        msg
    }
}

pub(crate) fn unix_seconds(at: DateTime<Utc>) -> u32 {
    at.timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

fn to_unix(at: DateTime<Utc>, field: &'static str) -> Result<u32, JamError> {
    u32::try_from(at.timestamp()).map_err(|_| JamError::TooLarge(field))
}

fn from_unix(secs: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(secs), 0)
        .single()
        .unwrap_or_default()
}

fn optional_date(secs: u32) -> Option<DateTime<Utc>> {
    (secs != 0).then(|| from_unix(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_message() -> Message {
        let mut msg = Message::new("Alice", "All", "Meeting", "See you there\r");
        msg.attributes = Attributes::TYPE_ECHO;
        msg.orig_address = Some("1:234/5".into());
        msg.msg_id = Some("1:234/5 0badcafe".into());
        msg.pid = Some("jambbs 0.3".into());
        msg.seen_by = vec!["234/5 6".into(), "234/7".into()];
        msg.path = vec!["234/5".into()];
        msg.kludges = vec!["CHRS: UTF-8 4".into()];
        msg.tz_utc = Some("0100".into());
        msg.extra = vec![Subfield::text(SubfieldKind::EnclosedFile, "notes.txt")];
        msg
    }

    #[test]
    fn empty_first_sender_is_kept() {
        let mut header = Message::new("Alice", "All", "Meeting", "").to_header().unwrap();
        header.subfields.retain(|sf| sf.kind != SubfieldKind::SenderName);
        header.subfields.insert(0, Subfield::text(SubfieldKind::SenderName, ""));
        header.subfields.insert(1, Subfield::text(SubfieldKind::SenderName, "Bob"));

        let msg = Message::from_parts(1, &header, b"");
        assert_eq!(msg.from, "");
        assert_eq!(msg.to, "All");
        assert_eq!(msg.extra.len(), 1);
        assert_eq!(msg.extra[0].kind, SubfieldKind::SenderName);
        assert_eq!(msg.extra[0].as_text(), "Bob");
    }

    #[test]
    fn header_and_back() {
        let msg = echo_message();
        let header = msg.to_header().unwrap();
        assert_eq!(header.msgid_crc, checksum_of("1:234/5 0BADCAFE"));
        assert_eq!(header.reply_crc, crate::storage::jam::crc::NO_CRC);
        assert_eq!(header.all_text(SubfieldKind::SeenBy2D).len(), 2);

        let back = Message::from_parts(4, &header, msg.text.as_bytes());
        assert_eq!(back.number, 4);
        assert_eq!(back.from, "Alice");
        assert_eq!(back.to, "All");
        assert_eq!(back.subject, "Meeting");
        assert_eq!(back.text, msg.text);
        assert_eq!(back.date_written, msg.date_written);
        assert_eq!(back.date_received, None);
        assert_eq!(back.seen_by, msg.seen_by);
        assert_eq!(back.kludges, msg.kludges);
        assert_eq!(back.extra, msg.extra);
        assert!(back.is_echo());
        assert!(!back.is_netmail());
    }

    #[test]
    fn deleted_bit_never_written() {
        let mut msg = Message::new("a", "b", "c", "d");
        msg.attributes |= Attributes::DELETED;
        assert!(!msg.to_header().unwrap().is_deleted());
    }

    #[test]
    fn new_messages_are_local() {
        let msg = Message::new("a", "b", "c", "d");
        assert!(msg.is_local());
        assert!(!msg.is_private());
        assert_eq!(msg.date_written.timestamp_subsec_nanos(), 0);
    }
}
