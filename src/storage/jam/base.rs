use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::crc::checksum_of;
use super::errors::JamError;
use super::fixed_header::{FixedHeader, FIXED_HEADER_SIZE};
use super::header::{Attributes, MessageHeader, MESSAGE_HEADER_SIZE};
use super::index::{IndexRecord, LastRead, INDEX_RECORD_SIZE, LAST_READ_SIZE};
use super::lock::BaseLock;
use super::message::{unix_seconds, Message};
use super::subfield::{decode_subfields, SubfieldKind};
use super::{
    file_path, maintenance, DATA_EXTENSIONS, EXT_HEADER, EXT_INDEX, EXT_LAST_READ, EXT_LOCK,
    EXT_TEXT,
};
use crate::logutil::escape_log;
use crate::metrics;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// What [`JamBase::open`] does when the files on disk are unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionPolicy {
    /// Discard the damaged files and start an empty base.
    #[default]
    Recreate,
    /// Leave the files alone and return the corruption error.
    Fail,
}

#[derive(Debug, Clone)]
pub(super) struct BaseOptions {
    pub(super) lock_timeout: Duration,
    pub(super) on_corruption: CorruptionPolicy,
}

/// Builder so hosts and tests can tune lock bounds and the corruption policy.
pub struct JamBaseBuilder {
    path: PathBuf,
    options: BaseOptions,
}

impl JamBaseBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: BaseOptions {
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
                on_corruption: CorruptionPolicy::default(),
            },
        }
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    pub fn on_corruption(mut self, policy: CorruptionPolicy) -> Self {
        self.options.on_corruption = policy;
        self
    }

    pub fn open(self) -> Result<JamBase, JamError> {
        JamBase::open_with(self.path, self.options)
    }

    pub fn create(self) -> Result<JamBase, JamError> {
        JamBase::create_with(self.path, self.options)
    }
}

pub(super) struct BaseFiles {
    pub(super) header: File,
    pub(super) text: File,
    pub(super) index: File,
    pub(super) last_read: File,
}

impl BaseFiles {
    fn open_existing(path: &Path) -> Result<Self, JamError> {
        let open = |ext: &str| -> Result<File, JamError> {
            Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .open(file_path(path, ext))?)
        };
        Ok(Self {
            header: open(EXT_HEADER)?,
            text: open(EXT_TEXT)?,
            index: open(EXT_INDEX)?,
            last_read: open(EXT_LAST_READ)?,
        })
    }

    fn create_fresh(path: &Path) -> Result<Self, JamError> {
        let create = |ext: &str| -> Result<File, JamError> {
            Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(file_path(path, ext))?)
        };
        Ok(Self {
            header: create(EXT_HEADER)?,
            text: create(EXT_TEXT)?,
            index: create(EXT_INDEX)?,
            last_read: create(EXT_LAST_READ)?,
        })
    }

    pub(super) fn sync_all(&self) -> io::Result<()> {
        self.header.sync_all()?;
        self.text.sync_all()?;
        self.index.sync_all()?;
        self.last_read.sync_all()
    }
}

pub(super) fn read_at(file: &File, pos: u64, buf: &mut [u8]) -> io::Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(pos))?;
    f.read_exact(buf)
}

pub(super) fn write_at(file: &File, pos: u64, buf: &[u8]) -> io::Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(pos))?;
    f.write_all(buf)
}

fn file_len(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.len())
}

fn truncated_header(e: io::Error) -> JamError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => JamError::Corrupt("fixed header truncated".into()),
        _ => JamError::Io(e),
    }
}

/// An open JAM message base.
///
/// Mutating operations take the base's exclusive lock for their full duration.
/// Reads run without it and may observe a concurrent writer mid-update; callers
/// wanting a stable view hold [`JamBase::exclusive`] around them.
pub struct JamBase {
    pub(super) path: PathBuf,
    pub(super) files: Option<BaseFiles>,
    pub(super) fixed: FixedHeader,
    pub(super) lock: BaseLock,
    pub(super) options: BaseOptions,
}

impl JamBase {
    /// Open the base at `path`, creating it if absent. Damaged files are handled per
    /// [`CorruptionPolicy::Recreate`]; use [`JamBaseBuilder`] for other settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JamError> {
        JamBaseBuilder::new(path).open()
    }

    /// Create an empty base at `path`, replacing any existing files.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, JamError> {
        JamBaseBuilder::new(path).create()
    }

    fn new_closed(path: PathBuf, options: BaseOptions) -> Result<Self, JamError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = BaseLock::open(&file_path(&path, EXT_LOCK), options.lock_timeout)?;
        Ok(Self {
            path,
            files: None,
            fixed: FixedHeader::new(0),
            lock,
            options,
        })
    }

    pub(super) fn open_with(path: PathBuf, options: BaseOptions) -> Result<Self, JamError> {
        let mut base = Self::new_closed(path, options)?;
        base.lock.acquire()?;
        let opened = base.open_or_heal();
        base.lock.release()?;
        opened?;
        Ok(base)
    }

    pub(super) fn create_with(path: PathBuf, options: BaseOptions) -> Result<Self, JamError> {
        let mut base = Self::new_closed(path, options)?;
        base.lock.acquire()?;
        let created = base.create_files();
        base.lock.release()?;
        created?;
        Ok(base)
    }

    fn open_or_heal(&mut self) -> Result<(), JamError> {
        maintenance::recover_interrupted_pack(&self.path)?;
        let present: Vec<&str> = DATA_EXTENSIONS
            .iter()
            .copied()
            .filter(|ext| file_path(&self.path, ext).exists())
            .collect();
        if present.is_empty() {
            info!("Creating message base {}", self.path.display());
            return self.create_files();
        }
        let attempt = if present.len() < DATA_EXTENSIONS.len() {
            Err(JamError::Corrupt(format!(
                "only {} of {} base files present",
                present.len(),
                DATA_EXTENSIONS.len()
            )))
        } else {
            self.open_files()
        };
        match attempt {
            Ok(()) => Ok(()),
            Err(e)
                if e.is_corruption()
                    && self.options.on_corruption == CorruptionPolicy::Recreate =>
            {
                warn!(
                    "Message base {} is unusable ({}); discarding it and recreating empty",
                    self.path.display(),
                    e
                );
                metrics::inc_bases_recreated();
                self.files = None;
                remove_data_files(&self.path)?;
                self.create_files()
            }
            Err(e) => Err(e),
        }
    }

    pub(super) fn open_files(&mut self) -> Result<(), JamError> {
        let files = BaseFiles::open_existing(&self.path)?;
        let len = file_len(&files.header)?;
        if len < FIXED_HEADER_SIZE as u64 {
            return Err(JamError::Corrupt(format!(
                "header store is {len} bytes, shorter than the fixed header"
            )));
        }
        let mut buf = [0u8; FIXED_HEADER_SIZE];
        read_at(&files.header, 0, &mut buf)?;
        self.fixed = FixedHeader::decode(&buf)?;
        self.files = Some(files);
        debug!("Opened message base {}", self.path.display());
        Ok(())
    }

    fn create_files(&mut self) -> Result<(), JamError> {
        let files = BaseFiles::create_fresh(&self.path)?;
        let fixed = FixedHeader::new(unix_seconds(Utc::now()));
        write_at(&files.header, 0, &fixed.encode())?;
        files.sync_all()?;
        self.fixed = fixed;
        self.files = Some(files);
        Ok(())
    }

    /// Close all four files. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.files.take().is_some() {
            debug!("Closed message base {}", self.path.display());
        }
    }

    pub fn is_open(&self) -> bool {
        self.files.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn files(&self) -> Result<&BaseFiles, JamError> {
        self.files.as_ref().ok_or(JamError::NotOpen)
    }

    /// Copy of the fixed header as of this handle's last read or write.
    pub fn fixed_header(&self) -> Result<&FixedHeader, JamError> {
        self.files()?;
        Ok(&self.fixed)
    }

    /// Bring this handle up to date with the files on disk.
    ///
    /// Re-reads the fixed header, picking up other handles' writes. A pack through
    /// another handle replaces the files and leaves this handle's descriptors on the
    /// old inodes; the files are then reopened under the lock, after finishing or
    /// discarding any pack that was cut short mid-commit.
    pub fn refresh(&mut self) -> Result<(), JamError> {
        if self.files_replaced()? {
            debug!("Files of {} were replaced; reopening", self.path.display());
            return self.reopen_under_lock();
        }
        let mut held = [0u8; FIXED_HEADER_SIZE];
        read_at(&self.files()?.header, 0, &mut held).map_err(truncated_header)?;
        self.fixed = FixedHeader::decode(&held)?;
        Ok(())
    }

    /// Whether the header store at the path is no longer the file this handle holds.
    #[cfg(unix)]
    fn files_replaced(&self) -> Result<bool, JamError> {
        use std::os::unix::fs::MetadataExt;

        let held = self.files()?.header.metadata()?;
        let on_disk = fs::metadata(file_path(&self.path, EXT_HEADER))?;
        Ok(held.ino() != on_disk.ino() || held.dev() != on_disk.dev())
    }

    /// Whether the header store at the path is no longer the file this handle holds.
    /// Pack always bumps the modification counter, so replaced files never match.
    #[cfg(not(unix))]
    fn files_replaced(&self) -> Result<bool, JamError> {
        let mut held = [0u8; FIXED_HEADER_SIZE];
        read_at(&self.files()?.header, 0, &mut held).map_err(truncated_header)?;
        let mut current = [0u8; FIXED_HEADER_SIZE];
        let on_disk = File::open(file_path(&self.path, EXT_HEADER))?;
        read_at(&on_disk, 0, &mut current).map_err(truncated_header)?;
        Ok(held != current)
    }

    fn reopen_under_lock(&mut self) -> Result<(), JamError> {
        self.lock.acquire()?;
        let reopened = self.reopen_files();
        self.lock.release()?;
        reopened
    }

    fn reopen_files(&mut self) -> Result<(), JamError> {
        self.files = None;
        maintenance::recover_interrupted_pack(&self.path)?;
        self.open_files()
    }

    pub(super) fn persist_fixed(&mut self) -> Result<(), JamError> {
        write_at(&self.files()?.header, 0, &self.fixed.encode())?;
        Ok(())
    }

    /// Flush every file to stable storage.
    pub fn sync(&self) -> Result<(), JamError> {
        self.files()?.sync_all()?;
        Ok(())
    }

    // ---- locking -------------------------------------------------------------

    /// Take the exclusive lock, waiting up to the configured bound. Re-entrant per handle.
    pub fn lock(&mut self) -> Result<(), JamError> {
        self.files()?;
        self.lock.acquire()?;
        if let Err(e) = self.refresh() {
            let _ = self.lock.release();
            return Err(e);
        }
        Ok(())
    }

    /// Release one level of [`JamBase::lock`].
    pub fn unlock(&mut self) -> Result<(), JamError> {
        self.lock.release()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Scoped exclusive access; released when the guard drops, on every path.
    pub fn exclusive(&mut self) -> Result<ExclusiveGuard<'_>, JamError> {
        self.lock()?;
        Ok(ExclusiveGuard { base: self })
    }

    /// Run `f` holding the lock; the lock is released whether `f` succeeds or not.
    pub(super) fn with_lock<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, JamError>,
    ) -> Result<T, JamError> {
        self.lock()?;
        let result = f(self);
        let released = self.lock.release();
        let value = result?;
        released?;
        Ok(value)
    }

    // ---- counts --------------------------------------------------------------

    /// Number of index slots, deleted ones included.
    pub fn message_count(&mut self) -> Result<u32, JamError> {
        self.refresh()?;
        self.slot_count()
    }

    /// Active counter from the fixed header.
    pub fn active_message_count(&mut self) -> Result<u32, JamError> {
        self.refresh()?;
        Ok(self.fixed.active_msgs)
    }

    pub(super) fn slot_count(&self) -> Result<u32, JamError> {
        let len = file_len(&self.files()?.index)?;
        u32::try_from(len / INDEX_RECORD_SIZE as u64).map_err(|_| JamError::TooLarge("index store"))
    }

    // ---- reads ---------------------------------------------------------------
    //
    // The public reads refresh first so they never run against files a pack has
    // replaced. The `&self` helpers below them assume the caller already did.

    /// Raw index record for slot `number`; sentinel slots are returned as-is.
    pub fn read_index(&mut self, number: u32) -> Result<IndexRecord, JamError> {
        self.refresh()?;
        self.index_at(number)
    }

    /// Full header, subfields included, at `offset` in the header store.
    pub fn read_header_at(&mut self, offset: u32) -> Result<MessageHeader, JamError> {
        self.refresh()?;
        self.header_at(offset)
    }

    /// Header for slot `number`; sentinel slots are [`JamError::NotFound`].
    pub fn read_header(&mut self, number: u32) -> Result<MessageHeader, JamError> {
        self.refresh()?;
        self.header_for(number)
    }

    /// Read message `number` (1-based slot).
    pub fn read_message(&mut self, number: u32) -> Result<Message, JamError> {
        self.refresh()?;
        let header = self.header_for(number)?;
        let text = self.read_text(&header)?;
        metrics::inc_messages_read();
        Ok(Message::from_parts(number, &header, &text))
    }

    fn check_number(&self, number: u32) -> Result<(), JamError> {
        let count = self.slot_count()?;
        if number == 0 || number > count {
            return Err(JamError::InvalidMessageNumber { number, count });
        }
        Ok(())
    }

    pub(super) fn index_at(&self, number: u32) -> Result<IndexRecord, JamError> {
        self.check_number(number)?;
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        read_at(&self.files()?.index, IndexRecord::position(number), &mut buf)?;
        Ok(IndexRecord::decode(&buf))
    }

    pub(super) fn read_index_all(&self) -> Result<Vec<IndexRecord>, JamError> {
        let mut bytes = Vec::new();
        let mut f = &self.files()?.index;
        f.seek(SeekFrom::Start(0))?;
        f.read_to_end(&mut bytes)?;
        Ok(bytes
            .chunks_exact(INDEX_RECORD_SIZE)
            .map(|chunk| {
                let mut rec = [0u8; INDEX_RECORD_SIZE];
                rec.copy_from_slice(chunk);
                IndexRecord::decode(&rec)
            })
            .collect())
    }

    /// Fixed block of the header at `offset` plus its declared subfield length.
    pub(super) fn read_fixed_at(&self, offset: u32) -> Result<(MessageHeader, u32), JamError> {
        let files = self.files()?;
        let len = file_len(&files.header)?;
        let start = u64::from(offset);
        if start < FIXED_HEADER_SIZE as u64 || start + MESSAGE_HEADER_SIZE as u64 > len {
            return Err(JamError::Corrupt(format!(
                "header offset {offset} outside header store of {len} bytes"
            )));
        }
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        read_at(&files.header, start, &mut buf)?;
        MessageHeader::decode_fixed(&buf)
    }

    pub(super) fn header_at(&self, offset: u32) -> Result<MessageHeader, JamError> {
        let (mut header, subfield_len) = self.read_fixed_at(offset)?;
        let files = self.files()?;
        let start = u64::from(offset) + MESSAGE_HEADER_SIZE as u64;
        if start + u64::from(subfield_len) > file_len(&files.header)? {
            return Err(JamError::Corrupt(format!(
                "subfields of header at {offset} run past the header store"
            )));
        }
        let mut block = vec![0u8; subfield_len as usize];
        read_at(&files.header, start, &mut block)?;
        header.subfields = decode_subfields(&block)?;
        Ok(header)
    }

    fn header_for(&self, number: u32) -> Result<MessageHeader, JamError> {
        let rec = self.index_at(number)?;
        if rec.is_sentinel() {
            return Err(JamError::NotFound(number));
        }
        self.header_at(rec.header_offset)
    }

    pub(super) fn read_text(&self, header: &MessageHeader) -> Result<Vec<u8>, JamError> {
        let files = self.files()?;
        let end = u64::from(header.offset) + u64::from(header.txt_len);
        let len = file_len(&files.text)?;
        if end > len {
            return Err(JamError::Corrupt(format!(
                "text range {}+{} outside text store of {len} bytes",
                header.offset, header.txt_len
            )));
        }
        let mut text = vec![0u8; header.txt_len as usize];
        read_at(&files.text, u64::from(header.offset), &mut text)?;
        Ok(text)
    }

    // ---- messages ------------------------------------------------------------

    /// Append `msg`; returns its message number.
    pub fn write_message(&mut self, msg: &Message) -> Result<u32, JamError> {
        self.with_lock(|base| {
            let count = base.slot_count()?;
            for (field, target) in [
                ("reply-to", msg.reply_to),
                ("first-reply", msg.reply_1st),
                ("next-reply", msg.reply_next),
            ] {
                if target > count {
                    return Err(JamError::InvalidReplyLink { field, target, count });
                }
            }
            let header = msg.to_header()?;
            let number = base.append(header, msg.text.as_bytes(), msg.to_crc())?;
            info!(
                "Stored message {} in {} from '{}' subject '{}'",
                number,
                base.path.display(),
                escape_log(&msg.from),
                escape_log(&msg.subject)
            );
            metrics::inc_messages_written();
            Ok(number)
        })
    }

    /// Append a prepared header and body. Caller holds the lock.
    pub(super) fn append(
        &mut self,
        mut header: MessageHeader,
        text: &[u8],
        to_crc: u32,
    ) -> Result<u32, JamError> {
        let count = self.slot_count()?;
        let number = count.checked_add(1).ok_or(JamError::TooLarge("message count"))?;
        let files = self.files()?;

        header.txt_len = u32::try_from(text.len()).map_err(|_| JamError::TooLarge("message text"))?;
        let text_offset = file_len(&files.text)?;
        header.offset = u32::try_from(text_offset)
            .ok()
            .filter(|off| off.checked_add(header.txt_len).is_some())
            .ok_or(JamError::TooLarge("text store"))?;
        header.message_number = self.fixed.base_msg_num.wrapping_add(count);

        let encoded = header.encode()?;
        let header_offset = file_len(&files.header)?;
        let header_offset = u32::try_from(header_offset)
            .ok()
            .filter(|off| u64::from(*off) + encoded.len() as u64 <= u64::from(u32::MAX))
            .ok_or(JamError::TooLarge("header store"))?;

        write_at(&files.text, text_offset, text)?;
        write_at(&files.header, u64::from(header_offset), &encoded)?;
        let rec = IndexRecord {
            to_crc,
            header_offset,
        };
        write_at(&files.index, IndexRecord::position(number), &rec.encode())?;

        if !header.is_deleted() {
            self.fixed.active_msgs = self.fixed.active_msgs.saturating_add(1);
        }
        self.fixed.touch();
        self.persist_fixed()?;
        Ok(number)
    }

    /// Soft-delete: flag the header, sentinel the index slot, decrement the active count.
    pub fn delete_message(&mut self, number: u32) -> Result<(), JamError> {
        self.with_lock(|base| {
            let rec = base.index_at(number)?;
            if rec.is_sentinel() {
                return Err(JamError::NotFound(number));
            }
            let (mut header, subfield_len) = base.read_fixed_at(rec.header_offset)?;
            let was_active = !header.is_deleted();
            header.attribute.insert(Attributes::DELETED);
            let files = base.files()?;
            write_at(
                &files.header,
                u64::from(rec.header_offset),
                &header.encode_fixed(subfield_len),
            )?;
            write_at(
                &files.index,
                IndexRecord::position(number),
                &IndexRecord::SENTINEL.encode(),
            )?;
            if was_active {
                base.fixed.active_msgs = base.fixed.active_msgs.saturating_sub(1);
            }
            base.fixed.touch();
            base.persist_fixed()?;
            info!("Deleted message {} in {}", number, base.path.display());
            metrics::inc_messages_deleted();
            Ok(())
        })
    }

    /// Count a read of `number`: bump times-read and set the read attribute in place.
    pub fn mark_read(&mut self, number: u32) -> Result<(), JamError> {
        self.with_lock(|base| {
            let rec = base.index_at(number)?;
            if rec.is_sentinel() {
                return Err(JamError::NotFound(number));
            }
            let (mut header, subfield_len) = base.read_fixed_at(rec.header_offset)?;
            header.times_read = header.times_read.saturating_add(1);
            header.attribute.insert(Attributes::READ);
            write_at(
                &base.files()?.header,
                u64::from(rec.header_offset),
                &header.encode_fixed(subfield_len),
            )?;
            base.fixed.touch();
            base.persist_fixed()
        })
    }

    /// Numbers of live messages addressed to `name` (case-insensitive).
    pub fn find_to(&mut self, name: &str) -> Result<Vec<u32>, JamError> {
        self.refresh()?;
        let crc = checksum_of(name);
        let mut found = Vec::new();
        for (i, rec) in self.read_index_all()?.iter().enumerate() {
            if rec.is_sentinel() || rec.to_crc != crc {
                continue;
            }
            let header = self.header_at(rec.header_offset)?;
            let matches = header
                .first_text(SubfieldKind::ReceiverName)
                .is_some_and(|to| to.eq_ignore_ascii_case(name));
            if matches {
                found.push(i as u32 + 1);
            }
        }
        Ok(found)
    }

    /// Number of the live message carrying MSGID `msg_id`, if any.
    pub fn find_by_msgid(&mut self, msg_id: &str) -> Result<Option<u32>, JamError> {
        self.refresh()?;
        let crc = checksum_of(msg_id);
        for (i, rec) in self.read_index_all()?.iter().enumerate() {
            if rec.is_sentinel() {
                continue;
            }
            let (fixed, _) = self.read_fixed_at(rec.header_offset)?;
            if fixed.msgid_crc != crc {
                continue;
            }
            let header = self.header_at(rec.header_offset)?;
            if header.first_text(SubfieldKind::MsgId).as_deref() == Some(msg_id) {
                return Ok(Some(i as u32 + 1));
            }
        }
        Ok(None)
    }

    /// Store the checksum of the base password; `None` clears it.
    pub fn set_password(&mut self, password: Option<&str>) -> Result<(), JamError> {
        self.with_lock(|base| {
            base.fixed.password_crc = password.map(checksum_of).unwrap_or(0);
            base.fixed.touch();
            base.persist_fixed()
        })
    }

    // ---- last-read store -----------------------------------------------------

    pub fn last_read_records(&mut self) -> Result<Vec<LastRead>, JamError> {
        self.refresh()?;
        self.last_read_all()
    }

    pub(super) fn last_read_all(&self) -> Result<Vec<LastRead>, JamError> {
        let mut bytes = Vec::new();
        let mut f = &self.files()?.last_read;
        f.seek(SeekFrom::Start(0))?;
        f.read_to_end(&mut bytes)?;
        Ok(bytes
            .chunks_exact(LAST_READ_SIZE)
            .map(|chunk| {
                let mut rec = [0u8; LAST_READ_SIZE];
                rec.copy_from_slice(chunk);
                LastRead::decode(&rec)
            })
            .collect())
    }

    /// Reading position of `user_name`/`user_id`, if the user has one in this base.
    pub fn last_read(
        &mut self,
        user_name: &str,
        user_id: u32,
    ) -> Result<Option<LastRead>, JamError> {
        let crc = checksum_of(user_name);
        Ok(self
            .last_read_records()?
            .into_iter()
            .find(|lr| lr.is_for(crc, user_id)))
    }

    /// Insert or replace the record keyed by its user checksum and id.
    pub fn set_last_read(&mut self, record: LastRead) -> Result<(), JamError> {
        self.with_lock(|base| {
            let records = base.last_read_all()?;
            let slot = records
                .iter()
                .position(|lr| lr.is_for(record.user_crc, record.user_id))
                .unwrap_or(records.len());
            write_at(
                &base.files()?.last_read,
                (slot * LAST_READ_SIZE) as u64,
                &record.encode(),
            )?;
            Ok(())
        })
    }

    pub(super) fn replace_last_read(&mut self, records: &[LastRead]) -> Result<(), JamError> {
        let files = self.files()?;
        files.last_read.set_len(0)?;
        let bytes: Vec<u8> = records.iter().flat_map(|lr| lr.encode()).collect();
        write_at(&files.last_read, 0, &bytes)?;
        Ok(())
    }
}

/// Exclusive access to a [`JamBase`] for the guard's lifetime.
pub struct ExclusiveGuard<'a> {
    base: &'a mut JamBase,
}

impl Deref for ExclusiveGuard<'_> {
    type Target = JamBase;

    fn deref(&self) -> &JamBase {
        self.base
    }
}

impl DerefMut for ExclusiveGuard<'_> {
    fn deref_mut(&mut self) -> &mut JamBase {
        self.base
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.base.lock.release() {
            warn!("Failed to release lock on {}: {}", self.base.path.display(), e);
        }
    }
}

/// Remove whichever of the four data files exist at `path`.
pub(super) fn remove_data_files(path: &Path) -> Result<(), JamError> {
    for ext in DATA_EXTENSIONS {
        match fs::remove_file(file_path(path, ext)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
