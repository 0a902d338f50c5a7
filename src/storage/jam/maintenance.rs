//! Compaction, renumbering, statistics, verbatim backup and integrity checks.
//!
//! Pack commits through a staging base and a marker file:
//!
//! 1. write the compacted base to `<name>~pack.{jhr,jdt,jdx,jlr}` and fsync it
//! 2. create `<name>.jpk`
//! 3. rename each staged file over its original
//! 4. remove `<name>.jpk`
//!
//! [`recover_interrupted_pack`] runs on every open. With the marker present the
//! staged files are complete, so the remaining renames are finished; without it
//! any staged files are leftovers of an abandoned pack and are removed.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use super::base::{read_at, remove_data_files, JamBase};
use super::errors::JamError;
use super::fixed_header::{FixedHeader, FIXED_HEADER_SIZE};
use super::header::{Attributes, MessageHeader, MESSAGE_HEADER_SIZE};
use super::index::{LastRead, INDEX_RECORD_SIZE};
use super::{file_path, DATA_EXTENSIONS, EXT_LOCK, EXT_PACK_MARKER};
use crate::metrics;

/// Outcome of [`JamBase::pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackReport {
    /// Index slots before packing, deleted ones included.
    pub before: u32,
    /// Messages kept, now numbered `1..=after`.
    pub after: u32,
    pub removed: u32,
}

/// Counts and file sizes from a full header scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaseStatistics {
    pub total: u32,
    pub active: u32,
    pub deleted: u32,
    pub private: u32,
    pub echo: u32,
    pub netmail: u32,
    pub local: u32,
    pub header_bytes: u64,
    pub text_bytes: u64,
    pub index_bytes: u64,
    pub last_read_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    /// Slot the issue belongs to; `None` for base-wide problems.
    pub number: Option<u32>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub messages_checked: u32,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, number: Option<u32>, detail: impl Into<String>) {
        self.issues.push(IntegrityIssue {
            number,
            detail: detail.into(),
        });
    }
}

/// Path prefix of the staging base used while packing `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push("~pack");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sync_dir(path: &Path) {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }
}

/// Finish or discard a pack that was interrupted before its marker was removed.
pub fn recover_interrupted_pack(path: &Path) -> Result<(), JamError> {
    let staging = staging_path(path);
    let marker = file_path(path, EXT_PACK_MARKER);
    if marker.exists() {
        warn!("Completing interrupted pack of {}", path.display());
        for ext in DATA_EXTENSIONS {
            let staged = file_path(&staging, ext);
            if staged.exists() {
                fs::rename(&staged, file_path(path, ext))?;
            }
        }
        sync_dir(path);
        fs::remove_file(&marker)?;
    } else {
        let mut removed = false;
        for ext in DATA_EXTENSIONS {
            removed |= remove_if_exists(&file_path(&staging, ext))?;
        }
        if removed {
            warn!("Discarded staged files of an abandoned pack of {}", path.display());
        }
    }
    remove_if_exists(&file_path(&staging, EXT_LOCK))?;
    Ok(())
}

/// New pointer for `ptr` given the sorted old numbers of the surviving messages.
fn remap_pointer(survivors: &[u32], ptr: u32) -> u32 {
    survivors.partition_point(|&old| old <= ptr) as u32
}

fn remap_link(survivors: &[u32], link: u32) -> u32 {
    match survivors.binary_search(&link) {
        Ok(i) if link != 0 => i as u32 + 1,
        _ => 0,
    }
}

impl JamBase {
    /// Discard deleted messages and renumber the rest contiguously from 1.
    pub fn pack(&mut self) -> Result<PackReport, JamError> {
        self.with_lock(|base| {
            let staging = staging_path(&base.path);
            let built = base.build_packed(&staging);
            let (survivors, before) = match built {
                Ok(v) => v,
                Err(e) => {
                    let _ = remove_data_files(&staging);
                    let _ = remove_if_exists(&file_path(&staging, EXT_LOCK));
                    return Err(e);
                }
            };

            let marker = file_path(&base.path, EXT_PACK_MARKER);
            File::create(&marker)?.sync_all()?;
            sync_dir(&base.path);
            base.files = None;
            for ext in DATA_EXTENSIONS {
                fs::rename(file_path(&staging, ext), file_path(&base.path, ext))?;
            }
            sync_dir(&base.path);
            fs::remove_file(&marker)?;
            remove_if_exists(&file_path(&staging, EXT_LOCK))?;
            base.open_files()?;

            let report = PackReport {
                before,
                after: survivors.len() as u32,
                removed: before - survivors.len() as u32,
            };
            info!(
                "Packed {}: {} slots -> {} messages ({} removed)",
                base.path.display(),
                report.before,
                report.after,
                report.removed
            );
            metrics::inc_packs();
            Ok(report)
        })
    }

    /// Write the compacted copy to `staging`; returns surviving old numbers and the old slot count.
    fn build_packed(&self, staging: &Path) -> Result<(Vec<u32>, u32), JamError> {
        let records = self.read_index_all()?;
        let before = records.len() as u32;

        let mut survivors = Vec::new();
        for (i, rec) in records.iter().enumerate() {
            if rec.is_sentinel() {
                continue;
            }
            let (header, _) = self.read_fixed_at(rec.header_offset)?;
            if !header.is_deleted() {
                survivors.push(i as u32 + 1);
            }
        }

        let mut packed = JamBase::create_with(staging.to_path_buf(), self.options.clone())?;
        packed.fixed = FixedHeader {
            active_msgs: 0,
            ..self.fixed.clone()
        };
        for &old in &survivors {
            let rec = records[(old - 1) as usize];
            let mut header = self.header_at(rec.header_offset)?;
            let text = self.read_text(&header)?;
            header.reply_to = remap_link(&survivors, header.reply_to);
            header.reply_1st = remap_link(&survivors, header.reply_1st);
            header.reply_next = remap_link(&survivors, header.reply_next);
            packed.append(header, &text, rec.to_crc)?;
        }

        let last_read: Vec<LastRead> = self
            .last_read_all()?
            .into_iter()
            .map(|mut lr| {
                lr.last_read = remap_pointer(&survivors, lr.last_read);
                lr.high_read = remap_pointer(&survivors, lr.high_read);
                lr
            })
            .collect();
        packed.replace_last_read(&last_read)?;

        packed.fixed.mod_counter = self.fixed.mod_counter.wrapping_add(1);
        packed.persist_fixed()?;
        packed.sync()?;
        packed.close();
        debug!("Staged packed copy of {} at {}", self.path.display(), staging.display());
        Ok((survivors, before))
    }

    /// Reset the base message number to 1. Index and headers are untouched.
    pub fn renumber(&mut self) -> Result<(), JamError> {
        self.with_lock(|base| {
            base.fixed.base_msg_num = 1;
            base.fixed.touch();
            base.persist_fixed()?;
            info!("Renumbered {}", base.path.display());
            Ok(())
        })
    }

    /// Scan every header in the header store, reachable or not.
    pub fn statistics(&mut self) -> Result<BaseStatistics, JamError> {
        self.refresh()?;
        let files = self.files()?;
        let mut stats = BaseStatistics {
            header_bytes: files.header.metadata()?.len(),
            text_bytes: files.text.metadata()?.len(),
            index_bytes: files.index.metadata()?.len(),
            last_read_bytes: files.last_read.metadata()?.len(),
            ..BaseStatistics::default()
        };
        stats.total_bytes =
            stats.header_bytes + stats.text_bytes + stats.index_bytes + stats.last_read_bytes;

        let mut pos = FIXED_HEADER_SIZE as u64;
        let mut block = [0u8; MESSAGE_HEADER_SIZE];
        while pos < stats.header_bytes {
            if pos + MESSAGE_HEADER_SIZE as u64 > stats.header_bytes {
                return Err(JamError::Corrupt(format!(
                    "trailing {} bytes at end of header store",
                    stats.header_bytes - pos
                )));
            }
            read_at(&files.header, pos, &mut block)?;
            let (header, subfield_len) = MessageHeader::decode_fixed(&block)?;
            stats.total += 1;
            if header.is_deleted() {
                stats.deleted += 1;
            } else {
                let attr = header.attribute;
                stats.active += 1;
                stats.private += u32::from(attr.contains(Attributes::PRIVATE));
                stats.echo += u32::from(attr.contains(Attributes::TYPE_ECHO));
                stats.netmail += u32::from(attr.contains(Attributes::TYPE_NET));
                stats.local += u32::from(attr.contains(Attributes::LOCAL));
            }
            pos += MESSAGE_HEADER_SIZE as u64 + u64::from(subfield_len);
        }
        Ok(stats)
    }

    /// Copy the four files verbatim to `dest` with the same extensions. Takes no lock.
    pub fn backup(&mut self, dest: impl AsRef<Path>) -> Result<Vec<PathBuf>, JamError> {
        self.refresh()?;
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut written = Vec::with_capacity(DATA_EXTENSIONS.len());
        for ext in DATA_EXTENSIONS {
            let target = file_path(dest, ext);
            fs::copy(file_path(&self.path, ext), &target)?;
            written.push(target);
        }
        info!("Backed up {} to {}", self.path.display(), dest.display());
        Ok(written)
    }

    /// Check cross-file consistency without modifying anything.
    pub fn verify(&mut self) -> Result<IntegrityReport, JamError> {
        self.refresh()?;
        let files = self.files()?;
        let mut report = IntegrityReport::default();

        let mut raw = [0u8; FIXED_HEADER_SIZE];
        let fixed = match read_at(&files.header, 0, &mut raw)
            .map_err(JamError::from)
            .and_then(|_| FixedHeader::decode(&raw))
        {
            Ok(fixed) => fixed,
            Err(e) => {
                report.push(None, format!("fixed header: {e}"));
                return Ok(report);
            }
        };

        let index_len = files.index.metadata()?.len();
        if index_len % INDEX_RECORD_SIZE as u64 != 0 {
            report.push(
                None,
                format!("index store is {index_len} bytes, not a multiple of {INDEX_RECORD_SIZE}"),
            );
        }
        let header_len = files.header.metadata()?.len();
        let text_len = files.text.metadata()?.len();
        let records = self.read_index_all()?;
        let count = records.len() as u32;

        let mut active = 0u32;
        for (i, rec) in records.iter().enumerate() {
            let number = i as u32 + 1;
            if rec.is_sentinel() {
                continue;
            }
            report.messages_checked += 1;
            if u64::from(rec.header_offset) < FIXED_HEADER_SIZE as u64
                || u64::from(rec.header_offset) >= header_len
            {
                report.push(
                    Some(number),
                    format!("header offset {} outside header store", rec.header_offset),
                );
                continue;
            }
            let header = match self.header_at(rec.header_offset) {
                Ok(h) => h,
                Err(e) => {
                    report.push(Some(number), e.to_string());
                    continue;
                }
            };
            if !header.is_deleted() {
                active += 1;
            }
            if u64::from(header.offset) + u64::from(header.txt_len) > text_len {
                report.push(
                    Some(number),
                    format!(
                        "text range {}+{} outside text store of {text_len} bytes",
                        header.offset, header.txt_len
                    ),
                );
            }
            for (field, link) in [
                ("reply-to", header.reply_to),
                ("first-reply", header.reply_1st),
                ("next-reply", header.reply_next),
            ] {
                if link > count {
                    let issue = format!("{field} link {link} beyond {count} messages");
                    report.push(Some(number), issue);
                }
            }
        }
        if active != fixed.active_msgs {
            report.push(
                None,
                format!(
                    "active counter {} but {} live messages found",
                    fixed.active_msgs, active
                ),
            );
        }

        if report.is_ok() {
            info!(
                "Verified {}: {} messages, no issues",
                self.path.display(),
                report.messages_checked
            );
        } else {
            warn!("Verified {}: {} issue(s)", self.path.display(), report.issues.len());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::jam::base::JamBaseBuilder;
    use crate::storage::jam::index::IndexRecord;
    use crate::storage::jam::Message;
    use std::time::Duration;

    fn open(dir: &tempfile::TempDir) -> JamBase {
        JamBaseBuilder::new(dir.path().join("area"))
            .lock_timeout(Duration::from_millis(50))
            .open()
            .unwrap()
    }

    #[test]
    fn pointer_remap_picks_highest_survivor_below() {
        let survivors = [2, 4, 7];
        assert_eq!(remap_pointer(&survivors, 0), 0);
        assert_eq!(remap_pointer(&survivors, 1), 0);
        assert_eq!(remap_pointer(&survivors, 4), 2);
        assert_eq!(remap_pointer(&survivors, 6), 2);
        assert_eq!(remap_pointer(&survivors, 9), 3);
    }

    #[test]
    fn link_remap_drops_removed_targets() {
        let survivors = [2, 4, 7];
        assert_eq!(remap_link(&survivors, 0), 0);
        assert_eq!(remap_link(&survivors, 3), 0);
        assert_eq!(remap_link(&survivors, 7), 3);
    }

    #[test]
    fn pack_remaps_reply_links() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        base.write_message(&Message::new("a", "b", "doomed", "x")).unwrap();
        base.write_message(&Message::new("a", "b", "root", "y")).unwrap();
        let mut reply = Message::new("b", "a", "Re: root", "z");
        reply.reply_to = 2;
        base.write_message(&reply).unwrap();
        let mut orphan = Message::new("b", "a", "Re: doomed", "w");
        orphan.reply_to = 1;
        base.write_message(&orphan).unwrap();
        base.delete_message(1).unwrap();

        let report = base.pack().unwrap();
        assert_eq!(report, PackReport { before: 4, after: 3, removed: 1 });
        assert_eq!(base.read_message(2).unwrap().reply_to, 1);
        assert_eq!(base.read_message(3).unwrap().reply_to, 0);
        assert!(base.verify().unwrap().is_ok());
    }

    #[test]
    fn pack_keeps_fixed_header_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        base.set_password(Some("secret")).unwrap();
        base.write_message(&Message::new("a", "b", "c", "d")).unwrap();
        let before = base.fixed_header().unwrap().clone();
        base.pack().unwrap();
        let after = base.fixed_header().unwrap();
        assert_eq!(after.date_created, before.date_created);
        assert_eq!(after.password_crc, before.password_crc);
        assert_eq!(after.base_msg_num, before.base_msg_num);
        assert!(after.mod_counter > before.mod_counter);
        assert!(!file_path(&staging_path(base.path()), "jhr").exists());
    }

    #[test]
    fn statistics_classify_live_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        let mut echo = Message::new("a", "All", "echo", "1");
        echo.attributes = Attributes::TYPE_ECHO;
        base.write_message(&echo).unwrap();
        let mut private = Message::new("a", "b", "private", "22");
        private.attributes |= Attributes::PRIVATE;
        base.write_message(&private).unwrap();
        base.write_message(&Message::new("a", "b", "gone", "333")).unwrap();
        base.delete_message(3).unwrap();

        let stats = base.statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.echo, 1);
        assert_eq!(stats.private, 1);
        assert_eq!(stats.local, 1);
        assert_eq!(stats.netmail, 0);
        assert_eq!(stats.text_bytes, 6);
        assert_eq!(stats.index_bytes, 24);
        assert_eq!(
            stats.total_bytes,
            stats.header_bytes + stats.text_bytes + stats.index_bytes + stats.last_read_bytes
        );
    }

    #[test]
    fn renumber_resets_base_number_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        base.write_message(&Message::new("a", "b", "c", "d")).unwrap();
        let index_before = fs::read(file_path(base.path(), "jdx")).unwrap();
        base.renumber().unwrap();
        assert_eq!(base.fixed_header().unwrap().base_msg_num, 1);
        assert_eq!(fs::read(file_path(base.path(), "jdx")).unwrap(), index_before);
    }

    #[test]
    fn verify_flags_counter_drift() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        base.write_message(&Message::new("a", "b", "c", "d")).unwrap();
        base.fixed.active_msgs = 5;
        base.persist_fixed().unwrap();
        let report = base.verify().unwrap();
        assert_eq!(report.messages_checked, 1);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].number, None);
    }

    #[test]
    fn abandoned_staging_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("area");
        drop(open(&dir));
        let staging = staging_path(&path);
        fs::write(file_path(&staging, "jhr"), b"partial").unwrap();
        recover_interrupted_pack(&path).unwrap();
        assert!(!file_path(&staging, "jhr").exists());
        assert!(file_path(&path, "jhr").exists());
    }

    #[test]
    fn index_records_survive_pack_with_receiver_crc() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = open(&dir);
        base.write_message(&Message::new("a", "Zed", "c", "d")).unwrap();
        base.write_message(&Message::new("a", "Bob", "c", "d")).unwrap();
        base.delete_message(1).unwrap();
        base.pack().unwrap();
        let rec: IndexRecord = base.read_index(1).unwrap();
        assert_eq!(rec.to_crc, crate::storage::jam::checksum_of("bob"));
        assert_eq!(base.find_to("BOB").unwrap(), vec![1]);
    }
}
