//! # Storage Module - Message Area Hosting
//!
//! Each message area is a JAM message base under the data directory:
//!
//! ```text
//! data/
//! ├── messages/       ← one JAM base per area (general.jhr, general.jdt, ...)
//! └── backups/        ← tar.gz archives and backups.json
//! ```
//!
//! [`Storage`] is the async face the session layer talks to. Open bases are cached
//! per area behind a `tokio::sync::Mutex`, and every engine call runs on the
//! blocking pool so disk I/O and lock waits never stall the runtime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jambbs::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Storage::new("./data").await?;
//!
//!     let number = storage
//!         .store_message("general", "alice", "All", "Hello", "Hello, everyone!")
//!         .await?;
//!
//!     let recent = storage.get_messages("general", 10).await?;
//!     assert_eq!(recent[0].number, number);
//!     Ok(())
//! }
//! ```
//!
//! ## Security Features
//!
//! - **Path Validation**: area names are restricted before they become paths
//! - **Input Sanitization**: names are length-checked, bodies stripped of control characters
//! - **Size Limits**: configurable limit on message body size

pub mod backup;
pub mod jam;
pub mod maintenance;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::validation::{
    sanitize_message_content, secure_area_path, validate_area_name, validate_participant_name,
};
use jam::{
    file_path, BaseStatistics, CorruptionPolicy, IntegrityReport, JamBase, JamBaseBuilder,
    JamError, LastRead, Message, PackReport, EXT_HEADER,
};

/// Longest subject accepted from posters.
pub const MAX_SUBJECT_BYTES: usize = 72;

/// Shared handle to one open area.
pub type AreaHandle = Arc<Mutex<JamBase>>;

/// Main storage interface
pub struct Storage {
    data_dir: PathBuf,
    max_message_bytes: usize,
    lock_timeout: Duration,
    on_corruption: CorruptionPolicy,
    areas: Mutex<HashMap<String, AreaHandle>>,
}

/// Names of the areas with a header store in `messages_dir`, sorted.
pub fn list_area_names(messages_dir: &Path) -> std::io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(messages_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".jhr")) else {
            continue;
        };
        // Skips pack staging files and anything not created through an area name.
        if validate_area_name(stem).map(|v| v == stem).unwrap_or(false) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

impl Storage {
    /// Initialize storage with the given data directory
    pub async fn new(data_dir: &str) -> Result<Self> {
        fs::create_dir_all(data_dir).await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", data_dir, e))?;
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(data_dir.join("messages")).await?;

        Ok(Storage {
            data_dir,
            max_message_bytes: 16 * 1024,
            lock_timeout: Duration::from_secs(5),
            on_corruption: CorruptionPolicy::Recreate,
            areas: Mutex::new(HashMap::new()),
        })
    }

    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut storage = Self::new(&config.data_dir).await?;
        storage.max_message_bytes = config.max_message_size;
        storage.lock_timeout = config.lock_timeout();
        storage.on_corruption = config.on_corruption;
        Ok(storage)
    }

    pub fn base_dir(&self) -> &Path { &self.data_dir }

    pub fn messages_dir(&self) -> PathBuf { self.data_dir.join("messages") }

    pub fn set_max_message_bytes(&mut self, max: usize) { self.max_message_bytes = max; }

    pub fn set_lock_timeout(&mut self, timeout: Duration) { self.lock_timeout = timeout; }

    pub fn set_corruption_policy(&mut self, policy: CorruptionPolicy) { self.on_corruption = policy; }

    /// Open (creating if needed) the base for `area` and cache it.
    pub async fn open_area(&self, area: &str) -> Result<AreaHandle> {
        let name = validate_area_name(area)
            .map_err(|e| anyhow!("Invalid area name: {}", e))?;
        let mut areas = self.areas.lock().await;
        if let Some(handle) = areas.get(&name) {
            return Ok(handle.clone());
        }

        let path = secure_area_path(&self.data_dir, &name)
            .map_err(|e| anyhow!("Path validation failed: {}", e))?;
        let builder = JamBaseBuilder::new(path)
            .lock_timeout(self.lock_timeout)
            .on_corruption(self.on_corruption);
        let base = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| anyhow!("Message base task failed: {}", e))?
            .with_context(|| format!("Failed to open area '{}'", name))?;

        let handle = Arc::new(Mutex::new(base));
        areas.insert(name, handle.clone());
        Ok(handle)
    }

    /// Whether `area` has a base on disk; never creates one.
    pub async fn area_exists(&self, area: &str) -> Result<bool> {
        let path = secure_area_path(&self.data_dir, area)
            .map_err(|e| anyhow!("Invalid area name: {}", e))?;
        Ok(fs::try_exists(file_path(&path, EXT_HEADER)).await?)
    }

    pub async fn list_areas(&self) -> Result<Vec<String>> {
        let dir = self.messages_dir();
        tokio::task::spawn_blocking(move || list_area_names(&dir))
            .await
            .map_err(|e| anyhow!("Message base task failed: {}", e))?
            .map_err(|e| anyhow!("Failed to list message areas: {}", e))
    }

    /// Run `f` against the area's base on the blocking pool, holding its handle mutex.
    async fn with_base<T, F>(&self, area: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut JamBase) -> Result<T, JamError> + Send + 'static,
    {
        let handle = self.open_area(area).await?;
        let mut base = handle.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut *base))
            .await
            .map_err(|e| anyhow!("Message base task failed: {}", e))?
            .with_context(|| format!("Message area '{}'", area))
    }

    /// Post a local message; returns its number.
    pub async fn store_message(
        &self,
        area: &str,
        from: &str,
        to: &str,
        subject: &str,
        content: &str,
    ) -> Result<u32> {
        self.store(area, Message::new(from, to, subject, content)).await
    }

    /// Validate and append a fully built message.
    pub async fn store(&self, area: &str, mut message: Message) -> Result<u32> {
        validate_participant_name(&message.from)
            .map_err(|e| anyhow!("Invalid sender: {}", e))?;
        validate_participant_name(&message.to)
            .map_err(|e| anyhow!("Invalid receiver: {}", e))?;
        message.subject = sanitize_message_content(&message.subject, MAX_SUBJECT_BYTES)
            .map_err(|e| anyhow!("Invalid subject: {}", e))?
            .replace(['\r', '\n', '\t'], " ");
        message.text = sanitize_message_content(&message.text, self.max_message_bytes)
            .map_err(|e| anyhow!("Invalid message content: {}", e))?;

        self.with_base(area, move |base| base.write_message(&message)).await
    }

    /// Message `number`, or `None` if it was deleted.
    pub async fn get_message(&self, area: &str, number: u32) -> Result<Option<Message>> {
        self.with_base(area, move |base| match base.read_message(number) {
            Ok(msg) => Ok(Some(msg)),
            Err(JamError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    /// Up to `limit` live messages, newest first.
    pub async fn get_messages(&self, area: &str, limit: usize) -> Result<Vec<Message>> {
        if !self.area_exists(area).await? {
            return Ok(Vec::new());
        }
        self.with_base(area, move |base| {
            let mut messages = Vec::new();
            let mut number = base.message_count()?;
            while number > 0 && messages.len() < limit {
                match base.read_message(number) {
                    Ok(msg) if !msg.is_deleted() => messages.push(msg),
                    Ok(_) | Err(JamError::NotFound(_)) => {}
                    Err(e) => {
                        warn!("Skipping unreadable message {} in {}: {}", number, base.path().display(), e);
                    }
                }
                number -= 1;
            }
            Ok(messages)
        })
        .await
    }

    /// Soft-delete; `false` when there is no such live message.
    pub async fn delete_message(&self, area: &str, number: u32) -> Result<bool> {
        self.with_base(area, move |base| match base.delete_message(number) {
            Ok(()) => Ok(true),
            Err(JamError::NotFound(_)) | Err(JamError::InvalidMessageNumber { .. }) => Ok(false),
            Err(e) => Err(e),
        })
        .await
    }

    pub async fn pack_area(&self, area: &str) -> Result<PackReport> {
        self.with_base(area, |base| base.pack()).await
    }

    pub async fn renumber_area(&self, area: &str) -> Result<()> {
        self.with_base(area, |base| base.renumber()).await
    }

    pub async fn area_statistics(&self, area: &str) -> Result<BaseStatistics> {
        self.with_base(area, |base| base.statistics()).await
    }

    pub async fn verify_area(&self, area: &str) -> Result<IntegrityReport> {
        self.with_base(area, |base| base.verify()).await
    }

    /// Verbatim copy of the area's four files to `dest`, taken under the area's lock.
    pub async fn backup_area(&self, area: &str, dest: PathBuf) -> Result<Vec<PathBuf>> {
        self.with_base(area, move |base| {
            let mut guard = base.exclusive()?;
            let written = guard.backup(&dest)?;
            Ok(written)
        })
        .await
    }

    pub async fn last_read(&self, area: &str, user: &str, user_id: u32) -> Result<Option<LastRead>> {
        let user = user.to_string();
        self.with_base(area, move |base| base.last_read(&user, user_id)).await
    }

    /// Record that `user` has read message `number`.
    pub async fn mark_read(&self, area: &str, user: &str, user_id: u32, number: u32) -> Result<LastRead> {
        let user = user.to_string();
        self.with_base(area, move |base| {
            base.mark_read(number)?;
            let mut record = base
                .last_read(&user, user_id)?
                .unwrap_or_else(|| LastRead::for_user(&user, user_id));
            record.mark(number);
            base.set_last_read(record)?;
            Ok(record)
        })
        .await
    }

    /// Close every cached base. Clones of an [`AreaHandle`] still held elsewhere are
    /// closed too and report [`JamError::NotOpen`]; the next call for the area reopens it.
    pub async fn close_all(&self) {
        let drained: Vec<(String, AreaHandle)> = self.areas.lock().await.drain().collect();
        for (name, handle) in drained {
            handle.lock().await.close();
            info!("Closed message area {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_listing_ignores_staging_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["general.jhr", "tech.jhr", "tech.jdt", "general~pack.jhr", "notes.txt", "Upper.jhr"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(list_area_names(dir.path()).unwrap(), vec!["general", "tech"]);
        assert!(list_area_names(&dir.path().join("missing")).unwrap().is_empty());
    }
}
