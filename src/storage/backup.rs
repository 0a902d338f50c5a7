//! Archive backups of message areas.
//!
//! Each archive is a tar.gz holding `messages/<area>.{jhr,jdt,jdx,jlr}` for every
//! captured area. Areas are copied with [`JamBase::backup`] while the base's
//! exclusive lock is held, so an archive never contains a half-written message.
//! Archive metadata (type, SHA-256, areas) lives in `backups.json` next to the archives.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::{Archive, Builder};

use super::jam::{file_path, CorruptionPolicy, JamBaseBuilder, EXT_HEADER};
use super::list_area_names;

/// Backup metadata recorded in `backups.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Unique backup identifier (timestamp-based)
    pub id: String,
    /// Human-readable name (optional)
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub backup_type: BackupType,
    /// SHA256 checksum for verification
    pub checksum: String,
    pub verified: bool,
    /// Areas captured in the archive
    pub areas: Vec<String>,
    /// Path to backup file (relative to backup directory)
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Manual,
    Automatic,
    Daily,
    Weekly,
    Monthly,
}

/// How many archives of each scheduled type are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub daily_count: usize,
    pub weekly_count: usize,
    pub monthly_count: usize,
    /// Archives taken by hourly or weekly maintenance runs.
    #[serde(default = "default_automatic_count")]
    pub automatic_count: usize,
    /// Manual archives are never pruned and cannot be deleted while set.
    pub keep_manual: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_count: 7,
            weekly_count: 4,
            monthly_count: 12,
            automatic_count: default_automatic_count(),
            keep_manual: true,
        }
    }
}

fn default_automatic_count() -> usize {
    24
}

pub struct BackupManager {
    /// Directory holding the area bases (`<data_dir>/messages`)
    messages_dir: PathBuf,
    backup_path: PathBuf,
    retention: RetentionPolicy,
    lock_timeout: Duration,
    backups: HashMap<String, BackupMetadata>,
}

impl BackupManager {
    pub fn new(messages_dir: PathBuf, backup_path: PathBuf, retention: RetentionPolicy) -> io::Result<Self> {
        fs::create_dir_all(&backup_path)?;

        let mut manager = Self {
            messages_dir,
            backup_path,
            retention,
            lock_timeout: Duration::from_secs(5),
            backups: HashMap::new(),
        };
        manager.load_metadata()?;
        Ok(manager)
    }

    /// Bound for waiting on each area's lock while it is copied.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn load_metadata(&mut self) -> io::Result<()> {
        let metadata_path = self.backup_path.join("backups.json");

        if metadata_path.exists() {
            let contents = fs::read_to_string(&metadata_path)?;
            self.backups = serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        Ok(())
    }

    fn save_metadata(&self) -> io::Result<()> {
        let metadata_path = self.backup_path.join("backups.json");
        let contents = serde_json::to_string_pretty(&self.backups)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&metadata_path, contents)?;
        Ok(())
    }

    /// Archive `areas`, or every area under the messages directory when `None`.
    pub fn create_backup(
        &mut self,
        name: Option<String>,
        backup_type: BackupType,
        areas: Option<&[String]>,
    ) -> Result<BackupMetadata> {
        let timestamp = Utc::now();
        let id = format!("backup_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let filename = format!("{}.tar.gz", id);
        let backup_file = self.backup_path.join(&filename);

        let areas: Vec<String> = match areas {
            Some(list) => list.to_vec(),
            None => list_area_names(&self.messages_dir)?,
        };
        log::info!("Creating backup: {} (type: {:?}, {} area(s))", id, backup_type, areas.len());

        let staging = self.backup_path.join(format!(".staging_{}", id));
        fs::create_dir_all(&staging)?;
        let archived = self.stage_and_archive(&areas, &staging, &backup_file);
        let _ = fs::remove_dir_all(&staging);
        if let Err(e) = archived {
            let _ = fs::remove_file(&backup_file);
            return Err(e);
        }

        // Checksum only after the archive is completely written
        let checksum = calculate_checksum(&backup_file)?;
        let size_bytes = fs::metadata(&backup_file)?.len();

        let metadata = BackupMetadata {
            id: id.clone(),
            name,
            created_at: timestamp,
            size_bytes,
            backup_type,
            checksum,
            verified: false,
            areas,
            path: PathBuf::from(&filename),
        };

        self.backups.insert(id.clone(), metadata.clone());
        self.save_metadata()?;

        log::info!("Backup created successfully: {} ({} bytes)", id, size_bytes);

        Ok(metadata)
    }

    fn stage_and_archive(&self, areas: &[String], staging: &Path, backup_file: &Path) -> Result<()> {
        for area in areas {
            let path = self.messages_dir.join(area);
            if !file_path(&path, EXT_HEADER).exists() {
                return Err(anyhow!("Area '{}' has no message base", area));
            }
            // Damaged bases are reported, never recreated, while archiving.
            let mut base = JamBaseBuilder::new(&path)
                .lock_timeout(self.lock_timeout)
                .on_corruption(CorruptionPolicy::Fail)
                .open()
                .map_err(|e| anyhow!("Failed to open area '{}': {}", area, e))?;
            let mut guard = base.exclusive()?;
            guard.backup(staging.join(area))?;
        }

        let tar_gz = File::create(backup_file)?;
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = Builder::new(enc);
        tar.append_dir_all("messages", staging)?;
        let enc = tar.into_inner()?;
        enc.finish()?;
        Ok(())
    }

    pub fn verify_backup(&mut self, backup_id: &str) -> io::Result<bool> {
        let metadata = self.backups.get(backup_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Backup not found"))?;

        let backup_file = self.backup_path.join(&metadata.path);
        if !backup_file.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "Backup file missing"));
        }

        let valid = calculate_checksum(&backup_file)? == metadata.checksum;

        if valid {
            log::info!("Backup verification passed: {}", backup_id);
            if let Some(meta) = self.backups.get_mut(backup_id) {
                meta.verified = true;
            }
            self.save_metadata()?;
        } else {
            log::error!("Backup verification FAILED: {} (checksum mismatch)", backup_id);
        }

        Ok(valid)
    }

    /// Unpack into `restore_path`; bases land in `restore_path/messages/`.
    pub fn restore_backup(&self, backup_id: &str, restore_path: &Path) -> io::Result<()> {
        let metadata = self.backups.get(backup_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Backup not found"))?;

        let backup_file = self.backup_path.join(&metadata.path);
        if !backup_file.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "Backup file missing"));
        }

        log::info!("Restoring backup: {} to {:?}", backup_id, restore_path);

        if calculate_checksum(&backup_file)? != metadata.checksum {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Backup checksum mismatch"));
        }

        fs::create_dir_all(restore_path)?;
        let dec = GzDecoder::new(File::open(&backup_file)?);
        Archive::new(dec).unpack(restore_path)?;

        log::info!("Backup restored successfully: {}", backup_id);
        Ok(())
    }

    /// Prune scheduled archives beyond the retention counts; returns removed ids.
    pub fn apply_retention_policy(&mut self) -> io::Result<Vec<String>> {
        let mut deleted = Vec::new();

        for (kind, keep) in [
            (BackupType::Daily, self.retention.daily_count),
            (BackupType::Weekly, self.retention.weekly_count),
            (BackupType::Monthly, self.retention.monthly_count),
            (BackupType::Automatic, self.retention.automatic_count),
        ] {
            let mut of_kind: Vec<_> = self.backups.values()
                .filter(|b| b.backup_type == kind)
                .collect();
            of_kind.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            deleted.extend(of_kind.iter().skip(keep).map(|b| b.id.clone()));
        }

        for backup_id in &deleted {
            if let Some(metadata) = self.backups.remove(backup_id) {
                let backup_file = self.backup_path.join(&metadata.path);
                if backup_file.exists() {
                    fs::remove_file(&backup_file)?;
                    log::info!("Deleted old backup: {}", backup_id);
                }
            }
        }

        if !deleted.is_empty() {
            self.save_metadata()?;
        }

        Ok(deleted)
    }

    /// All archives, newest first.
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let mut backups: Vec<_> = self.backups.values().cloned().collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        backups
    }

    pub fn get_backup(&self, backup_id: &str) -> Option<&BackupMetadata> {
        self.backups.get(backup_id)
    }

    pub fn delete_backup(&mut self, backup_id: &str) -> io::Result<()> {
        let metadata = self.backups.get(backup_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Backup not found"))?;

        if metadata.backup_type == BackupType::Manual && self.retention.keep_manual {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied,
                "Cannot delete manual backups (retention policy)"));
        }

        let backup_file = self.backup_path.join(&metadata.path);
        self.backups.remove(backup_id);
        if backup_file.exists() {
            fs::remove_file(&backup_file)?;
        }

        self.save_metadata()?;
        log::info!("Deleted backup: {}", backup_id);
        Ok(())
    }

    pub fn get_stats(&self) -> BackupStats {
        let mut stats = BackupStats {
            total_backups: self.backups.len(),
            ..BackupStats::default()
        };

        for backup in self.backups.values() {
            stats.total_size_bytes += backup.size_bytes;

            match backup.backup_type {
                BackupType::Manual => stats.manual_count += 1,
                BackupType::Automatic => stats.automatic_count += 1,
                BackupType::Daily => stats.daily_count += 1,
                BackupType::Weekly => stats.weekly_count += 1,
                BackupType::Monthly => stats.monthly_count += 1,
            }

            if backup.verified {
                stats.verified_count += 1;
            }
        }

        stats.latest_backup = self.backups.values().map(|b| b.created_at).max();
        stats
    }
}

/// SHA256 of a file, hex encoded
fn calculate_checksum(path: &Path) -> io::Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size_bytes: u64,
    pub manual_count: usize,
    pub automatic_count: usize,
    pub daily_count: usize,
    pub weekly_count: usize,
    pub monthly_count: usize,
    pub verified_count: usize,
    pub latest_backup: Option<DateTime<Utc>>,
}
