//! Scheduled maintenance for message areas.
//!
//! The scheduler owns no task or timer. The host calls
//! [`MaintenanceScheduler::check_and_run`] periodically (every minute is enough) and a
//! run happens when the clock sits on a UTC boundary of the configured frequency.
//! A run packs every area whose deleted share has reached the threshold, then
//! writes an archive of all areas and applies the retention policy.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::backup::{BackupManager, BackupType};
use super::jam::{CorruptionPolicy, JamBaseBuilder, PackReport};
use super::list_area_names;
use crate::config::MaintenanceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceFrequency {
    #[serde(rename = "disabled")]
    Disabled,
    /// Every hour at the top of the hour
    #[serde(rename = "hourly")]
    Hourly,
    /// Every 2 hours (0, 2, 4, ... 22)
    #[serde(rename = "2h")]
    Every2Hours,
    /// Every 4 hours (0, 4, 8, 12, 16, 20)
    #[serde(rename = "4h")]
    Every4Hours,
    /// Every 6 hours (0, 6, 12, 18)
    #[serde(rename = "6h")]
    Every6Hours,
    /// Every 12 hours (0, 12)
    #[serde(rename = "12h")]
    Every12Hours,
    /// Once daily at midnight UTC
    #[serde(rename = "daily")]
    Daily,
}

impl MaintenanceFrequency {
    pub fn minutes(&self) -> u32 {
        match self {
            MaintenanceFrequency::Disabled => 0,
            MaintenanceFrequency::Hourly => 60,
            MaintenanceFrequency::Every2Hours => 120,
            MaintenanceFrequency::Every4Hours => 240,
            MaintenanceFrequency::Every6Hours => 360,
            MaintenanceFrequency::Every12Hours => 720,
            MaintenanceFrequency::Daily => 1440,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MaintenanceFrequency::Disabled => "Disabled",
            MaintenanceFrequency::Hourly => "Every hour",
            MaintenanceFrequency::Every2Hours => "Every 2 hours",
            MaintenanceFrequency::Every4Hours => "Every 4 hours",
            MaintenanceFrequency::Every6Hours => "Every 6 hours",
            MaintenanceFrequency::Every12Hours => "Every 12 hours",
            MaintenanceFrequency::Daily => "Daily at midnight UTC",
        }
    }

    /// Parse from a string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "disabled" | "off" | "none" => Some(MaintenanceFrequency::Disabled),
            "hourly" | "1h" | "60m" => Some(MaintenanceFrequency::Hourly),
            "2h" | "2hours" => Some(MaintenanceFrequency::Every2Hours),
            "4h" | "4hours" => Some(MaintenanceFrequency::Every4Hours),
            "6h" | "6hours" => Some(MaintenanceFrequency::Every6Hours),
            "12h" | "12hours" => Some(MaintenanceFrequency::Every12Hours),
            "daily" | "1d" | "24h" => Some(MaintenanceFrequency::Daily),
            _ => None,
        }
    }

    /// True on the minute a run is due.
    pub fn is_boundary(&self, now: &DateTime<Utc>) -> bool {
        let hour = now.hour();
        if now.minute() != 0 {
            return false;
        }
        match self {
            MaintenanceFrequency::Disabled => false,
            MaintenanceFrequency::Hourly => true,
            MaintenanceFrequency::Every2Hours => hour % 2 == 0,
            MaintenanceFrequency::Every4Hours => hour % 4 == 0,
            MaintenanceFrequency::Every6Hours => hour % 6 == 0,
            MaintenanceFrequency::Every12Hours => hour % 12 == 0,
            MaintenanceFrequency::Daily => hour == 0,
        }
    }
}

/// What one maintenance run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub packed: Vec<(String, PackReport)>,
    /// Areas skipped because they could not be opened or scanned.
    pub skipped: Vec<String>,
    pub backup_id: Option<String>,
    pub retention_deleted: usize,
}

pub struct MaintenanceScheduler {
    config: MaintenanceConfig,
    messages_dir: PathBuf,
    lock_timeout: Duration,
    last_run: Option<DateTime<Utc>>,
    last_run_boundary_minute: Option<i64>,
}

impl MaintenanceScheduler {
    pub fn new(config: MaintenanceConfig, messages_dir: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            config,
            messages_dir,
            lock_timeout,
            last_run: None,
            last_run_boundary_minute: None,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn enable(&mut self) {
        self.config.enabled = true;
        info!("Scheduled maintenance enabled");
    }

    pub fn disable(&mut self) {
        self.config.enabled = false;
        info!("Scheduled maintenance disabled");
    }

    pub fn set_frequency(&mut self, frequency: MaintenanceFrequency) {
        self.config.frequency = frequency;
        info!("Maintenance frequency set to: {}", frequency.description());
    }

    /// Run maintenance if `now` is a due boundary not yet handled.
    ///
    /// Returns `Ok(None)` when nothing was due.
    pub fn check_and_run(&mut self, now: DateTime<Utc>) -> Result<Option<MaintenanceReport>> {
        if !self.config.enabled || !self.config.frequency.is_boundary(&now) {
            return Ok(None);
        }

        // Epoch minutes; one run per boundary minute however often we are polled
        let boundary_minute = now.timestamp() / 60;
        if self.last_run_boundary_minute == Some(boundary_minute) {
            debug!("Maintenance already ran in this minute boundary, skipping");
            return Ok(None);
        }
        self.last_run_boundary_minute = Some(boundary_minute);

        info!("Running scheduled maintenance ({})", self.config.frequency.description());
        self.run_now(now).map(Some)
    }

    /// Pack areas over the threshold, archive everything, apply retention.
    pub fn run_now(&mut self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        for area in list_area_names(&self.messages_dir)? {
            match self.pack_if_needed(&area) {
                Ok(Some(pack)) => report.packed.push((area, pack)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping maintenance of area {}: {}", area, e);
                    report.skipped.push(area);
                }
            }
        }

        let mut manager = BackupManager::new(
            self.messages_dir.clone(),
            PathBuf::from(&self.config.backup_dir),
            self.config.retention.clone(),
        )?
        .with_lock_timeout(self.lock_timeout);

        let backup_type = match self.config.frequency {
            MaintenanceFrequency::Daily => BackupType::Daily,
            _ => BackupType::Automatic,
        };
        let name = format!("auto_{}", now.format("%Y%m%d_%H%M%S"));
        let healthy: Vec<String> = list_area_names(&self.messages_dir)?
            .into_iter()
            .filter(|a| !report.skipped.contains(a))
            .collect();
        let metadata = manager.create_backup(Some(name), backup_type, Some(&healthy))?;
        info!("Automatic backup created: {} ({} bytes)", metadata.id, metadata.size_bytes);
        report.backup_id = Some(metadata.id);

        let deleted = manager.apply_retention_policy()?;
        if !deleted.is_empty() {
            info!("Retention policy deleted {} old backup(s)", deleted.len());
        }
        report.retention_deleted = deleted.len();

        self.last_run = Some(now);
        Ok(report)
    }

    fn pack_if_needed(&self, area: &str) -> Result<Option<PackReport>> {
        let mut base = JamBaseBuilder::new(self.messages_dir.join(area))
            .lock_timeout(self.lock_timeout)
            .on_corruption(CorruptionPolicy::Fail)
            .open()?;
        let stats = base.statistics()?;
        let threshold = u64::from(self.config.pack_threshold_percent);
        let over = stats.deleted > 0
            && u64::from(stats.deleted) * 100 >= threshold * u64::from(stats.total);
        if !over {
            debug!("Area {}: {} of {} deleted, below threshold", area, stats.deleted, stats.total);
            return Ok(None);
        }
        Ok(Some(base.pack()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backup::RetentionPolicy;
    use crate::storage::jam::{JamBase, Message};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn config(temp: &TempDir, frequency: MaintenanceFrequency) -> MaintenanceConfig {
        MaintenanceConfig {
            enabled: true,
            frequency,
            pack_threshold_percent: 50,
            backup_dir: temp.path().join("backups").to_string_lossy().into_owned(),
            retention: RetentionPolicy::default(),
        }
    }

    fn seed(messages: &std::path::Path, area: &str, total: u32, deleted: u32) {
        let mut base = JamBase::open(messages.join(area)).unwrap();
        for i in 0..total {
            base.write_message(&Message::new("a", "b", &format!("m{i}"), "x")).unwrap();
        }
        for n in 1..=deleted {
            base.delete_message(n).unwrap();
        }
    }

    #[test]
    fn test_frequency_parsing() {
        assert_eq!(MaintenanceFrequency::parse("disabled"), Some(MaintenanceFrequency::Disabled));
        assert_eq!(MaintenanceFrequency::parse("HOURLY"), Some(MaintenanceFrequency::Hourly));
        assert_eq!(MaintenanceFrequency::parse("2h"), Some(MaintenanceFrequency::Every2Hours));
        assert_eq!(MaintenanceFrequency::parse("daily"), Some(MaintenanceFrequency::Daily));
        assert_eq!(MaintenanceFrequency::parse("weekly"), None);
        assert_eq!(MaintenanceFrequency::Every6Hours.minutes(), 360);
    }

    #[test]
    fn test_boundaries() {
        let at = |h, m| Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap();
        assert!(MaintenanceFrequency::Hourly.is_boundary(&at(13, 0)));
        assert!(!MaintenanceFrequency::Hourly.is_boundary(&at(13, 1)));
        assert!(MaintenanceFrequency::Every4Hours.is_boundary(&at(8, 0)));
        assert!(!MaintenanceFrequency::Every4Hours.is_boundary(&at(6, 0)));
        assert!(MaintenanceFrequency::Daily.is_boundary(&at(0, 0)));
        assert!(!MaintenanceFrequency::Disabled.is_boundary(&at(0, 0)));
    }

    #[test]
    fn test_run_packs_over_threshold_and_archives() {
        let temp = TempDir::new().unwrap();
        let messages = temp.path().join("messages");
        seed(&messages, "busy", 4, 2);
        seed(&messages, "quiet", 4, 1);

        let mut scheduler = MaintenanceScheduler::new(
            config(&temp, MaintenanceFrequency::Daily),
            messages.clone(),
            Duration::from_millis(200),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let report = scheduler.check_and_run(now).unwrap().expect("due at midnight");

        assert_eq!(report.packed.len(), 1);
        assert_eq!(report.packed[0].0, "busy");
        assert_eq!(report.packed[0].1.after, 2);
        assert!(report.skipped.is_empty());
        assert!(report.backup_id.is_some());
        assert_eq!(scheduler.last_run(), Some(now));

        let mut quiet = JamBase::open(messages.join("quiet")).unwrap();
        assert_eq!(quiet.message_count().unwrap(), 4);

        // Same boundary minute again does nothing
        assert!(scheduler.check_and_run(now).unwrap().is_none());
    }

    #[test]
    fn test_hourly_archives_are_pruned() {
        let temp = TempDir::new().unwrap();
        let messages = temp.path().join("messages");
        seed(&messages, "general", 2, 0);
        let mut config = config(&temp, MaintenanceFrequency::Hourly);
        config.retention.automatic_count = 3;
        let mut scheduler =
            MaintenanceScheduler::new(config, messages.clone(), Duration::from_millis(200));

        for hour in 0..5 {
            let now = Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
            let report = scheduler.check_and_run(now).unwrap().expect("due on the hour");
            assert_eq!(report.retention_deleted, if hour < 3 { 0 } else { 1 });
            std::thread::sleep(Duration::from_millis(5));
        }

        let backups = temp.path().join("backups");
        let manager =
            BackupManager::new(messages, backups.clone(), RetentionPolicy::default()).unwrap();
        assert_eq!(manager.list_backups().len(), 3);
        assert!(manager.list_backups().iter().all(|b| b.backup_type == BackupType::Automatic));
        let archives = std::fs::read_dir(&backups)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map_or(false, |x| x == "gz"))
            .count();
        assert_eq!(archives, 3);
    }

    #[test]
    fn test_not_due_or_disabled() {
        let temp = TempDir::new().unwrap();
        let messages = temp.path().join("messages");
        seed(&messages, "general", 1, 0);
        let mut scheduler = MaintenanceScheduler::new(
            config(&temp, MaintenanceFrequency::Hourly),
            messages,
            Duration::from_millis(200),
        );
        let off_boundary = Utc.with_ymd_and_hms(2024, 3, 1, 5, 30, 0).unwrap();
        assert!(scheduler.check_and_run(off_boundary).unwrap().is_none());

        scheduler.disable();
        let on_boundary = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();
        assert!(scheduler.check_and_run(on_boundary).unwrap().is_none());
        assert!(!temp.path().join("backups").join("backups.json").exists());
    }
}
