use jambbs::storage::backup::{BackupManager, BackupType, RetentionPolicy};
use jambbs::storage::jam::{JamBase, Message};
use jambbs::storage::Storage;

async fn seeded_storage(tmp: &tempfile::TempDir) -> Storage {
    let data_dir = tmp.path().join("data");
    let storage = Storage::new(data_dir.to_str().unwrap()).await.unwrap();
    storage.store_message("general", "alice", "All", "hello", "first").await.unwrap();
    storage.store_message("tech", "bob", "All", "rust", "second").await.unwrap();
    storage.close_all().await;
    storage
}

#[tokio::test]
async fn archive_restore_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = seeded_storage(&tmp).await;
    let mut manager = BackupManager::new(
        storage.messages_dir(),
        tmp.path().join("backups"),
        RetentionPolicy::default(),
    )
    .unwrap();

    let meta = manager
        .create_backup(Some("before upgrade".into()), BackupType::Manual, None)
        .unwrap();
    assert_eq!(meta.areas, vec!["general", "tech"]);
    assert!(manager.verify_backup(&meta.id).unwrap());

    let restore = tmp.path().join("restore");
    manager.restore_backup(&meta.id, &restore).unwrap();
    let mut base = JamBase::open(restore.join("messages").join("tech")).unwrap();
    assert_eq!(base.read_message(1).unwrap().text, "second");

    // Metadata survives a new manager instance.
    let reloaded = BackupManager::new(
        storage.messages_dir(),
        tmp.path().join("backups"),
        RetentionPolicy::default(),
    )
    .unwrap();
    assert!(reloaded.get_backup(&meta.id).unwrap().verified);
    assert_eq!(reloaded.get_stats().manual_count, 1);
}

#[tokio::test]
async fn archive_of_selected_areas_only() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = seeded_storage(&tmp).await;
    let mut manager = BackupManager::new(
        storage.messages_dir(),
        tmp.path().join("backups"),
        RetentionPolicy::default(),
    )
    .unwrap();

    let meta = manager
        .create_backup(None, BackupType::Automatic, Some(&["tech".to_string()]))
        .unwrap();
    let restore = tmp.path().join("restore");
    manager.restore_backup(&meta.id, &restore).unwrap();
    assert!(restore.join("messages").join("tech.jhr").exists());
    assert!(!restore.join("messages").join("general.jhr").exists());

    assert!(manager
        .create_backup(None, BackupType::Automatic, Some(&["missing".to_string()]))
        .is_err());
    assert_eq!(manager.list_backups().len(), 1);
}

#[tokio::test]
async fn tampered_archive_fails_verification() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = seeded_storage(&tmp).await;
    let backups = tmp.path().join("backups");
    let mut manager =
        BackupManager::new(storage.messages_dir(), backups.clone(), RetentionPolicy::default())
            .unwrap();
    let meta = manager.create_backup(None, BackupType::Daily, None).unwrap();

    std::fs::write(backups.join(&meta.path), b"not an archive").unwrap();
    assert!(!manager.verify_backup(&meta.id).unwrap());
    assert!(manager.restore_backup(&meta.id, &tmp.path().join("r")).is_err());
}

#[tokio::test]
async fn archive_waits_for_area_lock_and_reports_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = seeded_storage(&tmp).await;
    let mut manager = BackupManager::new(
        storage.messages_dir(),
        tmp.path().join("backups"),
        RetentionPolicy::default(),
    )
    .unwrap()
    .with_lock_timeout(std::time::Duration::from_millis(50));

    let mut holder = JamBase::open(storage.messages_dir().join("general")).unwrap();
    holder.lock().unwrap();
    assert!(manager.create_backup(None, BackupType::Manual, None).is_err());
    holder.unlock().unwrap();

    holder
        .write_message(&Message::new("carol", "All", "late", ""))
        .unwrap();
    let meta = manager.create_backup(None, BackupType::Manual, None).unwrap();
    assert_eq!(meta.areas.len(), 2);
}
