use jambbs::config::Config;
use jambbs::storage::jam::{JamBase, JamError, Message};
use jambbs::storage::Storage;

async fn storage_in(tmp: &tempfile::TempDir) -> Storage {
    let data_dir = tmp.path().to_string_lossy().to_string();
    Storage::new(&data_dir).await.expect("storage new")
}

#[tokio::test]
async fn post_read_and_list_newest_first() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;

    for i in 1..=3 {
        let n = storage
            .store_message("general", "alice", "All", &format!("post {i}"), "body")
            .await
            .unwrap();
        assert_eq!(n, i);
    }
    storage.delete_message("general", 2).await.unwrap();

    let listed = storage.get_messages("general", 10).await.unwrap();
    let numbers: Vec<u32> = listed.iter().map(|m| m.number).collect();
    assert_eq!(numbers, vec![3, 1]);
    assert_eq!(storage.get_messages("general", 1).await.unwrap().len(), 1);

    assert!(storage.get_message("general", 2).await.unwrap().is_none());
    assert_eq!(
        storage.get_message("general", 3).await.unwrap().unwrap().subject,
        "post 3"
    );
    assert_eq!(storage.list_areas().await.unwrap(), vec!["general"]);
}

#[tokio::test]
async fn missing_area_lists_empty_without_creating() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    assert!(storage.get_messages("nowhere", 5).await.unwrap().is_empty());
    assert!(!storage.area_exists("nowhere").await.unwrap());
    assert!(storage.list_areas().await.unwrap().is_empty());
}

#[tokio::test]
async fn input_is_validated_and_sanitized() {
    let tmp = tempfile::tempdir().unwrap();
    let mut storage = storage_in(&tmp).await;
    storage.set_max_message_bytes(20);

    assert!(storage.store_message("../etc", "a", "b", "s", "t").await.is_err());
    assert!(storage.store_message("con", "a", "b", "s", "t").await.is_err());
    assert!(storage
        .store_message("general", &"x".repeat(40), "b", "s", "t")
        .await
        .is_err());
    assert!(storage
        .store_message("general", "a", "b", "s", &"y".repeat(21))
        .await
        .is_err());

    let n = storage
        .store_message("General", "a", "b", "two\nlines", "ok\u{7}\rfine")
        .await
        .unwrap();
    let msg = storage.get_message("general", n).await.unwrap().unwrap();
    assert_eq!(msg.subject, "two lines");
    assert_eq!(msg.text, "ok\rfine");
}

#[tokio::test]
async fn delete_reports_missing_messages() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    storage.store_message("general", "a", "b", "s", "t").await.unwrap();
    assert!(storage.delete_message("general", 1).await.unwrap());
    assert!(!storage.delete_message("general", 1).await.unwrap());
    assert!(!storage.delete_message("general", 9).await.unwrap());
}

#[tokio::test]
async fn mark_read_tracks_pointers_and_survives_pack() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    for i in 0..4 {
        storage
            .store_message("general", "a", "All", &format!("m{i}"), "t")
            .await
            .unwrap();
    }
    storage.mark_read("general", "Bob", 3, 4).await.unwrap();
    storage.mark_read("general", "Bob", 3, 2).await.unwrap();
    let lr = storage.last_read("general", "bob", 3).await.unwrap().unwrap();
    assert_eq!((lr.last_read, lr.high_read), (2, 4));
    assert_eq!(
        storage.get_message("general", 2).await.unwrap().unwrap().times_read,
        1
    );

    storage.delete_message("general", 1).await.unwrap();
    let report = storage.pack_area("general").await.unwrap();
    assert_eq!(report.removed, 1);
    let lr = storage.last_read("general", "bob", 3).await.unwrap().unwrap();
    assert_eq!((lr.last_read, lr.high_read), (1, 3));

    let stats = storage.area_statistics("general").await.unwrap();
    assert_eq!((stats.total, stats.active), (3, 3));
    assert!(storage.verify_area("general").await.unwrap().is_ok());
}

#[tokio::test]
async fn concurrent_posts_through_shared_storage() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = std::sync::Arc::new(storage_in(&tmp).await);

    let mut tasks = Vec::new();
    for user in 0..8 {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..5 {
                storage
                    .store_message("busy", &format!("user{user}"), "All", &format!("{i}"), "t")
                    .await
                    .unwrap();
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    let stats = storage.area_statistics("busy").await.unwrap();
    assert_eq!(stats.active, 40);
}

#[tokio::test]
async fn storage_writes_are_visible_to_engine_handles() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    storage.store_message("general", "a", "b", "from storage", "t").await.unwrap();

    let path = storage.messages_dir().join("general");
    let mut direct = JamBase::open(&path).unwrap();
    assert_eq!(direct.read_message(1).unwrap().subject, "from storage");
    direct
        .write_message(&Message::new("c", "d", "from engine", ""))
        .unwrap();

    assert_eq!(
        storage.get_message("general", 2).await.unwrap().unwrap().subject,
        "from engine"
    );
    storage.close_all().await;
}

#[tokio::test]
async fn backup_area_copies_four_files() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    storage.store_message("general", "a", "b", "s", "keep me").await.unwrap();

    let dest = tmp.path().join("copies").join("general-copy");
    let written = storage.backup_area("general", dest.clone()).await.unwrap();
    assert_eq!(written.len(), 4);

    let mut copy = JamBase::open(&dest).unwrap();
    assert_eq!(copy.read_message(1).unwrap().text, "keep me");
}

#[tokio::test]
async fn corrupt_area_error_keeps_engine_cause() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = tmp.path().to_string_lossy().to_string();
    config.storage.on_corruption = jambbs::storage::jam::CorruptionPolicy::Fail;
    let storage = Storage::from_config(&config.storage).await.unwrap();

    std::fs::write(storage.messages_dir().join("broken.jhr"), b"JAM\0short").unwrap();
    for ext in ["jdt", "jdx", "jlr"] {
        std::fs::write(storage.messages_dir().join(format!("broken.{ext}")), b"").unwrap();
    }

    let err = storage.get_messages("broken", 5).await.unwrap_err();
    let cause = err.downcast_ref::<JamError>().expect("engine error in chain");
    assert!(cause.is_corruption());
}

#[tokio::test]
async fn close_all_closes_handles_held_elsewhere() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage_in(&tmp).await;
    storage.store_message("general", "a", "b", "s", "t").await.unwrap();

    let held = storage.open_area("general").await.unwrap();
    storage.close_all().await;
    assert!(matches!(held.lock().await.message_count(), Err(JamError::NotOpen)));

    // A fresh call goes through a new handle.
    assert_eq!(storage.get_message("general", 1).await.unwrap().unwrap().subject, "s");
}
