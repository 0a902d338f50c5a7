use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use jambbs::storage::jam::{JamBase, JamBaseBuilder, JamError, Message};

#[test]
fn held_lock_times_out_other_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("general");
    let mut holder = JamBase::create(&path).unwrap();
    let mut other = JamBaseBuilder::new(&path)
        .lock_timeout(Duration::from_millis(50))
        .open()
        .unwrap();

    {
        let mut guard = holder.exclusive().unwrap();
        guard
            .write_message(&Message::new("a", "b", "inside guard", ""))
            .unwrap();

        let started = Instant::now();
        let err = other
            .write_message(&Message::new("c", "d", "blocked", ""))
            .unwrap_err();
        assert!(matches!(err, JamError::Locked(_)), "unexpected error: {err}");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!other.is_locked());
    }

    // Guard dropped: the other handle gets through and sees the first write.
    assert!(!holder.is_locked());
    assert_eq!(
        other.write_message(&Message::new("c", "d", "after", "")).unwrap(),
        2
    );
}

#[test]
fn lock_is_reentrant_per_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let mut base = JamBase::create(tmp.path().join("general")).unwrap();
    base.lock().unwrap();
    base.lock().unwrap();
    base.write_message(&Message::new("a", "b", "nested", "")).unwrap();
    base.unlock().unwrap();
    assert!(base.is_locked());
    base.unlock().unwrap();
    assert!(!base.is_locked());
}

#[test]
fn failed_write_releases_the_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let mut base = JamBase::create(tmp.path().join("general")).unwrap();
    let mut bad = Message::new("a", "b", "dangling", "");
    bad.reply_to = 5;
    assert!(matches!(
        base.write_message(&bad),
        Err(JamError::InvalidReplyLink { target: 5, .. })
    ));
    assert!(!base.is_locked());
    assert_eq!(base.message_count().unwrap(), 0);
}

#[test]
fn concurrent_writers_get_distinct_numbers() {
    const WRITERS: u32 = 4;
    const PER_WRITER: u32 = 25;

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("busy");
    drop(JamBase::create(&path).unwrap());

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let path = path.clone();
            thread::spawn(move || {
                let mut base = JamBase::open(&path).expect("open");
                (0..PER_WRITER)
                    .map(|i| {
                        let subject = format!("w{w} m{i}");
                        base.write_message(&Message::new("node", "All", &subject, &subject))
                            .expect("write")
                    })
                    .collect::<Vec<u32>>()
            })
        })
        .collect();

    let mut numbers = HashSet::new();
    for h in handles {
        for n in h.join().unwrap() {
            assert!(numbers.insert(n), "number {n} handed out twice");
        }
    }

    let mut base = JamBase::open(&path).unwrap();
    let total = WRITERS * PER_WRITER;
    assert_eq!(base.message_count().unwrap(), total);
    assert_eq!(base.active_message_count().unwrap(), total);
    assert_eq!(numbers, (1..=total).collect());
    for n in 1..=total {
        let msg = base.read_message(n).unwrap();
        assert_eq!(msg.subject, msg.text);
    }
    assert!(base.verify().unwrap().is_ok());
}
