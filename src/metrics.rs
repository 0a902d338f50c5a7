//! Process-wide counters for message base activity.
//! Cheap enough to bump on every operation; read them through [`snapshot`].
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static MESSAGES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static MESSAGES_READ: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DELETED: AtomicU64 = AtomicU64::new(0);
static PACKS: AtomicU64 = AtomicU64::new(0);
static LOCK_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static BASES_RECREATED: AtomicU64 = AtomicU64::new(0);

pub fn inc_messages_written() {
    MESSAGES_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_read() {
    MESSAGES_READ.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_deleted() {
    MESSAGES_DELETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packs() {
    PACKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lock_timeouts() {
    LOCK_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
/// A base was found corrupt on open and recreated empty.
pub fn inc_bases_recreated() {
    BASES_RECREATED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub messages_written: u64,
    pub messages_read: u64,
    pub messages_deleted: u64,
    pub packs: u64,
    pub lock_timeouts: u64,
    pub bases_recreated: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        messages_written: MESSAGES_WRITTEN.load(Ordering::Relaxed),
        messages_read: MESSAGES_READ.load(Ordering::Relaxed),
        messages_deleted: MESSAGES_DELETED.load(Ordering::Relaxed),
        packs: PACKS.load(Ordering::Relaxed),
        lock_timeouts: LOCK_TIMEOUTS.load(Ordering::Relaxed),
        bases_recreated: BASES_RECREATED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests run in parallel, so only monotonic growth is checked.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_packs();
        inc_lock_timeouts();
        inc_messages_written();
        let after = snapshot();
        assert!(after.packs > before.packs);
        assert!(after.lock_timeouts > before.lock_timeouts);
        assert!(after.messages_written > before.messages_written);
        assert!(after.messages_read >= before.messages_read);
    }
}
