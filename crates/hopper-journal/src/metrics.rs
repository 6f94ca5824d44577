//! Internal counters for journal activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the journal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalMetricsSnapshot {
    pub items_appended: u64,
    pub bytes_appended: u64,
    pub fsyncs: u64,
    pub rotations: u64,
    pub files_truncated: u64,
    pub files_deleted: u64,
    pub files_archived: u64,
    pub checkpoints: u64,
}

/// Relaxed atomic counters updated by the journal as it works.
///
/// The journal never exports these itself; callers pull a
/// [`JournalMetricsSnapshot`] and feed whatever monitoring system they use.
#[derive(Debug, Default)]
pub struct JournalMetrics {
    items_appended: AtomicU64,
    bytes_appended: AtomicU64,
    fsyncs: AtomicU64,
    rotations: AtomicU64,
    files_truncated: AtomicU64,
    files_deleted: AtomicU64,
    files_archived: AtomicU64,
    checkpoints: AtomicU64,
}

impl JournalMetrics {
    #[inline]
    pub fn record_append(&self, bytes: u64) {
        self.items_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_fsync(&self) {
        self.fsyncs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_truncated(&self) {
        self.files_truncated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_archived(&self) {
        self.files_archived.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JournalMetricsSnapshot {
        JournalMetricsSnapshot {
            items_appended: self.items_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            fsyncs: self.fsyncs.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            files_truncated: self.files_truncated.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            files_archived: self.files_archived.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = JournalMetrics::default();
        metrics.record_append(10);
        metrics.record_append(32);
        metrics.incr_fsync();
        metrics.incr_rotation();
        metrics.incr_truncated();
        metrics.incr_deleted();
        metrics.incr_archived();
        metrics.incr_checkpoint();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_appended, 2);
        assert_eq!(snapshot.bytes_appended, 42);
        assert_eq!(snapshot.fsyncs, 1);
        assert_eq!(snapshot.rotations, 1);
        assert_eq!(snapshot.files_truncated, 1);
        assert_eq!(snapshot.files_deleted, 1);
        assert_eq!(snapshot.files_archived, 1);
        assert_eq!(snapshot.checkpoints, 1);
    }
}
