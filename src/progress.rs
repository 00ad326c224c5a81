//! Observable state of a running sweep.
//!
//! Many producers (the sweep worker, digest workers, depot readers) feed one
//! consumer (a UI polling loop). Pushing never blocks and draining an empty
//! queue returns immediately.

use crate::depot::DepotFileRecord;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// =============================================================================
// Outcome records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionStatus {
    Deleted,
    /// Destructive updates were disabled.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRecord {
    pub path: String,
    pub status: DeletionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    /// Destructive updates were disabled.
    Skipped,
    Failed(String),
}

/// A mismatched file and what happened when it was re-fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub path: String,
    pub depot_digest: String,
    /// Empty when the file was missing locally or hashing was skipped.
    pub local_digest: String,
    pub status: SyncStatus,
}

// =============================================================================
// Queues and counters
// =============================================================================

/// Unbounded multi-producer queue with a non-blocking drain.
#[derive(Debug)]
pub struct ProgressQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Default for ProgressQueue<T> {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl<T> ProgressQueue<T> {
    pub fn push(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(item);
    }

    /// Everything queued so far.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Digest counters, advanced from worker threads.
#[derive(Debug, Default)]
pub struct DigestCounters {
    total: AtomicU64,
    completed: AtomicU64,
    bytes_hashed: AtomicU64,
}

impl DigestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn complete_one(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_hashed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// SweepProgress
// =============================================================================

#[derive(Debug, Default)]
pub struct SweepProgress {
    opened: ProgressQueue<String>,
    have: ProgressQueue<DepotFileRecord>,
    deleted: ProgressQueue<DeletionRecord>,
    synced: ProgressQueue<SyncRecord>,
    errors: ProgressQueue<String>,
    status: Mutex<String>,
    digests: Arc<DigestCounters>,
}

impl SweepProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_opened(&self, path: String) {
        self.opened.push(path);
    }

    pub fn push_have(&self, record: DepotFileRecord) {
        self.have.push(record);
    }

    pub fn push_deleted(&self, record: DeletionRecord) {
        self.deleted.push(record);
    }

    pub fn push_synced(&self, record: SyncRecord) {
        self.synced.push(record);
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn drain_opened(&self) -> Vec<String> {
        self.opened.drain()
    }

    pub fn drain_have(&self) -> Vec<DepotFileRecord> {
        self.have.drain()
    }

    pub fn drain_deleted(&self) -> Vec<DeletionRecord> {
        self.deleted.drain()
    }

    pub fn drain_synced(&self) -> Vec<SyncRecord> {
        self.synced.drain()
    }

    /// Meant to be drained once the worker has finished.
    pub fn drain_errors(&self) -> Vec<String> {
        self.errors.drain()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.status_lock() = status.into();
    }

    pub fn status(&self) -> String {
        self.status_lock().clone()
    }

    pub fn digests(&self) -> &Arc<DigestCounters> {
        &self.digests
    }

    fn status_lock(&self) -> MutexGuard<'_, String> {
        // A writer that panicked mid-assignment still leaves a valid String.
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_returns_items_in_push_order() {
        let progress = SweepProgress::new();
        progress.push_opened("a".to_string());
        progress.push_opened("b".to_string());
        assert_eq!(progress.drain_opened(), vec!["a", "b"]);
        assert!(progress.drain_opened().is_empty());
    }

    #[test]
    fn test_many_producers_one_consumer() {
        let progress = Arc::new(SweepProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let progress = progress.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        progress.push_deleted(DeletionRecord {
                            path: format!("{t}/{i}"),
                            status: DeletionStatus::Skipped,
                        });
                        progress.digests().complete_one();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(progress.drain_deleted().len(), 800);
        assert_eq!(progress.digests().completed(), 800);
    }

    #[test]
    fn test_status_and_errors() {
        let progress = SweepProgress::new();
        assert_eq!(progress.status(), "");
        progress.set_status("Hashing files...");
        assert_eq!(progress.status(), "Hashing files...");

        assert!(!progress.has_errors());
        progress.push_error("boom");
        assert!(progress.has_errors());
        assert_eq!(progress.drain_errors(), vec!["boom"]);
    }

    #[test]
    fn test_digest_counters() {
        let counters = DigestCounters::new();
        counters.add_total(3);
        counters.complete_one();
        counters.add_bytes(1024);
        counters.add_bytes(1);
        assert_eq!(counters.total(), 3);
        assert_eq!(counters.completed(), 1);
        assert_eq!(counters.bytes_hashed(), 1025);
    }
}
