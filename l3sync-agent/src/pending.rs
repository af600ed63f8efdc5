//! Notification accumulators shared between the coordinator and a device.
//!
//! Notification handlers may run while a pass is in flight. Everything here
//! is therefore safe to touch from any task: pending sets are monotonic
//! accumulators with drain-and-clear semantics, flags are atomics.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::status::PassSummary;

/// Thread-safe set of router ids.
///
/// Duplicate or out-of-order inserts are harmless; a drained id that still
/// needs work is simply inserted again.
#[derive(Debug, Default)]
pub struct PendingSet {
    ids: Mutex<HashSet<String>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // Poisoning is ignored: every mutation is a single HashSet call.
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, id: impl Into<String>) {
        self.lock().insert(id.into());
    }

    pub fn extend<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().extend(ids.into_iter().map(Into::into));
    }

    /// Take every id and leave the set empty.
    pub fn drain(&self) -> HashSet<String> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Per-device state that notification handlers and status readers may touch.
#[derive(Debug)]
pub struct DeviceSignals {
    pub pending_updated: PendingSet,
    pub pending_removed: PendingSet,
    needs_full_resync: AtomicBool,
    backlogged: AtomicBool,
    last_pass: Mutex<Option<PassSummary>>,
    router_count: Mutex<usize>,
}

impl Default for DeviceSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSignals {
    /// Fresh signals: a new device always starts with a full resync.
    pub fn new() -> Self {
        Self {
            pending_updated: PendingSet::new(),
            pending_removed: PendingSet::new(),
            needs_full_resync: AtomicBool::new(true),
            backlogged: AtomicBool::new(false),
            last_pass: Mutex::new(None),
            router_count: Mutex::new(0),
        }
    }

    pub fn needs_full_resync(&self) -> bool {
        self.needs_full_resync.load(Ordering::SeqCst)
    }

    pub fn request_full_resync(&self) {
        self.needs_full_resync.store(true, Ordering::SeqCst);
    }

    /// Clear the flag and return its previous value.
    pub fn take_full_resync(&self) -> bool {
        self.needs_full_resync.swap(false, Ordering::SeqCst)
    }

    pub fn is_backlogged(&self) -> bool {
        self.backlogged.load(Ordering::SeqCst)
    }

    pub fn set_backlogged(&self, backlogged: bool) {
        self.backlogged.store(backlogged, Ordering::SeqCst);
    }

    pub fn last_pass(&self) -> Option<PassSummary> {
        self.last_pass
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn record_pass(&self, summary: PassSummary) {
        *self.last_pass.lock().unwrap_or_else(|e| e.into_inner()) = Some(summary);
    }

    pub fn router_count(&self) -> usize {
        *self.router_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_router_count(&self, count: usize) {
        *self.router_count.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_clears() {
        let set = PendingSet::new();
        set.extend(["r1", "r2"]);
        set.insert("r1");
        assert_eq!(set.len(), 2);

        let drained = set.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.contains("r1"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_are_not_lost() {
        let set = Arc::new(PendingSet::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..100 {
                        set.insert(format!("r{}-{}", t, i));
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..10 {
            seen.extend(set.drain());
        }
        for h in handles {
            h.join().unwrap();
        }
        seen.extend(set.drain());
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_signals_start_in_full_resync() {
        let signals = DeviceSignals::new();
        assert!(signals.needs_full_resync());
        assert!(!signals.is_backlogged());

        assert!(signals.take_full_resync());
        assert!(!signals.needs_full_resync());
        assert!(!signals.take_full_resync());

        signals.request_full_resync();
        assert!(signals.needs_full_resync());
    }
}
