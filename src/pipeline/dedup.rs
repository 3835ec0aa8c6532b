// =============================================================================
// Deduplication cache — atomic check-and-set per fingerprint
// =============================================================================
//
// A fingerprint is a duplicate when it was inserted within the last
// `duplicate_window`. Entries persist for `expiry` before the sweep drops
// them. Check + insert happen under one lock so two concurrent requests can
// never both come back non-duplicate.
//
// Per-process by design; a shared KV with the same check-and-set contract is
// the seam for horizontal scaling.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

const DUPLICATE_WINDOW: Duration = Duration::from_secs(60);
const ENTRY_EXPIRY: Duration = Duration::from_secs(300);

pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    duplicate_window: Duration,
    expiry: Duration,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_windows(DUPLICATE_WINDOW, ENTRY_EXPIRY)
    }

    pub fn with_windows(duplicate_window: Duration, expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            duplicate_window,
            expiry,
        }
    }

    /// Atomic check-and-set. Returns `true` when `fingerprint` was seen
    /// within the duplicate window; otherwise records it and returns `false`.
    pub fn check_and_set(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        // Opportunistic sweep keeps the map bounded without a timer task.
        entries.retain(|_, inserted| now.duration_since(*inserted) <= self.expiry);

        let inserted_at = entries.get(fingerprint).copied();
        match inserted_at {
            Some(at) if now.duration_since(at) <= self.duplicate_window => {
                debug!(fingerprint = &fingerprint[..12.min(fingerprint.len())], "duplicate signal suppressed");
                true
            }
            _ => {
                entries.insert(fingerprint.to_string(), now);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_insert_is_not_duplicate() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_set("fp-1"));
        assert!(cache.check_and_set("fp-1"));
        assert!(!cache.check_and_set("fp-2"));
    }

    #[test]
    fn duplicate_window_expires() {
        let cache =
            DedupCache::with_windows(Duration::from_millis(30), Duration::from_millis(200));
        assert!(!cache.check_and_set("fp"));
        assert!(cache.check_and_set("fp"));
        std::thread::sleep(Duration::from_millis(50));
        // Window passed: no longer a duplicate, entry refreshed.
        assert!(!cache.check_and_set("fp"));
        assert!(cache.check_and_set("fp"));
    }

    #[test]
    fn entries_swept_after_expiry() {
        let cache =
            DedupCache::with_windows(Duration::from_millis(10), Duration::from_millis(30));
        cache.check_and_set("a");
        cache.check_and_set("b");
        assert_eq!(cache.len(), 2);
        std::thread::sleep(Duration::from_millis(50));
        cache.check_and_set("c");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_checks_admit_exactly_one() {
        let cache = Arc::new(DedupCache::new());
        let admitted = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let admitted = admitted.clone();
            handles.push(std::thread::spawn(move || {
                if !cache.check_and_set("same-fingerprint") {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
