// =============================================================================
// Signal queue — pre-market hold for out-of-session signals
// =============================================================================
//
// Keyed by `symbol|direction`; only the highest-confidence signal per key is
// retained. Entries expire `max_queue_age + 240 min` past queue time, which
// covers the full pre-market window. The queue drains back into the pipeline
// at OPENING or MORNING.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::runtime_config::QueueParams;
use crate::types::Signal;

/// Additional hold past `max_queue_age` covering the pre-market window.
const PRE_MARKET_GRACE_MINUTES: i64 = 240;

#[derive(Debug, Clone)]
struct QueuedSignal {
    signal: Signal,
    queued_at: DateTime<Utc>,
}

pub struct SignalQueue {
    entries: Mutex<HashMap<String, QueuedSignal>>,
    max_age: Duration,
}

impl SignalQueue {
    pub fn new(params: &QueueParams) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age: Duration::minutes(params.max_queue_age_minutes + PRE_MARKET_GRACE_MINUTES),
        }
    }

    fn key(signal: &Signal) -> String {
        format!("{}|{}", signal.symbol, signal.direction)
    }

    /// Offer a signal. The highest-confidence signal per `symbol|direction`
    /// wins; a lower-confidence duplicate is dropped. Returns whether the
    /// signal was retained.
    pub fn offer(&self, signal: Signal, now: DateTime<Utc>) -> bool {
        let key = Self::key(&signal);
        let mut entries = self.entries.lock();
        self.sweep_locked(&mut entries, now);

        let held_confidence = entries.get(&key).map(|q| q.signal.confidence);
        match held_confidence {
            Some(held) if held >= signal.confidence => {
                debug!(
                    key,
                    held_confidence = held,
                    offered_confidence = signal.confidence,
                    "queue kept higher-confidence signal"
                );
                false
            }
            _ => {
                info!(
                    key,
                    signal_id = %signal.id,
                    confidence = signal.confidence,
                    "signal queued for session open"
                );
                entries.insert(
                    key,
                    QueuedSignal {
                        signal,
                        queued_at: now,
                    },
                );
                true
            }
        }
    }

    /// Drain every live entry for re-entry into the pipeline at DECISION.
    pub fn drain(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let mut entries = self.entries.lock();
        self.sweep_locked(&mut entries, now);
        let drained: Vec<Signal> = entries.drain().map(|(_, q)| q.signal).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "signal queue drained");
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn sweep_locked(&self, entries: &mut HashMap<String, QueuedSignal>, now: DateTime<Utc>) {
        entries.retain(|key, q| {
            let live = now - q.queued_at <= self.max_age;
            if !live {
                debug!(key, signal_id = %q.signal.id, "queued signal expired");
            }
            live
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalizer::tests_support::minimal_signal;

    fn params() -> QueueParams {
        QueueParams::default()
    }

    #[test]
    fn highest_confidence_wins_per_key() {
        let queue = SignalQueue::new(&params());
        let now = Utc::now();

        let mut low = minimal_signal("SPY");
        low.confidence = 72.0;
        let mut high = minimal_signal("SPY");
        high.confidence = 91.0;
        let high_id = high.id.clone();

        assert!(queue.offer(low, now));
        assert!(queue.offer(high, now));
        // A weaker late arrival does not displace the held signal.
        let mut mid = minimal_signal("SPY");
        mid.confidence = 80.0;
        assert!(!queue.offer(mid, now));

        let drained = queue.drain(now);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, high_id);
    }

    #[test]
    fn different_directions_hold_separately() {
        let queue = SignalQueue::new(&params());
        let now = Utc::now();

        let bull = minimal_signal("SPY");
        let mut bear = minimal_signal("SPY");
        bear.direction = crate::types::Direction::Bearish;

        queue.offer(bull, now);
        queue.offer(bear, now);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn entries_expire_past_window() {
        let queue = SignalQueue::new(&params());
        let queued_at = Utc::now();
        queue.offer(minimal_signal("SPY"), queued_at);

        // Just inside the 90 + 240 minute window.
        let inside = queued_at + Duration::minutes(329);
        assert_eq!(queue.len(), 1);
        let drained = queue.drain(inside);
        assert_eq!(drained.len(), 1);

        // Re-queue and jump past the window.
        queue.offer(minimal_signal("SPY"), queued_at);
        let outside = queued_at + Duration::minutes(331);
        assert!(queue.drain(outside).is_empty());
    }
}
