use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait AntiReplayCache: Send + Sync {
    /// Records `fingerprint` and returns whether it had been seen before.
    fn seen_before(&self, fingerprint: &[u8]) -> bool;
}

#[derive(Debug, Default)]
pub struct NoopAntiReplayCache;

impl AntiReplayCache for NoopAntiReplayCache {
    fn seen_before(&self, _fingerprint: &[u8]) -> bool {
        false
    }
}

#[derive(Debug)]
struct TimeEntry {
    instant: Instant,
    fingerprint: Box<[u8]>,
}

#[derive(Debug)]
struct Entries {
    by_age: VecDeque<TimeEntry>,
    known: HashSet<Box<[u8]>>,
}

/// Remembers fingerprints for `ttl`, keeping at most `max_entries`; the
/// oldest entries are evicted first.
#[derive(Debug)]
pub struct TimedAntiReplayCache {
    entries: Mutex<Entries>,
    max_entries: usize,
    ttl: Duration,
}

impl TimedAntiReplayCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let initial_capacity = max_entries.min(2000);
        Self {
            entries: Mutex::new(Entries {
                by_age: VecDeque::with_capacity(initial_capacity),
                known: HashSet::with_capacity(initial_capacity),
            }),
            max_entries,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_at(&self, fingerprint: &[u8], now: Instant) -> bool {
        let mut entries = self.entries.lock();

        while let Some(time_entry) = entries.by_age.front() {
            if now.saturating_duration_since(time_entry.instant) < self.ttl {
                break;
            }
            if let Some(expired) = entries.by_age.pop_front() {
                entries.known.remove(&expired.fingerprint);
            }
        }

        if entries.known.contains(fingerprint) {
            return true;
        }

        if self.max_entries == 0 {
            return false;
        }
        while entries.by_age.len() >= self.max_entries {
            match entries.by_age.pop_front() {
                Some(evicted) => {
                    entries.known.remove(&evicted.fingerprint);
                }
                None => break,
            }
        }

        let fingerprint: Box<[u8]> = fingerprint.into();
        entries.known.insert(fingerprint.clone());
        entries.by_age.push_back(TimeEntry {
            instant: now,
            fingerprint,
        });

        false
    }
}

impl AntiReplayCache for TimedAntiReplayCache {
    fn seen_before(&self, fingerprint: &[u8]) -> bool {
        self.check_at(fingerprint, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sighting_is_replay() {
        let cache = TimedAntiReplayCache::new(100, Duration::from_secs(60));
        assert!(!cache.seen_before(b"first"));
        assert!(cache.seen_before(b"first"));
        assert!(!cache.seen_before(b"second"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_expire() {
        let cache = TimedAntiReplayCache::new(100, Duration::from_secs(10));
        let start = Instant::now();
        assert!(!cache.check_at(b"random", start));
        assert!(cache.check_at(b"random", start + Duration::from_secs(9)));
        assert!(!cache.check_at(b"random", start + Duration::from_secs(11)));
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let cache = TimedAntiReplayCache::new(2, Duration::from_secs(60));
        assert!(!cache.seen_before(b"a"));
        assert!(!cache.seen_before(b"b"));
        assert!(!cache.seen_before(b"c"));
        assert_eq!(cache.len(), 2);
        // "a" was pushed out by "c"
        assert!(!cache.seen_before(b"a"));
        assert!(cache.seen_before(b"c"));
    }

    #[test]
    fn test_noop_never_reports_replay() {
        let cache = NoopAntiReplayCache;
        assert!(!cache.seen_before(b"x"));
        assert!(!cache.seen_before(b"x"));
    }
}
