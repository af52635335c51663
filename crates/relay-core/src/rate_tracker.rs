//! Sliding-window request accounting per provider
//!
//! Each provider gets its own window of admission timestamps behind its own
//! lock, so admission for one provider never waits on another. An entry
//! expires once it is `window` old or older: the live window is
//! `(now - window, now]`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::types::{ProviderId, RateLimit};

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Point-in-time count for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub count: usize,
    pub limit: u32,
}

impl WindowUsage {
    pub fn percent(&self) -> f64 {
        if self.limit == 0 {
            return 100.0;
        }
        (self.count as f64 / self.limit as f64) * 100.0
    }
}

pub struct RateTracker {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<ProviderId, Window>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve one slot for `provider` if its window holds fewer than
    /// `limit.requests` live entries. Records nothing on refusal.
    pub fn try_acquire(&self, provider: &ProviderId, limit: RateLimit) -> bool {
        let window = self.window(provider);
        let mut entries = lock_window(&window, provider);
        let now = self.clock.now();
        purge(&mut entries, now, limit);

        if entries.len() >= limit.requests as usize {
            debug!(
                "Provider {} at rate limit ({}/{})",
                provider,
                entries.len(),
                limit.requests
            );
            return false;
        }

        entries.push_back(now);
        debug!(
            "Provider {} admitted ({}/{})",
            provider,
            entries.len(),
            limit.requests
        );
        true
    }

    /// Live count for `provider`. Purges expired entries but never records one.
    pub fn utilization(&self, provider: &ProviderId, limit: RateLimit) -> WindowUsage {
        let Some(window) = self.existing_window(provider) else {
            return WindowUsage {
                count: 0,
                limit: limit.requests,
            };
        };
        let mut entries = lock_window(&window, provider);
        purge(&mut entries, self.clock.now(), limit);
        WindowUsage {
            count: entries.len(),
            limit: limit.requests,
        }
    }

    /// Providers that have had at least one admission
    pub fn tracked_providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.windows_map().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn window(&self, provider: &ProviderId) -> Window {
        let mut windows = self.windows_map();
        Arc::clone(windows.entry(provider.clone()).or_default())
    }

    fn existing_window(&self, provider: &ProviderId) -> Option<Window> {
        self.windows_map().get(provider).map(Arc::clone)
    }

    fn windows_map(&self) -> MutexGuard<'_, HashMap<ProviderId, Window>> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            warn!("Rate window map mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_window<'a>(window: &'a Window, provider: &ProviderId) -> MutexGuard<'a, VecDeque<Instant>> {
    window.lock().unwrap_or_else(|poisoned| {
        warn!("Rate window for {} was poisoned, recovering", provider);
        poisoned.into_inner()
    })
}

fn purge(entries: &mut VecDeque<Instant>, now: Instant, limit: RateLimit) {
    while let Some(oldest) = entries.front() {
        if now.saturating_duration_since(*oldest) >= limit.window {
            entries.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn tracker() -> (Arc<ManualClock>, RateTracker) {
        let clock = Arc::new(ManualClock::new());
        let tracker = RateTracker::with_clock(clock.clone());
        (clock, tracker)
    }

    #[test]
    fn test_limit_then_refuse() {
        let (_clock, tracker) = tracker();
        let p = ProviderId::from("gemini_flash");
        let limit = RateLimit::per_minute(10);

        for _ in 0..10 {
            assert!(tracker.try_acquire(&p, limit));
        }
        assert!(!tracker.try_acquire(&p, limit));
        assert_eq!(tracker.utilization(&p, limit).count, 10);
    }

    #[test]
    fn test_refusal_records_nothing() {
        let (_clock, tracker) = tracker();
        let p = ProviderId::from("groq");
        let limit = RateLimit::per_minute(1);

        assert!(tracker.try_acquire(&p, limit));
        for _ in 0..5 {
            assert!(!tracker.try_acquire(&p, limit));
        }
        assert_eq!(tracker.utilization(&p, limit).count, 1);
    }

    #[test]
    fn test_window_boundary_is_expired() {
        let (clock, tracker) = tracker();
        let p = ProviderId::from("groq");
        let limit = RateLimit::new(2, Duration::from_secs(60));

        assert!(tracker.try_acquire(&p, limit));
        assert!(tracker.try_acquire(&p, limit));

        clock.advance(Duration::from_millis(59_999));
        assert!(!tracker.try_acquire(&p, limit));

        // exactly one window later the entries are gone
        clock.advance(Duration::from_millis(1));
        assert!(tracker.try_acquire(&p, limit));
        assert_eq!(tracker.utilization(&p, limit).count, 1);
    }

    #[test]
    fn test_entries_expire_individually() {
        let (clock, tracker) = tracker();
        let p = ProviderId::from("a");
        let limit = RateLimit::new(3, Duration::from_secs(10));

        assert!(tracker.try_acquire(&p, limit));
        clock.advance(Duration::from_secs(4));
        assert!(tracker.try_acquire(&p, limit));
        clock.advance(Duration::from_secs(4));
        assert!(tracker.try_acquire(&p, limit));
        assert!(!tracker.try_acquire(&p, limit));

        clock.advance(Duration::from_secs(2));
        assert_eq!(tracker.utilization(&p, limit).count, 2);
        assert!(tracker.try_acquire(&p, limit));
    }

    #[test]
    fn test_providers_are_independent() {
        let (_clock, tracker) = tracker();
        let limit = RateLimit::per_minute(1);
        let a = ProviderId::from("a");
        let b = ProviderId::from("b");

        assert!(tracker.try_acquire(&a, limit));
        assert!(!tracker.try_acquire(&a, limit));
        assert!(tracker.try_acquire(&b, limit));
        assert_eq!(tracker.tracked_providers(), vec![a, b]);
    }

    #[test]
    fn test_zero_limit_never_admits() {
        let (_clock, tracker) = tracker();
        let p = ProviderId::from("off");
        assert!(!tracker.try_acquire(&p, RateLimit::per_minute(0)));
    }

    #[test]
    fn test_utilization_never_increases_on_its_own() {
        let (clock, tracker) = tracker();
        let p = ProviderId::from("a");
        let limit = RateLimit::new(5, Duration::from_secs(30));
        for _ in 0..3 {
            tracker.try_acquire(&p, limit);
            clock.advance(Duration::from_secs(10));
        }

        let mut previous = tracker.utilization(&p, limit).count;
        for _ in 0..8 {
            clock.advance(Duration::from_secs(5));
            let current = tracker.utilization(&p, limit).count;
            assert!(current <= previous);
            previous = current;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_utilization_of_unknown_provider() {
        let (_clock, tracker) = tracker();
        let usage = tracker.utilization(&ProviderId::from("never"), RateLimit::per_minute(4));
        assert_eq!(usage, WindowUsage { count: 0, limit: 4 });
        assert!(tracker.tracked_providers().is_empty());
    }

    #[test]
    fn test_window_usage_percent() {
        let usage = WindowUsage { count: 3, limit: 4 };
        assert!((usage.percent() - 75.0).abs() < f64::EPSILON);
        let off = WindowUsage { count: 0, limit: 0 };
        assert!((off.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_acquire_never_overadmits() {
        let tracker = Arc::new(RateTracker::with_clock(Arc::new(ManualClock::new())));
        let p = ProviderId::from("hot");
        let limit = RateLimit::per_minute(25);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let p = p.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| tracker.try_acquire(&p, limit)).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
        assert_eq!(tracker.utilization(&p, limit).count, 25);
    }
}
