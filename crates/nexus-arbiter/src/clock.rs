//! Activity clock and mode flag shared by task handling and the monitor

use nexus_core::Mode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Last observed activity plus the current mode.
///
/// Lock-free so `touch` can be called synchronously from task code while
/// the monitor reads it; readers may see slightly stale values.
pub struct ActivityClock {
    epoch: Instant,
    last_activity_ms: AtomicU64,
    generation: AtomicU64,
    sentry: AtomicBool,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            sentry: AtomicBool::new(false),
        }
    }

    /// Record activity. Returns true if this left sentry mode.
    pub fn touch(&self) -> bool {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now_ms, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sentry.swap(false, Ordering::SeqCst)
    }

    /// Time since the last activity signal
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::SeqCst));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Counter bumped on every `touch`
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> Mode {
        if self.sentry.load(Ordering::SeqCst) {
            Mode::Sentry
        } else {
            Mode::Active
        }
    }

    /// Switch to sentry unless activity was recorded after `generation`
    pub fn enter_sentry_since(&self, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.sentry.store(true, Ordering::SeqCst);
        true
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_and_touch() {
        let clock = ActivityClock::new();
        tokio::time::advance(Duration::from_secs(42)).await;
        assert_eq!(clock.idle_for(), Duration::from_secs(42));

        assert!(!clock.touch());
        assert_eq!(clock.idle_for(), Duration::ZERO);
    }

    #[test]
    fn test_sentry_guard() {
        let clock = ActivityClock::new();
        let generation = clock.generation();
        clock.touch();
        assert!(!clock.enter_sentry_since(generation));
        assert_eq!(clock.mode(), Mode::Active);

        assert!(clock.enter_sentry_since(clock.generation()));
        assert_eq!(clock.mode(), Mode::Sentry);
        assert!(clock.touch());
        assert_eq!(clock.mode(), Mode::Active);
    }
}
